pub mod account;
pub mod cashout;
pub mod parcel;
pub mod payment;
pub mod rider;
pub mod tracking;

use std::marker::PhantomData;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use tap::TapFallible;

use crate::{
    error::Error,
    identity::{IdentityState, Principal},
};

use self::account::{AccountCollection, AccountModel, Role};

pub trait RequiredRole {
    const ROLE: Role;
    const DENIED: &'static str;
}

pub struct AdminOnly;

impl RequiredRole for AdminOnly {
    const ROLE: Role = Role::Admin;
    const DENIED: &'static str = "admins only";
}

pub struct RiderOnly;

impl RequiredRole for RiderOnly {
    const ROLE: Role = Role::Rider;
    const DENIED: &'static str = "riders only";
}

/// Request-pipeline guard parameterized by the required stored role. Runs
/// strictly after identity verification: the principal's email is resolved
/// against the account store and the stored role must match.
pub struct Gate<R> {
    pub principal: Principal,
    pub account: AccountModel,
    _role: PhantomData<R>,
}

pub type AdminGate = Gate<AdminOnly>;
pub type RiderGate = Gate<RiderOnly>;

pub fn require_role(
    account: Option<AccountModel>,
    role: Role,
    denied: &'static str,
) -> Result<AccountModel, Error> {
    account
        .filter(|it| it.role == role)
        .ok_or(Error::Forbidden(denied))
}

#[axum::async_trait]
impl<S, R> FromRequestParts<S> for Gate<R>
where
    IdentityState: FromRef<S>,
    AccountCollection: FromRef<S>,
    S: Send + Sync,
    R: RequiredRole + Send,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extract_with_state::<Principal, _>(state).await?;

        let AccountCollection(accounts) = AccountCollection::from_ref(state);

        let account = accounts
            .find_one(
                bson::doc! {
                    "email": &principal.email
                },
                None,
            )
            .await?;

        let account = require_role(account, R::ROLE, R::DENIED)
            .tap_err(|_| tracing::debug!(email = %principal.email, "role gate refused"))?;

        Ok(Self {
            principal,
            account,
            _role: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bson::oid::ObjectId;

    use crate::error::Error;

    use super::{
        account::{AccountModel, Role},
        require_role,
    };

    fn account(role: Role) -> AccountModel {
        AccountModel {
            id: ObjectId::new(),
            email: "a@x.com".to_string(),
            role,
            created_at: bson::DateTime::now(),
            last_logged_in: bson::DateTime::now(),
        }
    }

    #[test]
    fn test_matching_role_passes() {
        let model = require_role(Some(account(Role::Admin)), Role::Admin, "admins only").unwrap();
        assert_eq!(model.role, Role::Admin);
    }

    #[test]
    fn test_wrong_role_is_forbidden() {
        let error =
            require_role(Some(account(Role::User)), Role::Admin, "admins only").unwrap_err();
        assert_matches!(error, Error::Forbidden("admins only"));

        let error =
            require_role(Some(account(Role::Admin)), Role::Rider, "riders only").unwrap_err();
        assert_matches!(error, Error::Forbidden("riders only"));
    }

    #[test]
    fn test_unknown_account_is_forbidden() {
        let error = require_role(None, Role::Admin, "admins only").unwrap_err();
        assert_matches!(error, Error::Forbidden("admins only"));
    }
}
