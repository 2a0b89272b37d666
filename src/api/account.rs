use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    identity::Principal,
    mongo_ext::Collection,
    util::{current_timestamp, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::AdminGate;

#[derive(Clone)]
pub struct AccountCollection(pub Collection<AccountModel>);

impl std::ops::Deref for AccountCollection {
    type Target = Collection<AccountModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Rider,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Rider => "rider",
            Self::Admin => "admin",
        }
    }
}

impl From<Role> for bson::Bson {
    fn from(value: Role) -> Self {
        value.as_str().into()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,

    #[serde(default)]
    pub role: Role,

    pub created_at: bson::DateTime,
    pub last_logged_in: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccountResponse {
    pub id: ObjectIdString,
    pub email: String,
    pub role: Role,
    pub created_at: FormattedDateTime,
    pub last_logged_in: FormattedDateTime,
}

impl From<AccountModel> for AccountResponse {
    fn from(value: AccountModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            role: value.role,
            created_at: value.created_at.into(),
            last_logged_in: value.last_logged_in.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct TouchAccountRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TouchAccountResponse {
    pub message: String,
    pub updated: bool,
    pub inserted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectIdString>,
}

/// Create-or-touch by email. The first contact inserts a `user`-role account;
/// every later contact with the same email only bumps `last_logged_in`, so the
/// call is idempotent with respect to account existence.
pub async fn create_or_touch(
    State(accounts): State<AccountCollection>,
    Json(request): Json<TouchAccountRequest>,
) -> Result<Json<TouchAccountResponse>, Error> {
    request.validate()?;

    let existing = accounts
        .find_one(
            bson::doc! {
                "email": &request.email
            },
            None,
        )
        .await?;

    if let Some(existing) = existing {
        accounts
            .update_one(
                bson::doc! { "email": &request.email },
                touch_update(current_timestamp().into()),
                None,
            )
            .await?;

        return Ok(Json(TouchAccountResponse {
            message: "account already existed, last_logged_in updated".to_string(),
            updated: true,
            inserted: false,
            id: Some(existing.id.into()),
        }));
    }

    let model = AccountModel {
        id: ObjectId::new(),
        email: request.email,
        role: Role::User,
        created_at: current_timestamp().into(),
        last_logged_in: current_timestamp().into(),
    };
    accounts.insert_one(&model, None).await?;

    Ok(Json(TouchAccountResponse {
        message: "account created".to_string(),
        updated: false,
        inserted: true,
        id: Some(model.id.into()),
    }))
}

pub fn touch_update(now: bson::DateTime) -> bson::Document {
    bson::doc! {
        "$set": {
            "last_logged_in": now
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct SearchQuery {
    pub email: Option<String>,
}

/// Case-insensitive substring match on email.
pub fn search_filter(fragment: &str) -> bson::Document {
    bson::doc! {
        "email": {
            "$regex": fragment,
            "$options": "i",
        }
    }
}

pub fn search_options() -> mongodb::options::FindOptions {
    mongodb::options::FindOptions::builder()
        .projection(bson::doc! {
            "email": 1,
            "created_at": 1,
            "role": 1,
        })
        .limit(10)
        .build()
}

#[derive(Deserialize, Debug, Clone)]
pub struct AccountSearchHit {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    pub created_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SearchHitResponse {
    pub id: ObjectIdString,
    pub email: String,
    pub role: Role,
    pub created_at: FormattedDateTime,
}

impl From<AccountSearchHit> for SearchHitResponse {
    fn from(value: AccountSearchHit) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            role: value.role,
            created_at: value.created_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SearchResponse {
    pub accounts: Vec<SearchHitResponse>,
}

pub async fn search(
    State(accounts): State<AccountCollection>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, Error> {
    let fragment = query
        .email
        .ok_or_else(|| Error::InvalidArgument("email query is required".to_string()))?;

    let mut cursor = accounts
        .clone_with_type::<AccountSearchHit>()
        .find(search_filter(&fragment), search_options())
        .await?;

    let mut hits = vec![];

    while cursor.advance().await? {
        hits.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(SearchResponse { accounts: hits }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoleChangeResponse {
    pub success: bool,
    pub message: String,
}

pub async fn make_admin(
    _gate: AdminGate,
    State(accounts): State<AccountCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<RoleChangeResponse>, Error> {
    let result = accounts
        .update_one_by_id(
            id,
            bson::doc! {},
            bson::doc! {
                "$set": { "role": Role::Admin }
            },
        )
        .await?;

    if result.modified_count == 0 {
        return Err(Error::NotFound("account not found or already admin"));
    }

    Ok(Json(RoleChangeResponse {
        success: true,
        message: "admin role granted".to_string(),
    }))
}

pub async fn remove_admin(
    _gate: AdminGate,
    State(accounts): State<AccountCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<RoleChangeResponse>, Error> {
    let result = accounts
        .update_one_by_id(
            id,
            bson::doc! { "role": Role::Admin },
            bson::doc! {
                "$set": { "role": Role::User }
            },
        )
        .await?;

    if result.modified_count == 0 {
        return Err(Error::NotFound("account not found or not an admin"));
    }

    Ok(Json(RoleChangeResponse {
        success: true,
        message: "admin role removed".to_string(),
    }))
}

#[derive(Deserialize, Debug)]
pub struct RoleQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RoleResponse {
    pub role: Role,
}

/// A caller may only ask for their own role: the query email must match the
/// email carried by the verified credential.
pub async fn role(
    principal: Principal,
    State(accounts): State<AccountCollection>,
    Query(query): Query<RoleQuery>,
) -> Result<Json<RoleResponse>, Error> {
    let email = query
        .email
        .filter(|it| *it == principal.email)
        .ok_or(Error::Forbidden("email mismatch"))?;

    let account = accounts
        .find_one(
            bson::doc! {
                "email": email
            },
            None,
        )
        .await?
        .ok_or(Error::NotFound("account not found"))?;

    Ok(Json(RoleResponse { role: account.role }))
}

#[cfg(test)]
mod tests {
    use super::{search_filter, search_options, touch_update, Role};

    #[test]
    fn test_role_wire_spelling() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Rider).unwrap(), "\"rider\"");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");

        for role in [Role::User, Role::Rider, Role::Admin] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_missing_role_defaults_to_user() {
        let doc = bson::doc! {
            "_id": bson::oid::ObjectId::new(),
            "email": "a@x.com",
            "created_at": bson::DateTime::now(),
            "last_logged_in": bson::DateTime::now(),
        };

        let model: super::AccountModel = bson::from_document(doc).unwrap();
        assert_eq!(model.role, Role::User);
    }

    #[test]
    fn test_search_is_case_insensitive_and_limited() {
        let filter = search_filter("A@x");
        let email = filter.get_document("email").unwrap();
        assert_eq!(email.get_str("$regex").unwrap(), "A@x");
        assert_eq!(email.get_str("$options").unwrap(), "i");

        let options = search_options();
        assert_eq!(options.limit, Some(10));
    }

    #[test]
    fn test_touch_sets_only_last_logged_in() {
        let update = touch_update(bson::DateTime::now());
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains_key("last_logged_in"));
    }
}
