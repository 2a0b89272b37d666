use std::str::FromStr;

use axum::{extract::State, Json};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{current_timestamp, FormattedDateTime, ObjectIdString, PathObjectId},
};

#[derive(Clone)]
pub struct CashoutCollection(pub Collection<CashoutModel>);

impl std::ops::Deref for CashoutCollection {
    type Target = Collection<CashoutModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Cashout lifecycle: `pending -> {approved, rejected}`, terminal once
/// resolved.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CashoutStatus {
    Pending,
    Approved,
    Rejected,
}

impl CashoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl From<CashoutStatus> for bson::Bson {
    fn from(value: CashoutStatus) -> Self {
        value.as_str().into()
    }
}

impl FromStr for CashoutStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidArgument(format!(
                "unknown cashout status: {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CashoutModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(rename = "riderId")]
    pub rider_id: ObjectId,

    #[serde(rename = "riderEmail")]
    pub rider_email: String,

    pub amount: Decimal,
    pub status: CashoutStatus,

    pub requested_at: bson::DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<bson::DateTime>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CashoutResponse {
    pub id: ObjectIdString,
    #[serde(rename = "riderId")]
    pub rider_id: ObjectIdString,
    #[serde(rename = "riderEmail")]
    pub rider_email: String,
    pub amount: Decimal,
    pub status: CashoutStatus,
    pub requested_at: FormattedDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<FormattedDateTime>,
}

impl From<CashoutModel> for CashoutResponse {
    fn from(value: CashoutModel) -> Self {
        Self {
            id: value.id.into(),
            rider_id: value.rider_id.into(),
            rider_email: value.rider_email,
            amount: value.amount,
            status: value.status,
            requested_at: value.requested_at.into(),
            processed_at: value.processed_at.map(Into::into),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug)]
pub struct CashoutRequest {
    #[serde(rename = "riderId")]
    pub rider_id: ObjectIdString,

    #[serde(rename = "riderEmail")]
    #[validate(email)]
    pub rider_email: String,

    pub amount: Decimal,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CashoutCreatedResponse {
    pub success: bool,
    pub id: ObjectIdString,
}

pub async fn request(
    State(cashouts): State<CashoutCollection>,
    Json(request): Json<CashoutRequest>,
) -> Result<Json<CashoutCreatedResponse>, Error> {
    request.validate()?;

    if request.amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(
            "amount must be positive".to_string(),
        ));
    }

    let model = CashoutModel {
        id: ObjectId::new(),
        rider_id: request.rider_id.into(),
        rider_email: request.rider_email,
        amount: request.amount,
        status: CashoutStatus::Pending,
        requested_at: current_timestamp().into(),
        processed_at: None,
    };

    cashouts.insert_one(&model, None).await?;

    Ok(Json(CashoutCreatedResponse {
        success: true,
        id: model.id.into(),
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CashoutsResponse {
    pub cashouts: Vec<CashoutResponse>,
}

pub async fn index(
    State(cashouts): State<CashoutCollection>,
) -> Result<Json<CashoutsResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "requested_at": -1 })
        .build();

    let mut cursor = cashouts.find(None, options).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(CashoutsResponse { cashouts: result }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ResolveRequest {
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ResolveResponse {
    pub success: bool,
}

/// Only the two terminal states are valid resolution targets.
pub fn resolution_target(status: &str) -> Result<CashoutStatus, Error> {
    match status.parse::<CashoutStatus>()? {
        CashoutStatus::Pending => Err(Error::InvalidArgument(
            "status must be approved or rejected".to_string(),
        )),
        status => Ok(status),
    }
}

/// Resolution only applies to a still-pending request.
pub fn resolution_filter() -> bson::Document {
    bson::doc! {
        "status": CashoutStatus::Pending,
    }
}

/// Terminal-resolve a cashout. The filter pins `status: pending`, so a second
/// resolution of the same request (approve then reject, or a repeat of either)
/// matches zero documents and reports `NotFound`.
pub async fn resolve(
    State(cashouts): State<CashoutCollection>,
    PathObjectId(id): PathObjectId,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, Error> {
    let status = resolution_target(&request.status)?;

    let result = cashouts
        .update_one_by_id(
            id,
            resolution_filter(),
            bson::doc! {
                "$set": {
                    "status": status,
                    "processed_at": bson::DateTime::from(current_timestamp()),
                }
            },
        )
        .await?;

    if result.modified_count == 0 {
        return Err(Error::NotFound("cashout not found or already resolved"));
    }

    Ok(Json(ResolveResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::Error;

    use super::{resolution_filter, resolution_target, CashoutStatus};

    #[test]
    fn test_resolution_targets() {
        assert_eq!(resolution_target("approved").unwrap(), CashoutStatus::Approved);
        assert_eq!(resolution_target("rejected").unwrap(), CashoutStatus::Rejected);

        assert_matches!(resolution_target("pending"), Err(Error::InvalidArgument(..)));
        assert_matches!(resolution_target("done"), Err(Error::InvalidArgument(..)));
    }

    #[test]
    fn test_resolution_is_guarded_on_pending() {
        let filter = resolution_filter();
        assert_eq!(filter.get_str("status").unwrap(), "pending");
    }

    #[test]
    fn test_status_wire_spelling() {
        for status in [
            CashoutStatus::Pending,
            CashoutStatus::Approved,
            CashoutStatus::Rejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}
