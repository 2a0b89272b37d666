use std::str::FromStr;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    identity::Principal,
    mongo_ext::{transaction_options, Collection},
    util::{current_timestamp, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::{
    account::{AccountCollection, Role},
    parcel::{ParcelCollection, ParcelStatus, ParcelsResponse},
    AdminGate, RiderGate,
};

#[derive(Clone)]
pub struct RiderCollection(pub Collection<RiderModel>);

impl std::ops::Deref for RiderCollection {
    type Target = Collection<RiderModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Rider moderation lifecycle: `pending -> {active, rejected}`, terminal once
/// resolved. Activation mirrors `role: rider` onto the account.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiderStatus {
    Pending,
    Active,
    Rejected,
}

impl RiderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Rejected => "rejected",
        }
    }
}

impl From<RiderStatus> for bson::Bson {
    fn from(value: RiderStatus) -> Self {
        value.as_str().into()
    }
}

impl FromStr for RiderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::InvalidArgument(format!(
                "unknown rider status: {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkStatus {
    Idle,
    OnWork,
}

impl WorkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OnWork => "on-work",
        }
    }
}

impl From<WorkStatus> for bson::Bson {
    fn from(value: WorkStatus) -> Self {
        value.as_str().into()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub email: String,
    pub district: String,

    #[serde(rename = "preferredDistrict")]
    pub preferred_district: String,

    pub status: RiderStatus,

    #[serde(rename = "workStatus")]
    pub work_status: WorkStatus,

    pub created_at: bson::DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<bson::DateTime>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RiderResponse {
    pub id: ObjectIdString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    pub district: String,
    #[serde(rename = "preferredDistrict")]
    pub preferred_district: String,
    pub status: RiderStatus,
    #[serde(rename = "workStatus")]
    pub work_status: WorkStatus,
    pub created_at: FormattedDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<FormattedDateTime>,
}

impl From<RiderModel> for RiderResponse {
    fn from(value: RiderModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            district: value.district,
            preferred_district: value.preferred_district,
            status: value.status,
            work_status: value.work_status,
            created_at: value.created_at.into(),
            status_updated_at: value.status_updated_at.map(Into::into),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RidersResponse {
    pub riders: Vec<RiderResponse>,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRiderRequest {
    pub name: Option<String>,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub district: String,

    #[serde(rename = "preferredDistrict")]
    #[validate(length(min = 1))]
    pub preferred_district: String,
}

/// Self-registration always enters `pending`/`idle`; moderation state is
/// owned by this store, not the caller.
pub async fn register(
    State(riders): State<RiderCollection>,
    Json(request): Json<RegisterRiderRequest>,
) -> Result<Json<RiderResponse>, Error> {
    request.validate()?;

    let model = RiderModel {
        id: ObjectId::new(),
        name: request.name,
        email: request.email,
        district: request.district,
        preferred_district: request.preferred_district,
        status: RiderStatus::Pending,
        work_status: WorkStatus::Idle,
        created_at: current_timestamp().into(),
        status_updated_at: None,
    };

    riders.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Deserialize, Debug)]
pub struct RiderEmailQuery {
    pub email: Option<String>,
}

pub async fn show_by_email(
    State(riders): State<RiderCollection>,
    Query(query): Query<RiderEmailQuery>,
) -> Result<Json<RiderResponse>, Error> {
    let email = query
        .email
        .ok_or_else(|| Error::InvalidArgument("email query is required".to_string()))?;

    let rider = riders
        .find_one(bson::doc! { "email": email }, None)
        .await?
        .ok_or(Error::NotFound("rider not found"))?;

    Ok(Json(rider.into()))
}

#[derive(Deserialize, Debug)]
pub struct DistrictQuery {
    pub district: Option<String>,
    #[serde(rename = "preferredDistrict")]
    pub preferred_district: Option<String>,
}

/// `preferredDistrict` wins when both filters are given.
pub fn district_filter(query: &DistrictQuery) -> bson::Document {
    if let Some(preferred) = &query.preferred_district {
        bson::doc! { "preferredDistrict": preferred }
    } else if let Some(district) = &query.district {
        bson::doc! { "district": district }
    } else {
        bson::doc! {}
    }
}

pub async fn index(
    State(riders): State<RiderCollection>,
    Query(query): Query<DistrictQuery>,
) -> Result<Json<RidersResponse>, Error> {
    let mut cursor = riders.find(district_filter(&query), None).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(RidersResponse { riders: result }))
}

pub async fn pending_riders(
    _gate: AdminGate,
    State(riders): State<RiderCollection>,
) -> Result<Json<RidersResponse>, Error> {
    let mut cursor = riders
        .find(bson::doc! { "status": RiderStatus::Pending }, None)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(RidersResponse { riders: result }))
}

pub async fn active_riders(
    _gate: AdminGate,
    State(riders): State<RiderCollection>,
) -> Result<Json<RidersResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = riders
        .find(bson::doc! { "status": RiderStatus::Active }, options)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(RidersResponse { riders: result }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AssignRiderRequest {
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectIdString,
    #[serde(rename = "riderId")]
    pub rider_id: ObjectIdString,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AssignRiderResponse {
    pub success: bool,
    #[serde(rename = "parcelModified")]
    pub parcel_modified: u64,
    #[serde(rename = "riderModified")]
    pub rider_modified: u64,
}

/// Assign-rider: parcel `pending -> rider-assigned` with the rider recorded,
/// rider flipped to `on-work`. The two writes commit in one transaction; each
/// write's modified-count is still reported independently.
pub async fn assign(
    State(mongo): State<mongodb::Client>,
    State(parcels): State<ParcelCollection>,
    State(riders): State<RiderCollection>,
    Json(request): Json<AssignRiderRequest>,
) -> Result<Json<AssignRiderResponse>, Error> {
    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    let parcel = parcels
        .update_one_with_session(
            bson::doc! {
                "_id": ObjectId::from(request.parcel_id),
                "status": ParcelStatus::Pending,
            },
            bson::doc! {
                "$set": {
                    "status": ParcelStatus::RiderAssigned,
                    "riderId": ObjectId::from(request.rider_id),
                }
            },
            None,
            &mut session,
        )
        .await?;

    let rider = riders
        .update_one_with_session(
            bson::doc! { "_id": ObjectId::from(request.rider_id) },
            bson::doc! {
                "$set": { "workStatus": WorkStatus::OnWork }
            },
            None,
            &mut session,
        )
        .await?;

    session.commit_transaction().await?;

    Ok(Json(AssignRiderResponse {
        success: true,
        parcel_modified: parcel.modified_count,
        rider_modified: rider.modified_count,
    }))
}

pub async fn pending_delivery(
    State(parcels): State<ParcelCollection>,
    PathObjectId(rider_id): PathObjectId,
) -> Result<Json<ParcelsResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": 1 })
        .build();

    let mut cursor = parcels
        .find(
            bson::doc! {
                "riderId": rider_id,
                "status": {
                    "$in": [ParcelStatus::RiderAssigned, ParcelStatus::InTransit]
                },
            },
            options,
        )
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(ParcelsResponse { parcels: result }))
}

pub async fn completed_deliveries(
    _gate: RiderGate,
    State(parcels): State<ParcelCollection>,
    PathObjectId(rider_id): PathObjectId,
) -> Result<Json<ParcelsResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = parcels
        .find(
            bson::doc! {
                "riderId": rider_id,
                "status": {
                    "$in": [ParcelStatus::Delivered, ParcelStatus::ServiceCenterDelivered]
                },
            },
            options,
        )
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(ParcelsResponse { parcels: result }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateRiderStatusRequest {
    pub id: ObjectIdString,
    pub status: String,
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateRiderStatusResponse {
    pub updated: bool,
    #[serde(rename = "riderModified")]
    pub rider_modified: u64,
    #[serde(rename = "roleModified")]
    pub role_modified: u64,
}

/// Only the two terminal states are valid resolution targets.
pub fn resolution_target(status: &str) -> Result<RiderStatus, Error> {
    match status.parse::<RiderStatus>()? {
        RiderStatus::Pending => Err(Error::InvalidArgument(
            "status must be active or rejected".to_string(),
        )),
        status => Ok(status),
    }
}

/// Resolution only applies to a still-pending application.
pub fn rider_resolution_filter() -> bson::Document {
    bson::doc! {
        "status": RiderStatus::Pending,
    }
}

/// Resolve a rider application. The rider-store write is guarded on
/// `status: pending`, so re-resolving a terminal application reports
/// `NotFound` instead of silently overwriting. Activation mirrors
/// `role: rider` onto the account matched by email inside the same
/// transaction, and the response carries both write counts regardless of the
/// target state.
pub async fn update_status(
    principal: Principal,
    State(mongo): State<mongodb::Client>,
    State(riders): State<RiderCollection>,
    State(accounts): State<AccountCollection>,
    Json(request): Json<UpdateRiderStatusRequest>,
) -> Result<Json<UpdateRiderStatusResponse>, Error> {
    let status = resolution_target(&request.status)?;

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    let mut filter = bson::doc! { "_id": ObjectId::from(request.id) };
    filter.extend(rider_resolution_filter());

    let rider = riders
        .update_one_with_session(
            filter,
            bson::doc! {
                "$set": {
                    "status": status,
                    "status_updated_at": bson::DateTime::from(current_timestamp()),
                }
            },
            None,
            &mut session,
        )
        .await?;

    if rider.modified_count == 0 {
        // dropping the session aborts the transaction
        return Err(Error::NotFound("rider not found or already resolved"))
            .tap_err(|_| tracing::debug!(by = %principal.email, "stale rider resolution"));
    }

    let mut role_modified = 0;

    if status == RiderStatus::Active {
        let email = request.email.ok_or_else(|| {
            Error::InvalidArgument("email is required to activate a rider".to_string())
        })?;

        let role = accounts
            .update_one_with_session(
                bson::doc! { "email": email },
                bson::doc! {
                    "$set": { "role": Role::Rider }
                },
                None,
                &mut session,
            )
            .await?;

        role_modified = role.modified_count;
    }

    session.commit_transaction().await?;

    Ok(Json(UpdateRiderStatusResponse {
        updated: true,
        rider_modified: rider.modified_count,
        role_modified,
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::Error;

    use super::{
        district_filter, resolution_target, rider_resolution_filter, DistrictQuery, RiderStatus,
        WorkStatus,
    };

    #[test]
    fn test_resolution_targets() {
        assert_eq!(resolution_target("active").unwrap(), RiderStatus::Active);
        assert_eq!(resolution_target("rejected").unwrap(), RiderStatus::Rejected);

        assert_matches!(resolution_target("pending"), Err(Error::InvalidArgument(..)));
        assert_matches!(resolution_target("approved"), Err(Error::InvalidArgument(..)));
    }

    #[test]
    fn test_resolution_is_guarded_on_pending() {
        let filter = rider_resolution_filter();
        assert_eq!(filter.get_str("status").unwrap(), "pending");
    }

    #[test]
    fn test_district_filter_prefers_preferred() {
        let filter = district_filter(&DistrictQuery {
            district: Some("Dhaka".to_string()),
            preferred_district: Some("Khulna".to_string()),
        });
        assert_eq!(filter.get_str("preferredDistrict").unwrap(), "Khulna");
        assert!(!filter.contains_key("district"));

        let filter = district_filter(&DistrictQuery {
            district: Some("Dhaka".to_string()),
            preferred_district: None,
        });
        assert_eq!(filter.get_str("district").unwrap(), "Dhaka");

        let filter = district_filter(&DistrictQuery {
            district: None,
            preferred_district: None,
        });
        assert!(filter.is_empty());
    }

    #[test]
    fn test_work_status_wire_spelling() {
        assert_eq!(serde_json::to_string(&WorkStatus::Idle).unwrap(), "\"idle\"");
        assert_eq!(
            serde_json::to_string(&WorkStatus::OnWork).unwrap(),
            "\"on-work\""
        );

        for status in [WorkStatus::Idle, WorkStatus::OnWork] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_rider_status_wire_spelling() {
        for status in [
            RiderStatus::Pending,
            RiderStatus::Active,
            RiderStatus::Rejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}
