use std::str::FromStr;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    identity::Principal,
    mongo_ext::Collection,
    util::{current_timestamp, FormattedDateTime, ObjectIdString, PathObjectId},
};

#[derive(Clone)]
pub struct ParcelCollection(pub Collection<ParcelModel>);

impl std::ops::Deref for ParcelCollection {
    type Target = Collection<ParcelModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The parcel lifecycle. A parcel only ever advances
/// `pending -> rider-assigned -> in-transit -> {delivered | service-center-delivered}`;
/// [`ParcelStatus::legal_predecessors`] is the transition table, and every
/// status write pins the predecessor in its filter so an illegal transition
/// matches zero documents.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ParcelStatus {
    Pending,
    RiderAssigned,
    InTransit,
    Delivered,
    ServiceCenterDelivered,
}

impl ParcelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RiderAssigned => "rider-assigned",
            Self::InTransit => "in-transit",
            Self::Delivered => "delivered",
            Self::ServiceCenterDelivered => "service-center-delivered",
        }
    }

    pub fn legal_predecessors(self) -> &'static [ParcelStatus] {
        match self {
            Self::Pending => &[],
            Self::RiderAssigned => &[Self::Pending],
            Self::InTransit => &[Self::RiderAssigned],
            Self::Delivered | Self::ServiceCenterDelivered => &[Self::InTransit],
        }
    }

    pub fn can_transition(from: ParcelStatus, to: ParcelStatus) -> bool {
        to.legal_predecessors().contains(&from)
    }
}

impl From<ParcelStatus> for bson::Bson {
    fn from(value: ParcelStatus) -> Self {
        value.as_str().into()
    }
}

impl FromStr for ParcelStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "rider-assigned" => Ok(Self::RiderAssigned),
            "in-transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "service-center-delivered" => Ok(Self::ServiceCenterDelivered),
            other => Err(Error::InvalidArgument(format!(
                "unknown parcel status: {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentFlag {
    Unpaid,
    Paid,
}

impl PaymentFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }
}

impl From<PaymentFlag> for bson::Bson {
    fn from(value: PaymentFlag) -> Self {
        value.as_str().into()
    }
}

impl FromStr for PaymentFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            other => Err(Error::InvalidArgument(format!(
                "unknown payment flag: {other}"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParcelModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub created_by: String,
    pub cost: Decimal,

    pub payment: PaymentFlag,
    pub status: ParcelStatus,

    #[serde(rename = "riderId", default, skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<ObjectId>,

    pub created_at: bson::DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked_at: Option<bson::DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<bson::DateTime>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParcelResponse {
    pub id: ObjectIdString,
    pub created_by: String,
    pub cost: Decimal,
    pub payment: PaymentFlag,
    pub status: ParcelStatus,
    #[serde(rename = "riderId", skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<ObjectIdString>,
    pub created_at: FormattedDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_at: Option<FormattedDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<FormattedDateTime>,
}

impl From<ParcelModel> for ParcelResponse {
    fn from(value: ParcelModel) -> Self {
        Self {
            id: value.id.into(),
            created_by: value.created_by,
            cost: value.cost,
            payment: value.payment,
            status: value.status,
            rider_id: value.rider_id.map(Into::into),
            created_at: value.created_at.into(),
            picked_at: value.picked_at.map(Into::into),
            delivered_at: value.delivered_at.map(Into::into),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ListQuery {
    pub payment: Option<String>,
    pub status: Option<String>,
}

pub fn list_filter(query: &ListQuery) -> Result<bson::Document, Error> {
    let mut filter = bson::doc! {};

    if let Some(payment) = &query.payment {
        filter.insert("payment", payment.parse::<PaymentFlag>()?);
    }
    if let Some(status) = &query.status {
        filter.insert("status", status.parse::<ParcelStatus>()?);
    }

    Ok(filter)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ParcelsResponse {
    pub parcels: Vec<ParcelResponse>,
}

pub async fn index(
    State(parcels): State<ParcelCollection>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ParcelsResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": 1 })
        .build();

    let mut cursor = parcels.find(list_filter(&query)?, options).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(ParcelsResponse { parcels: result }))
}

#[derive(Deserialize, Debug)]
pub struct MyParcelQuery {
    pub email: Option<String>,
}

pub async fn my_parcels(
    principal: Principal,
    State(parcels): State<ParcelCollection>,
    Query(query): Query<MyParcelQuery>,
) -> Result<Json<ParcelsResponse>, Error> {
    let email = query
        .email
        .filter(|it| *it == principal.email)
        .ok_or(Error::Forbidden("email mismatch"))
        .tap_err(|_| tracing::debug!("my-parcel email does not match credential"))?;

    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = parcels
        .find(bson::doc! { "created_by": email }, options)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(ParcelsResponse { parcels: result }))
}

pub async fn show(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<ParcelResponse>, Error> {
    let parcel = parcels
        .get_one_by_id(id)
        .await?
        .ok_or(Error::NotFound("parcel not found"))?;

    Ok(Json(parcel.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateParcelRequest {
    #[validate(email)]
    pub created_by: String,

    pub cost: Decimal,
}

/// Every parcel enters the lifecycle at `pending`/`unpaid`, whatever the
/// caller sends; the lifecycle fields are owned by this store.
pub async fn create(
    State(parcels): State<ParcelCollection>,
    Json(request): Json<CreateParcelRequest>,
) -> Result<Json<ParcelResponse>, Error> {
    request.validate()?;

    if request.cost < Decimal::ZERO {
        return Err(Error::InvalidArgument(
            "cost must not be negative".to_string(),
        ));
    }

    let model = ParcelModel {
        id: ObjectId::new(),
        created_by: request.created_by,
        cost: request.cost,
        payment: PaymentFlag::Unpaid,
        status: ParcelStatus::Pending,
        rider_id: None,
        created_at: current_timestamp().into(),
        picked_at: None,
        delivered_at: None,
    };

    parcels.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteResponse {
    #[serde(rename = "deletedCount")]
    pub deleted_count: u64,
}

pub async fn delete(
    State(parcels): State<ParcelCollection>,
    PathObjectId(id): PathObjectId,
) -> Result<Json<DeleteResponse>, Error> {
    let result = parcels.delete_one_by_id(id).await?;

    Ok(Json(DeleteResponse {
        deleted_count: result.deleted_count,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateStatusRequest {
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectIdString,
    pub status: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateStatusResponse {
    pub updated: bool,
    #[serde(rename = "modifiedCount")]
    pub modified_count: u64,
}

/// Filter fragment pinning the states a transition into `to` may start from.
pub fn transition_filter(to: ParcelStatus) -> Result<bson::Document, Error> {
    let predecessors = to.legal_predecessors();

    if predecessors.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no transition leads to {}",
            to.as_str()
        )));
    }

    let predecessors = predecessors
        .iter()
        .map(|it| bson::Bson::from(*it))
        .collect::<Vec<_>>();

    Ok(bson::doc! {
        "status": { "$in": predecessors }
    })
}

/// `in-transit` stamps `picked_at`; the delivered states stamp `delivered_at`.
pub fn status_update(to: ParcelStatus, now: bson::DateTime) -> bson::Document {
    let mut set = bson::doc! {
        "status": to,
    };

    match to {
        ParcelStatus::InTransit => {
            set.insert("picked_at", now);
        }
        ParcelStatus::Delivered | ParcelStatus::ServiceCenterDelivered => {
            set.insert("delivered_at", now);
        }
        ParcelStatus::Pending | ParcelStatus::RiderAssigned => {}
    }

    bson::doc! { "$set": set }
}

pub async fn update_status(
    State(parcels): State<ParcelCollection>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, Error> {
    let to = request.status.parse::<ParcelStatus>()?;

    let result = parcels
        .update_one_by_id(
            request.parcel_id.into(),
            transition_filter(to)?,
            status_update(to, current_timestamp().into()),
        )
        .await?;

    if result.matched_count == 0 {
        return Err(Error::NotFound("parcel not found or transition not allowed"));
    }

    Ok(Json(UpdateStatusResponse {
        updated: result.modified_count > 0,
        modified_count: result.modified_count,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusCount {
    pub status: ParcelStatus,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CountResponse {
    pub counts: Vec<StatusCount>,
}

pub fn count_pipeline() -> Vec<bson::Document> {
    vec![
        bson::doc! {
            "$group": {
                "_id": "$status",
                "count": { "$sum": 1 },
            }
        },
        bson::doc! {
            "$project": {
                "status": "$_id",
                "count": 1,
                "_id": 0,
            }
        },
    ]
}

pub async fn parcel_count(
    State(parcels): State<ParcelCollection>,
) -> Result<Json<CountResponse>, Error> {
    let mut cursor = parcels.aggregate(count_pipeline(), None).await?;

    let mut counts = vec![];

    while cursor.advance().await? {
        let doc = cursor.deserialize_current()?;
        counts.push(bson::from_document(doc)?);
    }

    Ok(Json(CountResponse { counts }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::error::Error;

    use super::{
        list_filter, status_update, transition_filter, ListQuery, ParcelStatus, PaymentFlag,
    };

    #[test]
    fn test_transition_table() {
        use ParcelStatus::*;

        assert!(ParcelStatus::can_transition(Pending, RiderAssigned));
        assert!(ParcelStatus::can_transition(RiderAssigned, InTransit));
        assert!(ParcelStatus::can_transition(InTransit, Delivered));
        assert!(ParcelStatus::can_transition(InTransit, ServiceCenterDelivered));

        assert!(!ParcelStatus::can_transition(Pending, InTransit));
        assert!(!ParcelStatus::can_transition(Pending, Delivered));
        assert!(!ParcelStatus::can_transition(RiderAssigned, Delivered));
        assert!(!ParcelStatus::can_transition(Delivered, InTransit));
        assert!(!ParcelStatus::can_transition(Delivered, ServiceCenterDelivered));
        assert!(!ParcelStatus::can_transition(RiderAssigned, Pending));
    }

    #[test]
    fn test_nothing_transitions_into_pending() {
        let error = transition_filter(ParcelStatus::Pending).unwrap_err();
        assert_matches!(error, Error::InvalidArgument(..));
    }

    #[test]
    fn test_transition_filter_pins_predecessors() {
        let filter = transition_filter(ParcelStatus::InTransit).unwrap();
        let allowed = filter
            .get_document("status")
            .unwrap()
            .get_array("$in")
            .unwrap();

        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].as_str().unwrap(), "rider-assigned");
    }

    #[test]
    fn test_in_transit_stamps_picked_at() {
        let update = status_update(ParcelStatus::InTransit, bson::DateTime::now());
        let set = update.get_document("$set").unwrap();

        assert_eq!(set.get_str("status").unwrap(), "in-transit");
        assert!(set.contains_key("picked_at"));
        assert!(!set.contains_key("delivered_at"));
    }

    #[test]
    fn test_delivered_stamps_delivered_at() {
        for status in [ParcelStatus::Delivered, ParcelStatus::ServiceCenterDelivered] {
            let update = status_update(status, bson::DateTime::now());
            let set = update.get_document("$set").unwrap();

            assert!(set.contains_key("delivered_at"));
            assert!(!set.contains_key("picked_at"));
        }
    }

    #[test]
    fn test_status_wire_spelling() {
        for status in [
            ParcelStatus::Pending,
            ParcelStatus::RiderAssigned,
            ParcelStatus::InTransit,
            ParcelStatus::Delivered,
            ParcelStatus::ServiceCenterDelivered,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));

            let back: ParcelStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);

            assert_eq!(status.as_str().parse::<ParcelStatus>().unwrap(), status);
        }

        // "delevered" is a misspelling, not a status
        assert_eq!(
            serde_json::to_string(&ParcelStatus::Delivered).unwrap(),
            "\"delivered\""
        );
        assert_matches!(
            "delevered".parse::<ParcelStatus>(),
            Err(Error::InvalidArgument(..))
        );
    }

    #[test]
    fn test_list_filter() {
        let filter = list_filter(&ListQuery {
            payment: Some("unpaid".to_string()),
            status: Some("pending".to_string()),
        })
        .unwrap();
        assert_eq!(filter.get_str("payment").unwrap(), "unpaid");
        assert_eq!(filter.get_str("status").unwrap(), "pending");

        let empty = list_filter(&ListQuery {
            payment: None,
            status: None,
        })
        .unwrap();
        assert!(empty.is_empty());

        let error = list_filter(&ListQuery {
            payment: Some("refunded".to_string()),
            status: None,
        })
        .unwrap_err();
        assert_matches!(error, Error::InvalidArgument(..));
    }

    #[test]
    fn test_payment_flag_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&PaymentFlag::Unpaid).unwrap(),
            "\"unpaid\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentFlag::Paid).unwrap(),
            "\"paid\""
        );
    }
}
