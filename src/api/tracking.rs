use axum::{
    extract::{Path, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{current_timestamp, FormattedDateTime, ObjectIdString},
};

#[derive(Clone)]
pub struct TrackingCollection(pub Collection<TrackingModel>);

impl std::ops::Deref for TrackingCollection {
    type Target = Collection<TrackingModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One entry in the append-only audit trail for a tracking id. `status` is
/// free-form here; the log does not check it against the parcel vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackingModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub tracking_id: String,
    pub status: String,
    pub updated_by: String,
    pub details: String,

    #[serde(rename = "updatedAt")]
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackingEventResponse {
    pub id: ObjectIdString,
    pub tracking_id: String,
    pub status: String,
    pub updated_by: String,
    pub details: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: FormattedDateTime,
}

impl From<TrackingModel> for TrackingEventResponse {
    fn from(value: TrackingModel) -> Self {
        Self {
            id: value.id.into(),
            tracking_id: value.tracking_id,
            status: value.status,
            updated_by: value.updated_by,
            details: value.details,
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct AppendTrackingRequest {
    #[validate(length(min = 1))]
    pub tracking_id: String,

    #[validate(length(min = 1))]
    pub status: String,

    #[validate(length(min = 1))]
    pub updated_by: String,

    #[validate(length(min = 1))]
    pub details: String,
}

pub async fn append(
    State(trackings): State<TrackingCollection>,
    Json(request): Json<AppendTrackingRequest>,
) -> Result<Json<TrackingEventResponse>, Error> {
    request.validate()?;

    let model = TrackingModel {
        id: ObjectId::new(),
        tracking_id: request.tracking_id,
        status: request.status,
        updated_by: request.updated_by,
        details: request.details,
        updated_at: current_timestamp().into(),
    };

    trackings.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TrackingEventsResponse {
    pub events: Vec<TrackingEventResponse>,
}

pub fn read_options() -> mongodb::options::FindOptions {
    mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "updatedAt": 1 })
        .build()
}

pub async fn read(
    State(trackings): State<TrackingCollection>,
    Path(tracking_id): Path<String>,
) -> Result<Json<TrackingEventsResponse>, Error> {
    let mut cursor = trackings
        .find(bson::doc! { "tracking_id": tracking_id }, read_options())
        .await?;

    let mut events = vec![];

    while cursor.advance().await? {
        events.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(TrackingEventsResponse { events }))
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::{read_options, AppendTrackingRequest};

    #[test]
    fn test_append_requires_all_fields() {
        let complete = AppendTrackingRequest {
            tracking_id: "TRK-1".to_string(),
            status: "in-transit".to_string(),
            updated_by: "rider@x.com".to_string(),
            details: "left the warehouse".to_string(),
        };
        assert!(complete.validate().is_ok());

        for blank in ["tracking_id", "status", "updated_by", "details"] {
            let mut request = complete.clone();
            match blank {
                "tracking_id" => request.tracking_id.clear(),
                "status" => request.status.clear(),
                "updated_by" => request.updated_by.clear(),
                _ => request.details.clear(),
            }
            assert!(request.validate().is_err(), "{blank} should be required");
        }
    }

    #[test]
    fn test_read_is_oldest_first() {
        let sort = read_options().sort.unwrap();
        assert_eq!(sort.get_i32("updatedAt").unwrap(), 1);
    }
}
