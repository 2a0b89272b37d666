use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    identity::Principal,
    mongo_ext::{transaction_options, Collection},
    payment_intent::{cost_to_cents, StripeClient},
    util::{current_timestamp, FormattedDateTime, ObjectIdString},
};

use super::parcel::{ParcelCollection, PaymentFlag};

#[derive(Clone)]
pub struct PaymentCollection(pub Collection<PaymentModel>);

impl std::ops::Deref for PaymentCollection {
    type Target = Collection<PaymentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Append-only payment record; exactly one per successful confirmation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectId,

    pub email: String,
    pub amount: Decimal,

    #[serde(rename = "paymentMethod")]
    pub payment_method: String,

    #[serde(rename = "transactionId")]
    pub transaction_id: String,

    pub paid_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentResponse {
    pub id: ObjectIdString,
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectIdString,
    pub email: String,
    pub amount: Decimal,
    #[serde(rename = "paymentMethod")]
    pub payment_method: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
    pub paid_at: FormattedDateTime,
}

impl From<PaymentModel> for PaymentResponse {
    fn from(value: PaymentModel) -> Self {
        Self {
            id: value.id.into(),
            parcel_id: value.parcel_id.into(),
            email: value.email,
            amount: value.amount,
            payment_method: value.payment_method,
            transaction_id: value.transaction_id,
            paid_at: value.paid_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateIntentRequest {
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectIdString,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateIntentResponse {
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

pub async fn create_intent(
    State(parcels): State<ParcelCollection>,
    State(stripe): State<StripeClient>,
    Json(request): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, Error> {
    let parcel = parcels
        .get_one_by_id(request.parcel_id.into())
        .await?
        .ok_or(Error::NotFound("parcel not found"))?;

    let intent = stripe.create_intent(cost_to_cents(parcel.cost)?).await?;

    Ok(Json(CreateIntentResponse {
        client_secret: intent.client_secret,
    }))
}

#[derive(Validate, Serialize, Deserialize, Debug)]
pub struct RecordPaymentRequest {
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectIdString,

    #[validate(email)]
    pub email: String,

    pub amount: Decimal,

    #[serde(rename = "paymentMethod", default)]
    pub payment_method: String,

    #[serde(rename = "transactionId", default)]
    pub transaction_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecordPaymentResponse {
    pub message: String,
    pub payment: PaymentResponse,
}

pub fn unpaid_filter() -> bson::Document {
    bson::doc! {
        "payment": PaymentFlag::Unpaid,
    }
}

/// Confirm-payment: flip the parcel's payment flag (guarded on `unpaid`) and
/// append the payment record, both in one session transaction. A parcel that
/// is already paid matches nothing, so the second confirmation fails with
/// `NotFound` and no second record is written.
pub async fn record(
    State(mongo): State<mongodb::Client>,
    State(parcels): State<ParcelCollection>,
    State(payments): State<PaymentCollection>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<RecordPaymentResponse>), Error> {
    request.validate()?;

    if request.amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(
            "amount must be positive".to_string(),
        ));
    }

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    let mut filter = bson::doc! { "_id": ObjectId::from(request.parcel_id) };
    filter.extend(unpaid_filter());

    let flipped = parcels
        .update_one_with_session(
            filter,
            bson::doc! {
                "$set": { "payment": PaymentFlag::Paid }
            },
            None,
            &mut session,
        )
        .await?;

    if flipped.modified_count == 0 {
        // dropping the session aborts the transaction
        return Err(Error::NotFound("parcel not found or already paid"));
    }

    let model = PaymentModel {
        id: ObjectId::new(),
        parcel_id: request.parcel_id.into(),
        email: request.email,
        amount: request.amount,
        payment_method: request.payment_method,
        transaction_id: request.transaction_id,
        paid_at: current_timestamp().into(),
    };

    payments
        .insert_one_with_session(&model, None, &mut session)
        .await?;

    session.commit_transaction().await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordPaymentResponse {
            message: "payment recorded".to_string(),
            payment: model.into(),
        }),
    ))
}

#[derive(Deserialize, Debug)]
pub struct PaymentsQuery {
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PaymentsResponse {
    pub payments: Vec<PaymentResponse>,
}

pub fn history_filter(email: Option<&str>) -> bson::Document {
    match email {
        Some(email) => bson::doc! { "email": email },
        None => bson::doc! {},
    }
}

pub async fn index(
    _principal: Principal,
    State(payments): State<PaymentCollection>,
    Query(query): Query<PaymentsQuery>,
) -> Result<Json<PaymentsResponse>, Error> {
    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "paid_at": -1 })
        .build();

    let mut cursor = payments
        .find(history_filter(query.email.as_deref()), options)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(PaymentsResponse { payments: result }))
}

#[cfg(test)]
mod tests {
    use super::{history_filter, unpaid_filter};

    #[test]
    fn test_confirmation_is_guarded_on_unpaid() {
        let filter = unpaid_filter();
        assert_eq!(filter.get_str("payment").unwrap(), "unpaid");
    }

    #[test]
    fn test_history_filter() {
        assert!(history_filter(None).is_empty());
        assert_eq!(
            history_filter(Some("a@x.com")).get_str("email").unwrap(),
            "a@x.com"
        );
    }
}
