use axum::extract::FromRef;

use crate::{
    api::{
        account::AccountCollection, cashout::CashoutCollection, parcel::ParcelCollection,
        payment::PaymentCollection, rider::RiderCollection, tracking::TrackingCollection,
    },
    identity::{FirebaseVerifier, IdentityState, GOOGLE_JWK_URL},
    payment_intent::{StripeClient, STRIPE_API_URL},
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub mongo_client: mongodb::Client,

    pub account_collection: AccountCollection,
    pub parcel_collection: ParcelCollection,
    pub payment_collection: PaymentCollection,
    pub rider_collection: RiderCollection,
    pub cashout_collection: CashoutCollection,
    pub tracking_collection: TrackingCollection,

    pub identity: IdentityState,
    pub stripe: StripeClient,
}

impl AppState {
    pub async fn new(
        mongo_url: &str,
        database_name: &str,
        identity: IdentityState,
        stripe: StripeClient,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mongo_client_opt = mongodb::options::ClientOptions::parse(mongo_url).await?;
        let mongo_client = mongodb::Client::with_options(mongo_client_opt)?;

        let db = mongo_client.database(database_name);
        Ok(Self {
            mongo_client,

            account_collection: AccountCollection(db.collection("users").into()),
            parcel_collection: ParcelCollection(db.collection("parcels").into()),
            payment_collection: PaymentCollection(db.collection("payments").into()),
            rider_collection: RiderCollection(db.collection("riders").into()),
            cashout_collection: CashoutCollection(db.collection("cashouts").into()),
            tracking_collection: TrackingCollection(db.collection("trackings").into()),

            identity,
            stripe,
        })
    }

    pub async fn new_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mongo_url = std::env::var("MONGODB_URI")
            .expect("Cannot retreive MONGODB_URI from environment variable.");
        let project_id = std::env::var("FIREBASE_PROJECT_ID")
            .expect("Cannot retreive FIREBASE_PROJECT_ID from environment variable.");
        let secret_key = std::env::var("PAYMENT_SECRET_KEY")
            .expect("Cannot retreive PAYMENT_SECRET_KEY from environment variable.");

        let jwk_url =
            std::env::var("FIREBASE_CERTS_URL").unwrap_or_else(|_| GOOGLE_JWK_URL.to_string());
        let stripe_url =
            std::env::var("STRIPE_API_URL").unwrap_or_else(|_| STRIPE_API_URL.to_string());

        let http = reqwest::Client::new();

        let identity = IdentityState::new(FirebaseVerifier::new(
            http.clone(),
            project_id,
            jwk_url,
        ));
        let stripe = StripeClient::new(http, secret_key, stripe_url);

        Self::new(&mongo_url, "zap-shift", identity, stripe).await
    }
}
