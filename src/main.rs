use std::net::SocketAddr;

use axum::{routing, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zapshift::{api, app::AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "zapshift=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_state = AppState::new_from_env().await.unwrap();

    let app = Router::new()
        .route("/", routing::get(liveness))
        .route("/users", routing::post(api::account::create_or_touch))
        .route("/users/search", routing::get(api::account::search))
        .route("/users/admin/:id", routing::patch(api::account::make_admin))
        .route(
            "/users/remove-admin/:id",
            routing::patch(api::account::remove_admin),
        )
        .route("/users/role", routing::get(api::account::role))
        .route(
            "/parcels",
            routing::get(api::parcel::index).post(api::parcel::create),
        )
        .route(
            "/parcels/parcel-count",
            routing::get(api::parcel::parcel_count),
        )
        .route(
            "/parcels/update-status",
            routing::patch(api::parcel::update_status),
        )
        .route(
            "/parcels/:id",
            routing::get(api::parcel::show).delete(api::parcel::delete),
        )
        .route("/my-parcel", routing::get(api::parcel::my_parcels))
        .route(
            "/create-payment-intent",
            routing::post(api::payment::create_intent),
        )
        .route(
            "/payments",
            routing::post(api::payment::record).get(api::payment::index),
        )
        .route("/trackings", routing::post(api::tracking::append))
        .route("/trackings/:trackingId", routing::get(api::tracking::read))
        .route(
            "/riders",
            routing::post(api::rider::register).get(api::rider::index),
        )
        .route("/rider", routing::get(api::rider::show_by_email))
        .route("/assign-rider", routing::patch(api::rider::assign))
        .route(
            "/rider/pending-delivery/:riderId",
            routing::get(api::rider::pending_delivery),
        )
        .route(
            "/rider/completed-deliveries/:riderId",
            routing::get(api::rider::completed_deliveries),
        )
        .route(
            "/riders/update-status",
            routing::patch(api::rider::update_status),
        )
        .route(
            "/cashouts",
            routing::post(api::cashout::request).get(api::cashout::index),
        )
        .route("/cashouts/:id", routing::patch(api::cashout::resolve))
        .route("/pending-riders", routing::get(api::rider::pending_riders))
        .route("/active-riders", routing::get(api::rider::active_riders))
        .with_state(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|it| it.parse().ok())
        .unwrap_or(5000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}

async fn liveness() -> &'static str {
    "Zap shift server is running"
}
