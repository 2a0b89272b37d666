pub mod api;
pub mod app;
pub mod error;
pub mod identity;
pub mod mongo_ext;
pub mod payment_intent;
pub mod util;
