//! Plain JSON management surface over the registries and the notification
//! service.

pub mod routes;

pub use routes::{AppState, build_router};
