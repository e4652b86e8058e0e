//! # Rowcast Gateway
//!
//! HTTP control surface: trigger a dispatch pass over `POST /send-now`
//! with a static bearer token.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start_server};
