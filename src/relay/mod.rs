//! HTTP relay
//!
//! Lets a browser-facing page report hits through this service: each request
//! is tracked on behalf of the caller and the updated tracking cookies are
//! returned as `Set-Cookie` headers.

pub mod handlers;
pub mod ip;
pub mod middleware;
pub mod routes;

pub use handlers::{RelayState, OUTCOME_HEADER};
pub use routes::create_relay_router;
