pub mod bot;
pub mod config;
pub mod cookies;
pub mod encoder;
pub mod error;
pub mod hash;
pub mod models;
pub mod relay;
pub mod session;
pub mod tracker;
pub mod transport;

pub use error::{TrackerError, TrackerResult};
pub use tracker::{Delivery, TrackOutcome, Tracker};
