//! Shared domain types, configuration and errors for the attribution engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, AttributionConfig};
pub use error::{AttributionError, AttributionOutcome};
pub use types::{Booking, BookingStatus, Journey, Touchpoint, TouchpointType};
