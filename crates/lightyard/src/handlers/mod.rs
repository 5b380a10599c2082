//! http handlers for lightyard api endpoints.

mod error;
mod health;
pub mod pairing;
pub mod scheduler;
pub mod webhooks;

pub use error::{ApiError, ResultExt};
pub use health::health;
pub use pairing::PairDeviceMessage;
