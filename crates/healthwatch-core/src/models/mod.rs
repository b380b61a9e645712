//! Data models for Healthwatch

mod alert;
mod snapshot;

pub use alert::*;
pub use snapshot::*;
