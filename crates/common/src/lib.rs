//! Small utilities shared by the switchboard crates: the error context
//! helper and time formatting.

pub mod error;
pub mod time;

pub use error::FromMessage;
