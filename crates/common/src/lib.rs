//! Common utilities and types shared across the VIP responder components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
