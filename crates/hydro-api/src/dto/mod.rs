//! Data Transfer Objects (DTOs) for API requests and responses

pub mod billing;
pub mod common;
pub mod payment;

pub use billing::*;
pub use common::*;
pub use payment::*;
