//! # Models Module
//!
//! Core data structures shared by the configuration layer and the broker client.

mod secret_string;
pub use secret_string::*;

mod credentials;
pub use credentials::*;
