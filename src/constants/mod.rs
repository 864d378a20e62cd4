//! This module contains all the constant values used in the system
mod worker;
pub use worker::*;

mod retry;
pub use retry::*;

mod pubsub;
pub use pubsub::*;
