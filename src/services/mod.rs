//! # Services Module
//!
//! External integrations. The only one is the publish/subscribe broker.

mod pubsub;
pub use pubsub::*;
