//! Google Cloud Pub/Sub endpoints and naming.

pub const DEFAULT_PUBSUB_API_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Envelope keys written by the producer.
pub const ENVELOPE_TOPIC_NAME_FIELD: &str = "topicName";
pub const ENVELOPE_CREATED_AT_FIELD: &str = "createdAt";

/// Shape of generated suffixes: `<10 chars>-<4 chars>`.
pub const GENERATED_SUFFIX_HEAD_LEN: usize = 10;
pub const GENERATED_SUFFIX_TAIL_LEN: usize = 4;
