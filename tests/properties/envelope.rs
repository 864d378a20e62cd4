//! Property-based tests for the published message body and the data a
//! worker hands to its handler.
//!
//!   Refer to `src/jobs/job.rs` for more details.
use std::collections::HashMap;

use proptest::{prelude::*, test_runner::Config};
use pubsub_jobs::{
    constants::{ENVELOPE_CREATED_AT_FIELD, ENVELOPE_TOPIC_NAME_FIELD, JOB_ID_FIELD},
    jobs::{parse_message_body, Envelope, Job, JobPayload, ReceivedJob},
};
use serde_json::Value;

fn payload_strategy() -> impl Strategy<Value = JobPayload> {
    prop::collection::hash_map(
        prop_oneof![
            "[a-zA-Z]{1,12}",
            Just(ENVELOPE_TOPIC_NAME_FIELD.to_string()),
            Just(ENVELOPE_CREATED_AT_FIELD.to_string()),
        ],
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,20}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ],
        0..8,
    )
    .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #![proptest_config(Config {
        cases: 200, ..Config::default()
    })]

    #[test]
    fn prop_envelope_fields_override_payload(
        payload in payload_strategy(),
        topic in "[a-z][a-z0-9-]{0,20}",
    ) {
        let job = Job::new("send-email", payload.clone());
        let body = Envelope::new(&job, &topic).to_bytes().unwrap();
        let parsed = parse_message_body(&body).unwrap();

        prop_assert_eq!(
            parsed.get(ENVELOPE_TOPIC_NAME_FIELD).and_then(Value::as_str),
            Some(topic.as_str())
        );
        let created_at = parsed
            .get(ENVELOPE_CREATED_AT_FIELD)
            .and_then(Value::as_str)
            .unwrap();
        prop_assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
        prop_assert!(created_at.ends_with('Z'));

        for (key, value) in &payload {
            if key != ENVELOPE_TOPIC_NAME_FIELD && key != ENVELOPE_CREATED_AT_FIELD {
                prop_assert_eq!(parsed.get(key), Some(value));
            }
        }
    }

    #[test]
    fn prop_received_data_prefers_body_over_attributes(
        body in payload_strategy(),
        attributes in prop::collection::hash_map("[a-zA-Z]{1,12}", "[a-z]{0,8}", 0..6),
        message_id in "[0-9]{1,12}",
    ) {
        let attributes: HashMap<String, String> = attributes;
        let job = ReceivedJob::new("send-email", &message_id, &attributes, body.clone());

        prop_assert_eq!(job.get(JOB_ID_FIELD).and_then(Value::as_str), Some(message_id.as_str()));
        for (key, value) in &attributes {
            if key == JOB_ID_FIELD {
                continue;
            }
            match body.get(key) {
                Some(from_body) => prop_assert_eq!(job.get(key), Some(from_body)),
                None => prop_assert_eq!(job.get(key), Some(&Value::String(value.clone()))),
            }
        }
    }
}
