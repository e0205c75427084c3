//! Property tests for topic namespacing and client identity

use proptest::prelude::*;
use sensor_link::config::{Settings, TopicPurpose, TopicSet};
use std::collections::HashSet;

proptest! {
    #[test]
    fn prop_every_topic_starts_with_prefix(prefix in "[A-Za-z0-9_-]{1,24}") {
        let topics = TopicSet::from_prefix(&prefix);
        let expected_start = format!("{prefix}/");

        for (_, topic) in topics.iter() {
            prop_assert!(topic.starts_with(&expected_start));
        }
    }

    #[test]
    fn prop_distinct_purposes_yield_distinct_topics(prefix in "[A-Za-z0-9_/-]{1,24}") {
        let topics = TopicSet::from_prefix(&prefix);

        let unique: HashSet<&str> = TopicPurpose::ALL
            .iter()
            .map(|purpose| topics.get(*purpose))
            .collect();

        prop_assert_eq!(unique.len(), TopicPurpose::ALL.len());
    }

    #[test]
    fn prop_resolved_config_uses_prefix(prefix in "[A-Za-z0-9]{1,16}") {
        let mut settings = Settings::default();
        settings.session.namespace_prefix = prefix.clone();

        let config = settings.resolve().unwrap();

        let expected_client_prefix = format!("web_{}_", prefix);
        prop_assert!(config.client_id.starts_with(&expected_client_prefix));
        for (_, topic) in config.topics.iter() {
            prop_assert!(topic.starts_with(&prefix));
        }
    }
}

#[test]
fn test_fixed_prefix_scenario() {
    let topics = TopicSet::from_prefix("X1");

    assert_eq!(topics.get(TopicPurpose::Temperature), "X1/suhu");
    assert_eq!(topics.get(TopicPurpose::Humidity), "X1/kelembaban");
    assert_eq!(topics.get(TopicPurpose::Led), "X1/led");
    assert_eq!(topics.get(TopicPurpose::Status), "X1/status");
}

#[test]
fn test_generated_client_ids_differ() {
    let ids: HashSet<String> = (0..50)
        .map(|_| Settings::default().resolve().unwrap().client_id)
        .collect();

    assert_eq!(ids.len(), 50);
}
