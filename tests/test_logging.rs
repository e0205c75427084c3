//! Tests for logging configuration and format parsing

use sensor_link::observability::logging::{default_filter_directives, parse_level, LogFormat};
use sensor_link::observability::{init_logging, session_span};
use tracing::Level;

#[test]
fn test_log_format_parse_known_formats() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_log_level_defaults_to_info() {
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level("Warn"), Level::WARN);
}

#[test]
fn test_filter_directives_cover_transport_dependencies() {
    let directives = default_filter_directives(Level::TRACE);

    assert!(directives.starts_with("trace"));
    assert!(directives.contains("rumqttc=warn"));
    assert!(directives.contains("tungstenite=warn"));
}

#[test]
fn test_init_logging_only_installs_once() {
    let first = init_logging(Level::DEBUG, LogFormat::Compact, false);
    let second = init_logging(Level::DEBUG, LogFormat::Json, true);

    assert!(first);
    assert!(!second);

    let _span = session_span!(client_id = "web_X1_test0001").entered();
    tracing::info!("logging initialised");
}
