//! Configuration resolver for the managed broker session
//!
//! Raw [`Settings`] come from a TOML file, from `SENSOR_LINK_*` environment variables, or from
//! code. [`Settings::resolve`] turns them into an immutable [`SessionConfig`]: the endpoint
//! URL, the per-purpose topic names and a client identifier (generated when absent).

use crate::session::ReconnectConfig;
use crate::transport::{qos_from_level, qos_level};
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Fixed WebSocket path the broker serves MQTT on
pub const MQTT_PATH: &str = "/mqtt";

/// Prefix shared by all environment overrides
pub const ENV_PREFIX: &str = "SENSOR_LINK_";

/// Raw settings as read from file, environment or code
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSection,
    pub session: SessionSection,
    pub reconnect: ReconnectSection,
}

/// Broker endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// Broker hostname
    pub host: String,
    /// WebSocket port (8083 = ws, 8084 = wss on the public EMQX broker)
    pub port: u16,
    /// Use `wss://` instead of `ws://`
    pub use_secure_transport: bool,
    /// Optional username, omitted when empty
    pub username: String,
    /// Optional password, omitted when empty
    pub password: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_string(),
            port: 8084,
            use_secure_transport: true,
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Session identity, topics and timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    /// Explicit client identifier; generated when empty
    pub client_id: String,
    /// Namespace prefix that deconflicts topic names across deployments
    pub namespace_prefix: String,
    /// Default quality of service (0, 1 or 2)
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Ask the broker to discard prior session state on connect
    pub clean_session: bool,
    /// Restore tracked subscriptions after an automatic reconnect
    pub resubscribe_on_reconnect: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            namespace_prefix: String::new(),
            qos: 0,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            clean_session: true,
            resubscribe_on_reconnect: true,
        }
    }
}

/// Automatic reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    pub enabled: bool,
    /// Fixed delay between a connection loss and the next attempt
    pub delay_ms: u64,
    /// Cap on consecutive attempts (None = retry until disconnect)
    pub max_attempts: Option<u32>,
    /// Optional escalating delays; `delay_ms` is sustained once exhausted
    pub backoff_pattern_ms: Vec<u64>,
    /// Schedule another attempt when an automatic attempt fails
    pub retry_failed_attempts: bool,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 5000,
            max_attempts: None,
            backoff_pattern_ms: Vec::new(),
            retry_failed_attempts: true,
        }
    }
}

/// Configuration loading and resolution errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvOverride { name: String, value: String },
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Settings {
    /// Load settings from a TOML file; missing keys take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Apply `SENSOR_LINK_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using an arbitrary lookup, keyed by full variable name
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            let name = format!("{ENV_PREFIX}{key}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, value)) = get("HOST") {
            self.broker.host = value;
        }
        if let Some((name, value)) = get("PORT") {
            self.broker.port = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = get("SECURE") {
            self.broker.use_secure_transport = parse_bool(&name, &value)?;
        }
        if let Some((_, value)) = get("USERNAME") {
            self.broker.username = value;
        }
        if let Some((_, value)) = get("PASSWORD") {
            self.broker.password = value;
        }
        if let Some((_, value)) = get("CLIENT_ID") {
            self.session.client_id = value;
        }
        if let Some((_, value)) = get("PREFIX") {
            self.session.namespace_prefix = value;
        }
        if let Some((name, value)) = get("QOS") {
            self.session.qos = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = get("KEEP_ALIVE_SECS") {
            self.session.keep_alive_secs = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = get("CONNECT_TIMEOUT_SECS") {
            self.session.connect_timeout_secs = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = get("CLEAN_SESSION") {
            self.session.clean_session = parse_bool(&name, &value)?;
        }
        if let Some((name, value)) = get("AUTO_RECONNECT") {
            self.reconnect.enabled = parse_bool(&name, &value)?;
        }
        if let Some((name, value)) = get("RECONNECT_DELAY_MS") {
            self.reconnect.delay_ms = parse_number(&name, &value)?;
        }

        Ok(())
    }

    /// Resolve raw settings into an immutable session configuration
    ///
    /// Generates a client identifier when none was given. An empty namespace prefix is
    /// accepted but logged, since topics may then collide with other deployments.
    pub fn resolve(self) -> Result<SessionConfig, ConfigError> {
        let Settings {
            broker,
            session,
            reconnect,
        } = self;

        if broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker host must not be empty".to_string(),
            ));
        }
        if broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be greater than 0".to_string(),
            ));
        }
        let qos = qos_from_level(session.qos).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("qos must be 0, 1 or 2, got {}", session.qos))
        })?;
        if session.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if session.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let reconnect_config = ReconnectConfig {
            delay_ms: reconnect.delay_ms,
            max_attempts: reconnect.max_attempts,
            backoff_pattern: reconnect.backoff_pattern_ms,
            retry_failed_attempts: reconnect.retry_failed_attempts,
        };
        if reconnect.enabled {
            reconnect_config
                .validate()
                .map_err(ConfigError::InvalidConfig)?;
        }

        let endpoint = Endpoint {
            secure: broker.use_secure_transport,
            host: broker.host.trim().to_string(),
            port: broker.port,
            path: MQTT_PATH.to_string(),
        };
        endpoint.validate()?;

        let prefix = session.namespace_prefix;
        if prefix.is_empty() {
            warn!("Namespace prefix is empty; topic names may collide with other deployments");
        }

        let client_id = if session.client_id.is_empty() {
            generate_client_id(&prefix)
        } else {
            session.client_id
        };

        let credentials = match (broker.username.is_empty(), broker.password.is_empty()) {
            (false, password_empty) => Some(Credentials {
                username: broker.username,
                password: (!password_empty).then_some(broker.password),
            }),
            (true, false) => {
                warn!("Broker password configured without a username; credentials omitted");
                None
            }
            (true, true) => None,
        };

        Ok(SessionConfig {
            endpoint,
            client_id,
            topics: TopicSet::from_prefix(&prefix),
            namespace_prefix: prefix,
            qos,
            keep_alive: Duration::from_secs(session.keep_alive_secs),
            connect_timeout: Duration::from_secs(session.connect_timeout_secs),
            clean_session: session.clean_session,
            auto_reconnect: reconnect.enabled,
            reconnect: reconnect_config,
            resubscribe_on_reconnect: session.resubscribe_on_reconnect,
            credentials,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Client identifier with 32 bits of randomness: `web_{prefix}_{8 hex chars}`
fn generate_client_id(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("web_{prefix}_{}", &random[..8])
}

/// Fully resolved, immutable session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub client_id: String,
    pub namespace_prefix: String,
    pub topics: TopicSet,
    /// Default QoS for publish and subscribe
    pub qos: QoS,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub clean_session: bool,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectConfig,
    pub resubscribe_on_reconnect: bool,
    pub credentials: Option<Credentials>,
}

impl SessionConfig {
    /// Log the resolved configuration for diagnostics
    pub fn log_summary(&self) {
        info!(
            broker = %self.endpoint.host,
            port = self.endpoint.port,
            protocol = if self.endpoint.secure { "WSS (secure)" } else { "WS (plain)" },
            client_id = %self.client_id,
            qos = qos_level(self.qos),
            "Session configuration loaded"
        );
        if self.auto_reconnect {
            info!(
                delay_ms = self.reconnect.delay_ms,
                max_attempts = ?self.reconnect.max_attempts,
                max_total_wait_ms = ?self.reconnect.calculate_max_total_time(),
                "Automatic reconnection enabled"
            );
        }
        for (purpose, topic) in self.topics.iter() {
            info!(purpose = %purpose, topic = %topic, "Topic resolved");
        }
    }
}

/// Broker endpoint: scheme from the security flag, host, port and fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full WebSocket URL, e.g. `wss://broker.emqx.io:8084/mqtt`
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, self.path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url();
        let parsed = Url::parse(&url).map_err(|_| ConfigError::InvalidEndpoint(url.clone()))?;
        if parsed.host_str().is_none() {
            return Err(ConfigError::InvalidEndpoint(url));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Optional broker credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Logical purpose of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicPurpose {
    /// Temperature readings (telemetry A)
    Temperature,
    /// Humidity readings (telemetry B)
    Humidity,
    /// LED actuator commands
    Led,
    /// Device status
    Status,
}

impl TopicPurpose {
    pub const ALL: [TopicPurpose; 4] = [
        TopicPurpose::Temperature,
        TopicPurpose::Humidity,
        TopicPurpose::Led,
        TopicPurpose::Status,
    ];

    /// Fixed suffix appended to the namespace prefix
    pub fn suffix(&self) -> &'static str {
        match self {
            TopicPurpose::Temperature => "suhu",
            TopicPurpose::Humidity => "kelembaban",
            TopicPurpose::Led => "led",
            TopicPurpose::Status => "status",
        }
    }
}

impl fmt::Display for TopicPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopicPurpose::Temperature => "temperature",
            TopicPurpose::Humidity => "humidity",
            TopicPurpose::Led => "led",
            TopicPurpose::Status => "status",
        };
        f.write_str(name)
    }
}

/// Topic names for every [`TopicPurpose`], derived from one namespace prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    temperature: String,
    humidity: String,
    led: String,
    status: String,
}

impl TopicSet {
    /// Build `{prefix}/{suffix}` for each purpose
    pub fn from_prefix(prefix: &str) -> Self {
        let build = |purpose: TopicPurpose| format!("{prefix}/{}", purpose.suffix());
        Self {
            temperature: build(TopicPurpose::Temperature),
            humidity: build(TopicPurpose::Humidity),
            led: build(TopicPurpose::Led),
            status: build(TopicPurpose::Status),
        }
    }

    pub fn get(&self, purpose: TopicPurpose) -> &str {
        match purpose {
            TopicPurpose::Temperature => &self.temperature,
            TopicPurpose::Humidity => &self.humidity,
            TopicPurpose::Led => &self.led,
            TopicPurpose::Status => &self.status,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (TopicPurpose, &str)> + '_ {
        TopicPurpose::ALL
            .into_iter()
            .map(move |purpose| (purpose, self.get(purpose)))
    }

    /// Telemetry topics a dashboard subscribes to
    pub fn telemetry(&self) -> [&str; 3] {
        [&self.temperature, &self.humidity, &self.status]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_prefix(prefix: &str) -> Settings {
        Settings {
            session: SessionSection {
                namespace_prefix: prefix.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_settings_resolve() {
        let config = settings_with_prefix("Ryan24").resolve().unwrap();

        assert_eq!(config.endpoint.url(), "wss://broker.emqx.io:8084/mqtt");
        assert_eq!(config.qos, QoS::AtMostOnce);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.clean_session);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect.delay_ms, 5000);
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_plain_scheme_when_not_secure() {
        let mut settings = settings_with_prefix("X1");
        settings.broker.use_secure_transport = false;
        settings.broker.port = 8083;

        let config = settings.resolve().unwrap();
        assert_eq!(config.endpoint.scheme(), "ws");
        assert_eq!(config.endpoint.to_string(), "ws://broker.emqx.io:8083/mqtt");
    }

    #[test]
    fn test_topics_from_prefix() {
        let topics = TopicSet::from_prefix("X1");
        assert_eq!(topics.get(TopicPurpose::Temperature), "X1/suhu");
        assert_eq!(topics.get(TopicPurpose::Humidity), "X1/kelembaban");
        assert_eq!(topics.get(TopicPurpose::Led), "X1/led");
        assert_eq!(topics.get(TopicPurpose::Status), "X1/status");
        assert_eq!(topics.iter().count(), 4);
        assert_eq!(topics.telemetry(), ["X1/suhu", "X1/kelembaban", "X1/status"]);
    }

    #[test]
    fn test_empty_prefix_is_accepted() {
        let config = settings_with_prefix("").resolve().unwrap();
        assert_eq!(config.topics.get(TopicPurpose::Led), "/led");
        assert!(config.client_id.starts_with("web__"));
    }

    #[test]
    fn test_generated_client_id_format() {
        let config = settings_with_prefix("X1").resolve().unwrap();
        let suffix = config.client_id.strip_prefix("web_X1_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_explicit_client_id_is_kept() {
        let mut settings = settings_with_prefix("X1");
        settings.session.client_id = "dashboard-1".to_string();
        assert_eq!(settings.resolve().unwrap().client_id, "dashboard-1");
    }

    #[test]
    fn test_credentials_omitted_when_empty() {
        let mut settings = settings_with_prefix("X1");
        settings.broker.username = "user".to_string();
        let config = settings.clone().resolve().unwrap();
        assert_eq!(
            config.credentials,
            Some(Credentials {
                username: "user".to_string(),
                password: None,
            })
        );

        settings.broker.password = "secret".to_string();
        let config = settings.resolve().unwrap();
        assert_eq!(
            config.credentials.unwrap().password.as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "user".to_string(),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = settings_with_prefix("X1");
        settings.session.qos = 3;
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let mut settings = settings_with_prefix("X1");
        settings.broker.host = "  ".to_string();
        assert!(settings.resolve().is_err());

        let mut settings = settings_with_prefix("X1");
        settings.broker.port = 0;
        assert!(settings.resolve().is_err());

        let mut settings = settings_with_prefix("X1");
        settings.reconnect.delay_ms = 0;
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn test_zero_delay_allowed_when_reconnect_disabled() {
        let mut settings = settings_with_prefix("X1");
        settings.reconnect.enabled = false;
        settings.reconnect.delay_ms = 0;
        assert!(settings.resolve().is_ok());
    }

    #[test]
    fn test_invalid_host_rejected_by_url_parser() {
        let mut settings = settings_with_prefix("X1");
        settings.broker.host = "bad host".to_string();
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let mut settings = Settings::default();
        settings
            .apply_overrides_from(|name| match name {
                "SENSOR_LINK_HOST" => Some("localhost".to_string()),
                "SENSOR_LINK_PORT" => Some("8083".to_string()),
                "SENSOR_LINK_SECURE" => Some("false".to_string()),
                "SENSOR_LINK_PREFIX" => Some("lab".to_string()),
                "SENSOR_LINK_QOS" => Some("2".to_string()),
                "SENSOR_LINK_AUTO_RECONNECT" => Some("no".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(settings.broker.host, "localhost");
        assert_eq!(settings.broker.port, 8083);
        assert!(!settings.broker.use_secure_transport);
        assert_eq!(settings.session.namespace_prefix, "lab");
        assert_eq!(settings.session.qos, 2);
        assert!(!settings.reconnect.enabled);
    }

    #[test]
    fn test_invalid_override_reports_variable() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides_from(|name| {
            (name == "SENSOR_LINK_PORT").then(|| "not-a-port".to_string())
        });

        match result {
            Err(ConfigError::InvalidEnvOverride { name, value }) => {
                assert_eq!(name, "SENSOR_LINK_PORT");
                assert_eq!(value, "not-a-port");
            }
            other => panic!("expected InvalidEnvOverride, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let toml_content = r#"
[session]
namespace_prefix = "X1"
qos = 1
"#;
        let settings: Settings = toml::from_str(toml_content).unwrap();
        assert_eq!(settings.broker, BrokerSection::default());
        assert_eq!(settings.session.qos, 1);
        assert_eq!(settings.session.keep_alive_secs, 60);
        assert_eq!(settings.reconnect, ReconnectSection::default());
    }
}
