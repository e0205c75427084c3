//! Pure construction of rumqttc options from a connect request

use crate::transport::ConnectRequest;
use rumqttc::{MqttOptions, Transport};

/// Capacity of the outbound request channel between client and event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Build MQTT-over-WebSocket options for one connect attempt
///
/// rumqttc takes the full `ws(s)://host:port/mqtt` URL as the broker address when a
/// WebSocket transport is selected.
pub fn configure_mqtt_options(request: &ConnectRequest) -> MqttOptions {
    let mut options = MqttOptions::new(
        request.client_id.clone(),
        request.endpoint.url(),
        request.endpoint.port,
    );

    let transport = if request.endpoint.secure {
        Transport::wss_with_default_config()
    } else {
        Transport::Ws
    };
    options.set_transport(transport);

    options.set_keep_alive(request.keep_alive);
    options.set_clean_session(request.clean_session);

    if let Some(credentials) = &request.credentials {
        options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone().unwrap_or_default(),
        );
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::testing::test_session_config;
    use std::time::Duration;

    fn request(secure: bool) -> ConnectRequest {
        let mut config = test_session_config();
        config.endpoint.secure = secure;
        ConnectRequest {
            endpoint: config.endpoint,
            client_id: config.client_id,
            timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            credentials: None,
        }
    }

    #[test]
    fn test_plain_websocket_options() {
        let options = configure_mqtt_options(&request(false));

        assert_eq!(options.client_id(), "web_X1_test0001");
        assert_eq!(
            options.broker_address(),
            ("ws://localhost:8083/mqtt".to_string(), 8083)
        );
        assert!(matches!(options.transport(), Transport::Ws));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.clean_session());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn test_secure_websocket_options() {
        let options = configure_mqtt_options(&request(true));

        assert_eq!(options.broker_address().0, "wss://localhost:8083/mqtt");
        assert!(matches!(options.transport(), Transport::Wss(_)));
    }

    #[test]
    fn test_credentials_applied() {
        let mut request = request(false);
        request.credentials = Some(Credentials {
            username: "sensor".to_string(),
            password: None,
        });

        let options = configure_mqtt_options(&request);

        assert_eq!(
            options.credentials(),
            Some(("sensor".to_string(), String::new()))
        );
    }
}
