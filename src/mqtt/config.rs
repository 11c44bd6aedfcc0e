use rumqttc::{MqttOptions, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection parameters for one broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// Empty means `mqttmonitor-<pid>`
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    pub use_tls: bool,
    /// Capacity of the request channel between client and event loop
    pub request_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 60,
            use_tls: false,
            request_capacity: 100,
        }
    }
}

impl BrokerSettings {
    pub fn effective_client_id(&self) -> String {
        let id = self.client_id.trim();
        if id.is_empty() {
            format!("mqttmonitor-{}", std::process::id())
        } else {
            id.to_string()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.effective_client_id(), self.host.trim(), self.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .set_clean_session(true);

        if !self.username.is_empty() {
            options.set_credentials(self.username.clone(), self.password.clone());
        }
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

impl fmt::Display for BrokerSettings {
    // password stays out of logs
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}", self.address())
        } else {
            write!(f, "{}@{}", self.username, self.address())
        }
    }
}

/// Topic filter to subscribe to after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_client_id_falls_back_to_process_id() {
        let settings = BrokerSettings::default();
        assert_eq!(
            settings.effective_client_id(),
            format!("mqttmonitor-{}", std::process::id())
        );

        let settings = BrokerSettings {
            client_id: " probe ".into(),
            ..Default::default()
        };
        assert_eq!(settings.effective_client_id(), "probe");
    }

    #[test]
    fn display_hides_password() {
        let settings = BrokerSettings {
            host: "broker.local".into(),
            username: "alice".into(),
            password: "secret".into(),
            ..Default::default()
        };
        assert_eq!(settings.to_string(), "alice@broker.local:1883");
    }

    #[test]
    fn options_carry_address_and_keep_alive() {
        let settings = BrokerSettings {
            host: "broker.local".into(),
            port: 8883,
            keep_alive_secs: 30,
            ..Default::default()
        };
        let options = settings.mqtt_options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }
}
