use crate::config::{BrokerConfig, MqttSettings};
use crate::dataservice::ResolvedBroker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Protocol names as advertised by the data service endpoint list.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MqttProtocol {
    #[default]
    #[serde(rename = "mqtt-wss")]
    MqttWss,
    #[serde(rename = "mqtts")]
    Mqtts,
}

impl MqttProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            MqttProtocol::MqttWss => "mqtt-wss",
            MqttProtocol::Mqtts => "mqtts",
        }
    }

    pub fn transport(&self) -> TransportKind {
        match self {
            MqttProtocol::MqttWss => TransportKind::WebSocket,
            MqttProtocol::Mqtts => TransportKind::RawTcp,
        }
    }
}

impl fmt::Display for MqttProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte stream carrying MQTT. Both variants are TLS secured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    RawTcp,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the broker session needs, derived once and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    /// Sent in CONNECT whenever present, even with an empty username
    pub credentials: Option<Credentials>,
    /// Subscription filter, normally a `#` wildcard under the device base topic
    pub topic: String,
    /// Device the topic belongs to, known in the api-key variant only
    pub device_id: Option<String>,
    pub transport: TransportKind,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub websocket_path: String,
    pub request_capacity: usize,
}

impl SessionConfig {
    /// Builds the session from resolver output (api-key variant).
    ///
    /// The service credentials are always used as returned, empty or not.
    pub fn from_resolved(broker: ResolvedBroker, settings: &MqttSettings) -> Self {
        let credentials = Credentials {
            username: broker.username,
            password: broker.password,
        };
        Self::build(
            broker.host,
            broker.port,
            Some(credentials),
            broker.topic,
            Some(broker.device_id),
            settings,
        )
    }

    /// Builds the session from static broker parameters (device-container variant).
    pub fn from_static(broker: &BrokerConfig, settings: &MqttSettings) -> Self {
        let credentials = match (&broker.username, &broker.password) {
            (None, None) => None,
            (username, password) => Some(Credentials {
                username: username.clone().unwrap_or_default(),
                password: password.clone().unwrap_or_default(),
            }),
        };
        Self::build(
            broker.host.clone(),
            broker.port,
            credentials,
            settings.subscription_topic.clone(),
            None,
            settings,
        )
    }

    fn build(
        host: String,
        port: u16,
        credentials: Option<Credentials>,
        topic: String,
        device_id: Option<String>,
        settings: &MqttSettings,
    ) -> Self {
        Self {
            host,
            port,
            credentials,
            topic,
            device_id,
            transport: settings.protocol.transport(),
            client_id: client_id(settings),
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            websocket_path: settings.websocket_path.clone(),
            request_capacity: settings.request_capacity,
        }
    }

    /// Address handed to the MQTT client. WebSocket transports need the full URL.
    pub fn broker_address(&self) -> String {
        match self.transport {
            TransportKind::WebSocket => {
                format!("wss://{}:{}{}", self.host, self.port, self.websocket_path)
            }
            TransportKind::RawTcp => self.host.clone(),
        }
    }
}

fn client_id(settings: &MqttSettings) -> String {
    match &settings.client_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!(
            "netfield-dataservice-{:x}",
            chrono::Utc::now().timestamp_millis()
        ),
    }
}
