//! # Data Service Credential Resolver
//!
//! Turns an API key and a device id into everything needed to open a broker
//! session: broker host and port, broker credentials and the device topic.
//!
//! ```text
//! info call ──► endpoints + username/password ──┐
//!                                               ├──► ResolvedBroker
//! devices call ──► target device base topic ────┘
//! ```
//!
//! Every failure here is fatal and happens before any broker traffic.

pub mod api_client;
pub mod endpoint;
pub mod error;

use crate::config::{ApiConfig, MqttSettings};
use crate::mqtt::config::MqttProtocol;
use api_client::{
    ApiResponse, DataServiceApi, DeviceDescriptor, DevicesResponse, HttpApi, InfoResponse,
};
use endpoint::resolve_endpoint;
pub use error::ResolveError;
use tracing::{debug, info};

/// Resolver output, fed into the broker session.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedBroker {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub device_id: String,
}

impl std::fmt::Debug for ResolvedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBroker")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("topic", &self.topic)
            .field("device_id", &self.device_id)
            .finish()
    }
}

pub struct CredentialResolver<A> {
    api: A,
    device_id: String,
    protocol: MqttProtocol,
    subscription_topic: String,
}

impl CredentialResolver<HttpApi> {
    pub fn from_config(api: &ApiConfig, mqtt: &MqttSettings) -> Self {
        Self::new(
            HttpApi::new(api),
            api.device_id.clone(),
            mqtt.protocol,
            mqtt.subscription_topic.clone(),
        )
    }
}

impl<A: DataServiceApi> CredentialResolver<A> {
    pub fn new(
        api: A,
        device_id: String,
        protocol: MqttProtocol,
        subscription_topic: String,
    ) -> Self {
        Self {
            api,
            device_id,
            protocol,
            subscription_topic,
        }
    }

    /// Broker endpoints and credentials.
    pub fn fetch_service_info(&self) -> Result<InfoResponse, ResolveError> {
        let body = check_status(self.api.fetch_info()?)?;
        let info: InfoResponse =
            serde_json::from_str(&body).map_err(|e| ResolveError::Decode(e.to_string()))?;
        info!("Connected to api endpoint successfully");
        debug!(
            "Service info: user {}, endpoints {:?}",
            info.username, info.endpoints
        );
        Ok(info)
    }

    /// Looks up the configured device and checks it exposes a base topic.
    pub fn fetch_device(&self) -> Result<DeviceDescriptor, ResolveError> {
        let ids = [self.device_id.clone()];
        let body = check_status(self.api.fetch_devices(&ids)?)?;
        let response: DevicesResponse =
            serde_json::from_str(&body).map_err(|e| ResolveError::Decode(e.to_string()))?;

        for device in &response.devices {
            info!(
                "Device \"{}\" with id {} available.",
                device.name.as_deref().unwrap_or_default(),
                device.device_id
            );
        }

        let device = response
            .devices
            .into_iter()
            .find(|d| d.device_id == self.device_id)
            .ok_or_else(|| ResolveError::DeviceNotFound {
                device_id: self.device_id.clone(),
            })?;

        match device.base_topic.as_deref() {
            Some(topic) if !topic.is_empty() => Ok(device),
            _ => Err(ResolveError::DeviceNotAccessible {
                device_id: self.device_id.clone(),
            }),
        }
    }

    pub fn resolve(&self) -> Result<ResolvedBroker, ResolveError> {
        let info = self.fetch_service_info()?;
        let device = self.fetch_device()?;
        let base_topic = device.base_topic.unwrap_or_default();

        let endpoint = resolve_endpoint(&info.endpoints, self.protocol);
        info!("Broker host is: {}", endpoint.host);

        Ok(ResolvedBroker {
            host: endpoint.host,
            port: endpoint.port,
            username: info.username,
            password: info.password,
            topic: format!("{}{}", base_topic, self.subscription_topic),
            device_id: self.device_id.clone(),
        })
    }
}

/// Only 200 counts as success; everything else carries the raw body along.
fn check_status(response: ApiResponse) -> Result<String, ResolveError> {
    let ApiResponse { status, body } = response;
    match status {
        200 => Ok(body),
        401 => Err(ResolveError::Unauthorized { body }),
        404 => Err(ResolveError::NotFound { body }),
        _ => Err(ResolveError::ApiError { status, body }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const INFO_BODY: &str = r#"{
        "endpoints": [
            {"protocol": "mqtts", "endpoint": "mqtts://a:1"},
            {"protocol": "mqtt-wss", "endpoint": "wss://b:2"}
        ],
        "username": "svc-user",
        "password": "svc-pass"
    }"#;

    struct FakeApi {
        info: ApiResponse,
        devices: ApiResponse,
        device_calls: RefCell<Vec<Vec<String>>>,
    }

    impl FakeApi {
        fn new(info: (u16, &str), devices: (u16, &str)) -> Self {
            Self {
                info: ApiResponse {
                    status: info.0,
                    body: info.1.to_string(),
                },
                devices: ApiResponse {
                    status: devices.0,
                    body: devices.1.to_string(),
                },
                device_calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl DataServiceApi for FakeApi {
        fn fetch_info(&self) -> Result<ApiResponse, ResolveError> {
            Ok(self.info.clone())
        }

        fn fetch_devices(&self, device_ids: &[String]) -> Result<ApiResponse, ResolveError> {
            self.device_calls.borrow_mut().push(device_ids.to_vec());
            Ok(self.devices.clone())
        }
    }

    fn resolver(api: FakeApi) -> CredentialResolver<FakeApi> {
        CredentialResolver::new(api, "DEV-1".into(), MqttProtocol::MqttWss, "#".into())
    }

    #[test]
    fn resolves_full_broker_description() {
        let api = FakeApi::new(
            (200, INFO_BODY),
            (
                200,
                r#"{"devices": [
                    {"deviceId": "OTHER", "baseTopic": "tenant/other/"},
                    {"deviceId": "DEV-1", "name": "Gateway", "baseTopic": "tenant/dev-1/"}
                ]}"#,
            ),
        );
        let resolver = resolver(api);
        let broker = resolver.resolve().unwrap();

        assert_eq!(broker.host, "b");
        assert_eq!(broker.port, 2);
        assert_eq!(broker.username, "svc-user");
        assert_eq!(broker.password, "svc-pass");
        assert_eq!(broker.topic, "tenant/dev-1/#");
        assert_eq!(broker.device_id, "DEV-1");
        assert_eq!(*resolver.api.device_calls.borrow(), vec![vec!["DEV-1".to_string()]]);
    }

    #[test]
    fn status_codes_map_to_error_kinds_with_body() {
        let cases = [
            (401, ResolveError::Unauthorized { body: "denied".into() }),
            (404, ResolveError::NotFound { body: "denied".into() }),
            (500, ResolveError::ApiError { status: 500, body: "denied".into() }),
            (201, ResolveError::ApiError { status: 201, body: "denied".into() }),
            (302, ResolveError::ApiError { status: 302, body: "denied".into() }),
        ];
        for (status, expected) in cases {
            let resolver = resolver(FakeApi::new((status, "denied"), (200, "{}")));
            assert_eq!(resolver.resolve().unwrap_err(), expected);
            // info failures abort before the device lookup
            assert!(resolver.api.device_calls.borrow().is_empty());
        }
    }

    #[test]
    fn error_message_contains_body() {
        let resolver = resolver(FakeApi::new((401, r#"{"message":"bad key"}"#), (200, "{}")));
        let err = resolver.resolve().unwrap_err();
        assert!(err.to_string().contains(r#"{"message":"bad key"}"#));
    }

    #[test]
    fn devices_call_status_is_checked() {
        let resolver = resolver(FakeApi::new((200, INFO_BODY), (403, "forbidden")));
        assert_eq!(
            resolver.resolve().unwrap_err(),
            ResolveError::ApiError { status: 403, body: "forbidden".into() }
        );
    }

    #[test]
    fn absent_device_is_not_found() {
        let resolver = resolver(FakeApi::new(
            (200, INFO_BODY),
            (200, r#"{"devices": [{"deviceId": "OTHER", "baseTopic": "t/"}]}"#),
        ));
        assert_eq!(
            resolver.resolve().unwrap_err(),
            ResolveError::DeviceNotFound { device_id: "DEV-1".into() }
        );

        let resolver = self::resolver(FakeApi::new((200, INFO_BODY), (200, r#"{"devices": []}"#)));
        assert!(matches!(resolver.resolve(), Err(ResolveError::DeviceNotFound { .. })));
    }

    #[test]
    fn device_without_base_topic_is_not_accessible() {
        for body in [
            r#"{"devices": [{"deviceId": "DEV-1", "name": "Gateway"}]}"#,
            r#"{"devices": [{"deviceId": "DEV-1", "baseTopic": null}]}"#,
            r#"{"devices": [{"deviceId": "DEV-1", "baseTopic": ""}]}"#,
        ] {
            let resolver = resolver(FakeApi::new((200, INFO_BODY), (200, body)));
            assert_eq!(
                resolver.resolve().unwrap_err(),
                ResolveError::DeviceNotAccessible { device_id: "DEV-1".into() }
            );
        }
    }

    #[test]
    fn malformed_info_is_a_decode_error() {
        let resolver = resolver(FakeApi::new((200, "<html>"), (200, "{}")));
        assert!(matches!(resolver.resolve(), Err(ResolveError::Decode(_))));
    }

    #[test]
    fn unmatched_protocol_resolves_empty_host() {
        let info = r#"{"endpoints": [{"protocol": "mqtts", "endpoint": "mqtts://a:1"}],
                       "username": "u", "password": "p"}"#;
        let resolver = resolver(FakeApi::new(
            (200, info),
            (200, r#"{"devices": [{"deviceId": "DEV-1", "baseTopic": "t/"}]}"#),
        ));
        let broker = resolver.resolve().unwrap();
        assert!(broker.host.is_empty());
        assert_eq!(broker.port, 0);
    }

    #[test]
    fn debug_output_hides_password() {
        let broker = ResolvedBroker {
            host: "h".into(),
            port: 1,
            username: "u".into(),
            password: "topsecret".into(),
            topic: "t/#".into(),
            device_id: "DEV-1".into(),
        };
        assert!(!format!("{broker:?}").contains("topsecret"));
    }
}
