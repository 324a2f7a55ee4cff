use super::error::ResolveError;
use crate::config::ApiConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One broker endpoint advertised by the info call.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub protocol: String,
    #[serde(rename = "endpoint")]
    pub url: String,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InfoResponse {
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_topic: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DevicesRequest<'a> {
    pub device_ids: &'a [String],
}

/// Raw status and body; classification happens in the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// The two data service calls the resolver depends on.
pub trait DataServiceApi {
    /// `GET .../keys/dataservice/info`
    fn fetch_info(&self) -> Result<ApiResponse, ResolveError>;

    /// `POST .../keys/dataservice/devices` with `{"deviceIds": [...]}`
    fn fetch_devices(&self, device_ids: &[String]) -> Result<ApiResponse, ResolveError>;
}

/// Blocking HTTP implementation on top of ureq.
pub struct HttpApi {
    agent: ureq::Agent,
    info_endpoint: String,
    devices_endpoint: String,
    api_key: String,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build();
        Self {
            agent,
            info_endpoint: config.info_endpoint.clone(),
            devices_endpoint: config.devices_endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

impl DataServiceApi for HttpApi {
    fn fetch_info(&self) -> Result<ApiResponse, ResolveError> {
        debug!("GET {}", self.info_endpoint);
        let result = self
            .agent
            .get(&self.info_endpoint)
            .set("accept", "application/json")
            .set("authorization", &self.api_key)
            .call();
        into_api_response(result)
    }

    fn fetch_devices(&self, device_ids: &[String]) -> Result<ApiResponse, ResolveError> {
        let body = serde_json::to_string(&DevicesRequest { device_ids })
            .map_err(|e| ResolveError::Decode(e.to_string()))?;
        debug!("POST {} {}", self.devices_endpoint, body);
        let result = self
            .agent
            .post(&self.devices_endpoint)
            .set("Content-Type", "application/json")
            .set("accept", "application/json")
            .set("authorization", &self.api_key)
            .send_string(&body);
        into_api_response(result)
    }
}

fn into_api_response(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ApiResponse, ResolveError> {
    match result {
        Ok(response) => {
            let status = response.status();
            let body = response
                .into_string()
                .map_err(|e| ResolveError::Transport(e.to_string()))?;
            Ok(ApiResponse { status, body })
        }
        // ureq reports 4xx/5xx as errors but still hands out the body
        Err(ureq::Error::Status(status, response)) => {
            let body = response
                .into_string()
                .map_err(|e| ResolveError::Transport(e.to_string()))?;
            Ok(ApiResponse { status, body })
        }
        Err(ureq::Error::Transport(transport)) => Err(ResolveError::Transport(transport.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serves one canned response and hands back the raw request it received.
    fn serve_once(response: String) -> (u16, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                } else if n == 0 {
                    break;
                }
            }
            tx.send(String::from_utf8_lossy(&raw).to_string()).unwrap();
            stream.write_all(response.as_bytes()).unwrap();
        });

        (port, rx)
    }

    fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn api(port: u16) -> HttpApi {
        HttpApi::new(&ApiConfig {
            info_endpoint: format!("http://127.0.0.1:{port}/v1/keys/dataservice/info"),
            devices_endpoint: format!("http://127.0.0.1:{port}/v1/keys/dataservice/devices"),
            api_key: "KEY-123".into(),
            device_id: "DEV-1".into(),
            request_timeout_secs: 5,
        })
    }

    #[test]
    fn info_call_is_authorized_get() {
        let body = r#"{"endpoints": [], "username": "u", "password": "p"}"#;
        let (port, request) = serve_once(json_response("200 OK", body));

        let response = api(port).fetch_info().unwrap();
        assert_eq!(
            response,
            ApiResponse {
                status: 200,
                body: body.to_string()
            }
        );

        let request = request.recv().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("GET /v1/keys/dataservice/info HTTP/1.1\r\n"));
        assert!(lower.contains("\r\nauthorization: key-123\r\n"));
        assert!(lower.contains("\r\naccept: application/json\r\n"));
    }

    #[test]
    fn devices_call_posts_json_ids() {
        let body = r#"{"devices": [{"deviceId": "DEV-1", "baseTopic": "t/"}]}"#;
        let (port, request) = serve_once(json_response("200 OK", body));

        let response = api(port).fetch_devices(&["DEV-1".to_string()]).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, body);

        let request = request.recv().unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /v1/keys/dataservice/devices HTTP/1.1\r\n"));
        assert!(lower.contains("\r\ncontent-type: application/json\r\n"));
        assert!(lower.contains("\r\naccept: application/json\r\n"));
        assert!(lower.contains("\r\nauthorization: key-123\r\n"));
        assert!(request.ends_with("\r\n\r\n{\"deviceIds\":[\"DEV-1\"]}"));
    }

    #[test]
    fn error_status_keeps_body() {
        let body = r#"{"message": "invalid api key"}"#;
        let (port, _request) = serve_once(json_response("401 Unauthorized", body));

        let response = api(port).fetch_info().unwrap();
        assert_eq!(
            response,
            ApiResponse {
                status: 401,
                body: body.to_string()
            }
        );
    }

    #[test]
    fn truncated_error_body_is_a_transport_error() {
        let response = "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"message\"";
        let (port, _request) = serve_once(response.to_string());

        let result = api(port).fetch_info();
        assert!(matches!(result, Err(ResolveError::Transport(_))));
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(matches!(api(port).fetch_info(), Err(ResolveError::Transport(_))));
    }

    #[test]
    fn decodes_info_response() {
        let info: InfoResponse = serde_json::from_str(
            r#"{
                "endpoints": [
                    {"protocol": "mqtts", "endpoint": "mqtts://broker.example.com:8883"},
                    {"protocol": "mqtt-wss", "endpoint": "wss://broker.example.com:443"}
                ],
                "username": "svc-user",
                "password": "svc-pass"
            }"#,
        )
        .unwrap();
        assert_eq!(info.endpoints.len(), 2);
        assert_eq!(info.endpoints[1].url, "wss://broker.example.com:443");
        assert_eq!(info.username, "svc-user");
    }

    #[test]
    fn decodes_devices_with_optional_fields() {
        let devices: DevicesResponse = serde_json::from_str(
            r#"{"devices": [
                {"deviceId": "d1", "name": "Gateway", "baseTopic": "tenant/d1/"},
                {"deviceId": "d2"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(devices.devices[0].base_topic.as_deref(), Some("tenant/d1/"));
        assert_eq!(devices.devices[1].name, None);
        assert_eq!(devices.devices[1].base_topic, None);
    }

    #[test]
    fn devices_request_uses_camel_case() {
        let ids = vec!["DEVICEID".to_string()];
        let body = serde_json::to_string(&DevicesRequest { device_ids: &ids }).unwrap();
        assert_eq!(body, r#"{"deviceIds":["DEVICEID"]}"#);
    }
}
