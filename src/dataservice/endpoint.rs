use super::api_client::EndpointDescriptor;
use crate::mqtt::config::MqttProtocol;
use tracing::warn;
use url::Url;

/// Host and port extracted from an endpoint URL.
///
/// The default value (empty host, port 0) stands for "nothing usable was
/// advertised"; connecting to it fails at the transport layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// First descriptor whose protocol matches the preferred one.
pub fn select_endpoint(
    endpoints: &[EndpointDescriptor],
    protocol: MqttProtocol,
) -> Option<&EndpointDescriptor> {
    endpoints.iter().find(|e| e.protocol == protocol.as_str())
}

pub fn parse_endpoint(endpoint: &str) -> Option<BrokerEndpoint> {
    let url = Url::parse(endpoint).ok()?;
    let host = url.host_str()?.to_string();
    let port = url
        .port_or_known_default()
        .or_else(|| default_port(url.scheme()))?;
    Some(BrokerEndpoint { host, port })
}

/// Picks and parses the endpoint for `protocol`. No fallback to other protocols.
pub fn resolve_endpoint(endpoints: &[EndpointDescriptor], protocol: MqttProtocol) -> BrokerEndpoint {
    let Some(descriptor) = select_endpoint(endpoints, protocol) else {
        warn!("No {} endpoint advertised by the api", protocol);
        return BrokerEndpoint::default();
    };
    parse_endpoint(&descriptor.url).unwrap_or_else(|| {
        warn!("Could not parse endpoint url {}", descriptor.url);
        BrokerEndpoint::default()
    })
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "mqtts" | "ssl" => Some(8883),
        "mqtt" | "tcp" => Some(1883),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(protocol: &str, url: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            protocol: protocol.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn picks_matching_protocol() {
        let endpoints = vec![
            descriptor("mqtts", "mqtts://a:1"),
            descriptor("mqtt-wss", "wss://b:2"),
        ];
        let endpoint = resolve_endpoint(&endpoints, MqttProtocol::MqttWss);
        assert_eq!(endpoint, BrokerEndpoint { host: "b".into(), port: 2 });

        let endpoint = resolve_endpoint(&endpoints, MqttProtocol::Mqtts);
        assert_eq!(endpoint, BrokerEndpoint { host: "a".into(), port: 1 });
    }

    #[test]
    fn first_match_wins() {
        let endpoints = vec![
            descriptor("mqtt-wss", "wss://first:443"),
            descriptor("mqtt-wss", "wss://second:443"),
        ];
        assert_eq!(
            select_endpoint(&endpoints, MqttProtocol::MqttWss).map(|e| e.url.as_str()),
            Some("wss://first:443")
        );
    }

    #[test]
    fn missing_protocol_leaves_host_empty() {
        let endpoints = vec![descriptor("mqtts", "mqtts://a:1")];
        let endpoint = resolve_endpoint(&endpoints, MqttProtocol::MqttWss);
        assert_eq!(endpoint, BrokerEndpoint::default());
        assert!(endpoint.host.is_empty());
    }

    #[test]
    fn scheme_defaults_fill_missing_port() {
        assert_eq!(
            parse_endpoint("wss://broker.example.com/mqtt"),
            Some(BrokerEndpoint { host: "broker.example.com".into(), port: 443 })
        );
        assert_eq!(
            parse_endpoint("mqtts://broker.example.com"),
            Some(BrokerEndpoint { host: "broker.example.com".into(), port: 8883 })
        );
    }

    #[test]
    fn garbage_url_is_unusable() {
        assert_eq!(parse_endpoint("not a url"), None);
        let endpoints = vec![descriptor("mqtt-wss", "::::")];
        assert_eq!(resolve_endpoint(&endpoints, MqttProtocol::MqttWss), BrokerEndpoint::default());
    }
}
