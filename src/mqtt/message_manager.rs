use chrono::NaiveDateTime;
use std::fmt;

/// A PUBLISH received on the subscribed filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub received_at: NaiveDateTime,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: u8) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            received_at: chrono::Local::now().naive_local(),
        }
    }

    /// Payload as text; non UTF-8 bytes are replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} on topic '{}' with QoS {}",
            self.payload_text(),
            self.topic,
            self.qos
        )
    }
}
