//! Event worker
//!
//! Owns the [`SessionState`] and applies [`step`] to every event coming from the
//! network pump. Effects that touch the broker go through [`MqttCommands`] so
//! the worker runs just as well against a recording fake as against rumqttc.

use super::connection_state::{step, Effect, SessionEvent, SessionState};
use super::message_manager::InboundMessage;
use super::mqtt_handler::SessionError;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Requests the session issues towards the broker.
///
/// Both calls only enqueue; success says nothing about broker acknowledgment.
pub trait MqttCommands: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> Result<(), SessionError>;
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;
}

impl MqttCommands for AsyncClient {
    fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| SessionError::Request(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| SessionError::Request(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Enqueued,
    Failed(String),
}

/// Fire-and-forget publish, judged by the local enqueue result only.
pub fn publish_once<C: MqttCommands + ?Sized>(
    commands: &C,
    topic: &str,
    payload: &str,
) -> PublishOutcome {
    match commands.publish(topic, payload.as_bytes()) {
        Ok(()) => {
            info!("Published the message `{}` to topic `{}`", payload, topic);
            PublishOutcome::Enqueued
        }
        Err(e) => {
            warn!("Failed to send message to topic {}: {}", topic, e);
            PublishOutcome::Failed(e.to_string())
        }
    }
}

/// What the session went through, handed back once the worker stops.
#[derive(Debug)]
pub struct SessionReport {
    pub final_state: SessionState,
    pub delivered: Vec<InboundMessage>,
    pub failure: Option<SessionError>,
}

/// SUBACK log line, naming the device when the topic came from the API.
fn subscribed_line(device_id: Option<&str>, topic: &str, qos: u8) -> String {
    match device_id {
        Some(id) => format!(
            "Subscribed to device with ID {} and topic '{}' with Quality of Service: {}",
            id, topic, qos
        ),
        None => format!("Subscribed to topic '{}' with Quality of Service: {}", topic, qos),
    }
}

pub struct EventWorker<C> {
    commands: C,
    topic: String,
    device_id: Option<String>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    delivered: Vec<InboundMessage>,
    failure: Option<SessionError>,
}

impl<C: MqttCommands> EventWorker<C> {
    pub fn new(
        commands: C,
        topic: String,
        device_id: Option<String>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        let state = *state_tx.borrow();
        Self {
            commands,
            topic,
            device_id,
            state,
            state_tx,
            delivered: Vec::new(),
            failure: None,
        }
    }

    pub fn handle(&mut self, event: SessionEvent) {
        let (next, effects) = step(self.state, event);
        if next != self.state {
            debug!("Session state {} -> {}", self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
        }
        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::ReportConnected => info!("Connected to mqtt broker"),
            Effect::Subscribe => {
                debug!("Subscribing to '{}'", self.topic);
                if let Err(e) = self.commands.subscribe(&self.topic) {
                    error!("Subscribe request for '{}' failed: {}", self.topic, e);
                    self.handle(SessionEvent::TransportError(e.to_string()));
                }
            }
            Effect::ReportRejected { code, reason } => {
                warn!("Cannot connect to mqtt broker: {}", reason);
                self.failure = Some(SessionError::BrokerRejected {
                    code,
                    reason: reason.to_string(),
                });
            }
            Effect::ReportSubscribed { qos } => {
                info!("{}", subscribed_line(self.device_id.as_deref(), &self.topic, qos))
            }
            Effect::OpenWindow => self.handle(SessionEvent::WindowOpened),
            Effect::ReportSubscribeRefused => {
                warn!("Broker refused subscription to '{}'", self.topic);
                self.failure = Some(SessionError::SubscriptionRefused(self.topic.clone()));
            }
            Effect::Deliver(msg) => {
                info!(
                    "Received message {} at {}",
                    msg,
                    msg.received_at.format("%H:%M:%S%.3f")
                );
                self.delivered.push(msg);
            }
            Effect::ReportTransportFailure(reason) => {
                error!("Connection to mqtt broker failed: {}", reason);
                self.failure = Some(SessionError::TransportFailure(reason));
            }
        }
    }

    /// Processes events until `shutdown` fires.
    ///
    /// Cancellation is checked first on every iteration, so nothing queued
    /// behind the shutdown is processed.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown: CancellationToken,
    ) -> SessionReport {
        let mut open = true;
        while open {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        debug!("Network pump finished, waiting for the run window to close");
                        open = false;
                    }
                },
            }
        }
        shutdown.cancelled().await;
        self.handle(SessionEvent::Shutdown);

        SessionReport {
            final_state: self.state,
            delivered: self.delivered,
            failure: self.failure,
        }
    }
}
