//! Broker session handle
//!
//! Wraps the rumqttc client and event loop and manages their lifecycle with a
//! statum typestate:
//!
//! ```text
//! BrokerSession<Configured> ──connect()──► BrokerSession<Live> ──shutdown()──► SessionReport
//! ```
//!
//! `connect` spawns two tokio tasks. The network pump polls the rumqttc event
//! loop and turns notifications into [`SessionEvent`]s; the [`EventWorker`]
//! consumes them and owns the protocol state. Nothing is retried: a refused
//! or broken connection ends the pump and leaves the session `Failed`.

use super::config::{SessionConfig, TransportKind};
use super::connection_state::{SessionEvent, SessionState};
use super::event_worker::{publish_once, EventWorker, PublishOutcome, SessionReport};
use super::message_manager::InboundMessage;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    NetworkOptions, Outgoing, Packet, SubscribeReasonCode, Transport,
};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const EVENT_BUFFER: usize = 100;
const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// CONNACK carried a non-zero reason code
    #[error("Broker rejected connection ({code}): {reason}")]
    BrokerRejected { code: u8, reason: String },

    #[error("Broker refused subscription to {0}")]
    SubscriptionRefused(String),

    /// Anything below MQTT: DNS, TCP, TLS, WebSocket upgrade, timeouts
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The request could not be queued locally
    #[error("Request failed: {0}")]
    Request(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Configured,
    Live,
}

#[machine]
pub struct BrokerSession<S: SessionPhase> {
    config: SessionConfig,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    state_tx: Option<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    shutdown: CancellationToken,
    pump: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<SessionReport>>,
}

impl<S: SessionPhase> BrokerSession<S> {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }
}

impl BrokerSession<Configured> {
    /// Prepares client and event loop. No network traffic happens yet.
    pub fn create(config: SessionConfig, shutdown: CancellationToken) -> Self {
        let options = mqtt_options(&config);
        let (client, mut eventloop) = AsyncClient::new(options, config.request_capacity);

        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(config.connect_timeout.as_secs());
        eventloop.set_network_options(network_options);

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        debug!("Broker session created for {}:{}", config.host, config.port);

        Self::new(
            config,
            client,
            Some(eventloop),
            Some(state_tx),
            state_rx,
            shutdown,
            None, // pump
            None, // worker
        )
    }

    /// Starts the network pump and the event worker.
    ///
    /// Returns as soon as the tasks run; the CONNACK arrives asynchronously.
    pub fn connect(mut self) -> Result<BrokerSession<Live>, SessionError> {
        let (eventloop, state_tx) = match (self.eventloop.take(), self.state_tx.take()) {
            (Some(eventloop), Some(state_tx)) => (eventloop, state_tx),
            _ => {
                return Err(SessionError::TransportFailure(
                    "session already started".to_string(),
                ))
            }
        };

        info!(
            "Connecting to mqtt broker {}:{} via {:?}",
            self.config.host, self.config.port, self.config.transport
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let mut worker = EventWorker::new(
            self.client.clone(),
            self.config.topic.clone(),
            self.config.device_id.clone(),
            state_tx,
        );
        worker.handle(SessionEvent::ConnectIssued);

        self.worker = Some(tokio::spawn(worker.run(event_rx, self.shutdown.clone())));
        self.pump = Some(tokio::spawn(pump_events(
            eventloop,
            self.client.clone(),
            event_tx,
            self.shutdown.clone(),
        )));

        Ok(self.transition())
    }
}

impl BrokerSession<Live> {
    /// Single fire-and-forget publish; not gated on the connection state.
    pub fn publish(&self, topic: &str, payload: &str) -> PublishOutcome {
        publish_once(&self.client, topic, payload)
    }

    /// Stops both tasks and returns what the session went through.
    pub async fn shutdown(mut self) -> Result<SessionReport, SessionError> {
        self.shutdown.cancel();

        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!("Network pump ended abnormally: {}", e);
            }
        }

        let worker = self
            .worker
            .take()
            .ok_or_else(|| SessionError::TransportFailure("worker not running".to_string()))?;
        let report = worker
            .await
            .map_err(|e| SessionError::TransportFailure(format!("event worker failed: {e}")))?;

        info!(
            "Session stopped in state {} after {} message(s)",
            report.final_state,
            report.delivered.len()
        );
        Ok(report)
    }
}

pub fn mqtt_options(config: &SessionConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, config.broker_address(), config.port);
    options
        .set_keep_alive(config.keep_alive)
        .set_clean_session(true);

    if let Some(credentials) = &config.credentials {
        options.set_credentials(&credentials.username, &credentials.password);
    }

    let transport = match config.transport {
        TransportKind::WebSocket => Transport::wss_with_default_config(),
        TransportKind::RawTcp => Transport::tls_with_default_config(),
    };
    options.set_transport(transport);
    options
}

async fn pump_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
) {
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => {
                if connected {
                    disconnect(&mut eventloop, &client).await;
                }
                return;
            }
            polled = eventloop.poll() => polled,
        };

        let (event, keep_polling) = translate(polled);
        if let Some(event) = event {
            if event == SessionEvent::ConnAck(0) {
                connected = true;
            }
            if events.send(event).await.is_err() {
                debug!("Event worker gone, stopping network pump");
                return;
            }
        }
        if !keep_polling {
            debug!("Network pump stopped, no reconnect attempted");
            return;
        }
    }
}

async fn disconnect(eventloop: &mut EventLoop, client: &AsyncClient) {
    if let Err(e) = client.try_disconnect() {
        warn!("Could not queue disconnect: {}", e);
        return;
    }

    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    match tokio::time::timeout(DISCONNECT_FLUSH, flush).await {
        Ok(()) => info!("Disconnected from mqtt broker"),
        Err(_) => warn!("Disconnect was not flushed in time"),
    }
}

/// Maps one event loop result to a session event and whether to keep polling.
pub(crate) fn translate(polled: Result<Event, ConnectionError>) -> (Option<SessionEvent>, bool) {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            (Some(SessionEvent::ConnAck(return_code(ack.code))), true)
        }
        Ok(Event::Incoming(Packet::SubAck(ack))) => {
            let granted = match ack.return_codes.first() {
                Some(SubscribeReasonCode::Success(qos)) => Some(*qos as u8),
                _ => None,
            };
            (Some(SessionEvent::SubAck(granted)), true)
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => {
            let msg = InboundMessage::new(
                publish.topic.clone(),
                publish.payload.to_vec(),
                publish.qos as u8,
            );
            (Some(SessionEvent::Message(msg)), true)
        }
        Ok(other) => {
            trace!("Ignoring {:?}", other);
            (None, true)
        }
        Err(ConnectionError::ConnectionRefused(code)) => {
            (Some(SessionEvent::ConnAck(return_code(code))), false)
        }
        Err(e) => (Some(SessionEvent::TransportError(e.to_string())), false),
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}
