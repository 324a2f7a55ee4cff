//! # MQTT Broker Session
//!
//! Connects to the data service broker, subscribes to one wildcard filter,
//! publishes a single test message and logs everything that arrives until the
//! run window closes.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs            - Protocol choice and the derived SessionConfig
//! ├── connection_state.rs  - Pure state machine and CONNACK reason table
//! ├── event_worker.rs      - Applies the state machine, performs effects
//! ├── message_manager.rs   - Inbound message representation
//! ├── mqtt_handler.rs      - rumqttc client, network pump, lifecycle
//! └── run_window.rs        - Cancellable fixed-duration run window
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! rumqttc EventLoop ──► pump task ──► SessionEvent ──► EventWorker ──► tracing
//!                                                          │
//!                                                  watch<SessionState>
//! ```
//!
//! Broker-side failures never abort the process. They leave the session in
//! `Failed` and show up in the final [`event_worker::SessionReport`].

pub mod config;
pub mod connection_state;
pub mod event_worker;
pub mod message_manager;
pub mod mqtt_handler;
pub mod run_window;
