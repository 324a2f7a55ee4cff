//! Error definitions for the credential resolver

use thiserror::Error;

/// Failures while discovering broker credentials. All of them are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// HTTP 401, the API key was not accepted
    #[error("Failed to connect to api endpoint. ApiKey not authorized. Response: {body}")]
    Unauthorized { body: String },

    /// HTTP 404
    #[error("Failed to connect to api endpoint. API not found. Response: {body}")]
    NotFound { body: String },

    /// Any other status besides 200
    #[error("Failed to connect to api endpoint (status {status}). Response: {body}")]
    ApiError { status: u16, body: String },

    #[error("Requested device with id {device_id} not available")]
    DeviceNotFound { device_id: String },

    /// Device is listed but carries no base topic
    #[error("No device found or no access to device with id {device_id}")]
    DeviceNotAccessible { device_id: String },

    /// The request itself could not be performed (DNS, TLS, socket)
    #[error("Api request failed: {0}")]
    Transport(String),

    /// Status 200 with a body that is not the expected JSON
    #[error("Unexpected api response: {0}")]
    Decode(String),
}
