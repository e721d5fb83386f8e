// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! Each concern has its own error enum so callers can tell fatal problems
//! (a malformed token) apart from recoverable ones (a dropped connection, a
//! failed delivery):
//!
//! - [`DecodeError`]: the credential token could not be decoded
//! - [`ConnectError`]: the broker connection could not be established
//! - [`ProtocolError`]: HTTP or MQTT communication failed
//! - [`ParseError`]: an inbound payload or remote response was malformed
//! - [`VersionError`]: the remote backend requires a newer bridge
//! - [`QueueError`]: the state sync queue rejected a change

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The credential token is malformed.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Connecting to the broker failed.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The version gate refused to enable sync.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// The state sync queue rejected a change.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Errors raised while decoding the opaque credential token.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The token is not valid base64.
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded token is not a valid JSON object.
    #[error("token does not contain valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or empty.
    #[error("token is missing required field: {0}")]
    MissingField(&'static str),

    /// The broker port is not a valid TCP port.
    #[error("invalid broker port: {0}")]
    InvalidPort(String),
}

/// Errors raised while establishing the broker connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The connection configuration is invalid.
    #[error("invalid connection configuration: {0}")]
    InvalidConfig(String),

    /// Reading TLS material failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake did not complete in time.
    #[error("connection timed out after {0} ms")]
    Timeout(u64),

    /// The broker refused the connection or the socket closed during the handshake.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The transport failed before a link was established.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Errors related to protocol communication (HTTP/MQTT).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client request failed.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} - {reason}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// The web API answered with a non-zero result code.
    #[error("remote rejected request with code {code}: {message}")]
    Rejected {
        /// API result code.
        code: i64,
        /// API message, if any.
        message: String,
    },

    /// An outbound payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),

    /// The broker link is not connected.
    #[error("broker link is not connected")]
    NotConnected,

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors related to parsing payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },

    /// The command discriminator is not one this bridge handles.
    #[error("unknown command type: {0}")]
    UnknownCommand(String),
}

/// Errors raised by the version gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The bridge is older than the version the backend requires.
    #[error("bridge version {own} is older than required {required}, please update the plugin")]
    Outdated {
        /// This bridge's version.
        own: String,
        /// Version required by the backend.
        required: String,
    },

    /// A version string is not a valid `YEAR.MONTH.DAY` date.
    #[error("invalid version string: {0}")]
    Invalid(String),
}

/// Errors raised when offering a change to the state sync queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity; the change was dropped.
    #[error("state sync queue is full ({capacity} entries), dropped change for {entity_id}")]
    Full {
        /// Entity whose change was dropped.
        entity_id: String,
        /// Queue capacity.
        capacity: usize,
    },

    /// The drain loop is gone; the change was dropped.
    #[error("state sync queue is closed")]
    Closed,
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let err = DecodeError::MissingField("mqtt_url");
        assert_eq!(err.to_string(), "token is missing required field: mqtt_url");
    }

    #[test]
    fn error_from_queue_error() {
        let err: Error = QueueError::Closed.into();
        assert!(matches!(err, Error::Queue(QueueError::Closed)));
    }

    #[test]
    fn version_error_mentions_update() {
        let err = VersionError::Outdated {
            own: "2024.7.8".to_string(),
            required: "2024.8.1".to_string(),
        };
        assert!(err.to_string().contains("please update"));
    }

    #[test]
    fn rejected_display() {
        let err = ProtocolError::Rejected {
            code: 4001,
            message: "bad secret".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote rejected request with code 4001: bad secret"
        );
    }
}
