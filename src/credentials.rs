// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Credential token decoding.
//!
//! The setup flow hands the bridge one opaque token: standard base64 of a
//! JSON object
//!
//! ```json
//! {"mqtt_url": "broker.example.com", "web_url": "https://api.example.com",
//!  "port": 1883, "username": "user", "password": "secret"}
//! ```
//!
//! # Examples
//!
//! ```
//! use duer_bridge::Credentials;
//!
//! let creds = Credentials::new("broker.local", 1883, "https://api.local", "user", "pw");
//! let token = creds.encode();
//! assert_eq!(Credentials::decode(&token).unwrap(), creds);
//! ```

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::error::DecodeError;

/// Broker and web backend credentials decoded from a token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    mqtt_host: String,
    mqtt_port: u16,
    web_base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RawToken {
    mqtt_url: Option<String>,
    web_url: Option<String>,
    port: Option<RawPort>,
    username: Option<String>,
    password: Option<String>,
}

/// Tokens in the wild carry the port both as a number and as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(i64),
    Text(String),
}

impl RawPort {
    fn into_port(self) -> Result<u16, DecodeError> {
        let port = match self {
            Self::Number(n) => u16::try_from(n).map_err(|_| DecodeError::InvalidPort(n.to_string()))?,
            Self::Text(s) => s
                .trim()
                .parse::<u16>()
                .map_err(|_| DecodeError::InvalidPort(s.clone()))?,
        };
        if port == 0 {
            return Err(DecodeError::InvalidPort("0".to_string()));
        }
        Ok(port)
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, DecodeError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(DecodeError::MissingField(field))
}

impl Credentials {
    /// Creates credentials from their parts.
    #[must_use]
    pub fn new(
        mqtt_host: impl Into<String>,
        mqtt_port: u16,
        web_base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            mqtt_host: mqtt_host.into(),
            mqtt_port,
            web_base_url: web_base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decodes a base64 token into credentials.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the token is not base64, does not hold a
    /// JSON object, lacks a required field, or carries an invalid port. No
    /// partial credentials are ever returned.
    pub fn decode(token: &str) -> Result<Self, DecodeError> {
        let bytes = STANDARD.decode(token.trim())?;
        let raw: RawToken = serde_json::from_slice(&bytes)?;

        let mqtt_host = non_empty(raw.mqtt_url, "mqtt_url")?;
        let web_base_url = non_empty(raw.web_url, "web_url")?;
        let username = non_empty(raw.username, "username")?;
        let password = raw.password.ok_or(DecodeError::MissingField("password"))?;
        let mqtt_port = raw
            .port
            .ok_or(DecodeError::MissingField("port"))?
            .into_port()?;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            web_base_url,
            username,
            password,
        })
    }

    /// Encodes these credentials into a token accepted by [`decode`](Self::decode).
    #[must_use]
    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "mqtt_url": self.mqtt_host,
            "web_url": self.web_base_url,
            "port": self.mqtt_port,
            "username": self.username,
            "password": self.password,
        });
        STANDARD.encode(json.to_string())
    }

    /// Returns the broker host.
    #[must_use]
    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    /// Returns the web backend base URL.
    #[must_use]
    pub fn web_base_url(&self) -> &str {
        &self.web_base_url
    }

    /// Returns the username (also the remote `openid`).
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the password (also the remote `secret`).
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .field("web_base_url", &self.web_base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(json: &serde_json::Value) -> String {
        STANDARD.encode(json.to_string())
    }

    #[test]
    fn decode_all_fields() {
        let t = token(&serde_json::json!({
            "mqtt_url": "mqtt.example.com",
            "web_url": "https://web.example.com",
            "port": 1883,
            "username": "alice",
            "password": "s3cret"
        }));

        let creds = Credentials::decode(&t).unwrap();
        assert_eq!(creds.mqtt_host(), "mqtt.example.com");
        assert_eq!(creds.mqtt_port(), 1883);
        assert_eq!(creds.web_base_url(), "https://web.example.com");
        assert_eq!(creds.username(), "alice");
        assert_eq!(creds.password(), "s3cret");
    }

    #[test]
    fn round_trip_preserves_fields() {
        let cases = [
            Credentials::new("a", 1, "http://b", "c", ""),
            Credentials::new("10.0.0.1", 65535, "https://x/y/", "ü-user", "p:w/\"q\""),
            Credentials::new("host", 8883, "http://web:8080", "user", "pw"),
        ];
        for creds in cases {
            assert_eq!(Credentials::decode(&creds.encode()).unwrap(), creds);
        }
    }

    #[test]
    fn port_as_string_is_accepted() {
        let t = token(&serde_json::json!({
            "mqtt_url": "h", "web_url": "w", "port": "1884", "username": "u", "password": "p"
        }));
        assert_eq!(Credentials::decode(&t).unwrap().mqtt_port(), 1884);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let creds = Credentials::new("h", 1883, "w", "u", "p");
        let t = format!("  {}\n", creds.encode());
        assert_eq!(Credentials::decode(&t).unwrap(), creds);
    }

    #[test]
    fn invalid_base64_fails() {
        let err = Credentials::decode("not base64 !!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn invalid_json_fails() {
        let err = Credentials::decode(&STANDARD.encode("{not json")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn non_object_json_fails() {
        let err = Credentials::decode(&STANDARD.encode("[1,2,3]")).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn missing_fields_fail() {
        let full = serde_json::json!({
            "mqtt_url": "h", "web_url": "w", "port": 1883, "username": "u", "password": "p"
        });
        for field in ["mqtt_url", "web_url", "port", "username", "password"] {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(field);
            let err = Credentials::decode(&token(&partial)).unwrap_err();
            assert!(
                matches!(err, DecodeError::MissingField(f) if f == field),
                "field {field}: {err}"
            );
        }
    }

    #[test]
    fn empty_host_is_missing() {
        let t = token(&serde_json::json!({
            "mqtt_url": "", "web_url": "w", "port": 1883, "username": "u", "password": "p"
        }));
        assert!(matches!(
            Credentials::decode(&t),
            Err(DecodeError::MissingField("mqtt_url"))
        ));
    }

    #[test]
    fn out_of_range_port_fails() {
        for port in [serde_json::json!(70000), serde_json::json!(0), serde_json::json!("abc")] {
            let t = token(&serde_json::json!({
                "mqtt_url": "h", "web_url": "w", "port": port, "username": "u", "password": "p"
            }));
            assert!(matches!(
                Credentials::decode(&t),
                Err(DecodeError::InvalidPort(_))
            ));
        }
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("h", 1883, "w", "u", "hunter2");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
