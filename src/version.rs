// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compatibility check against the backend's minimum bridge version.
//!
//! Versions are calendar dates written `YEAR.MONTH.DAY` without zero padding,
//! e.g. `2024.7.8`. Sync is enabled only when this bridge's version is on or
//! after the version the backend requires. Any failure to obtain or parse the
//! required version disables sync.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::error::VersionError;
use crate::web::WebClient;

/// Version of this bridge.
pub const CURRENT_VERSION: &str = "2024.7.8";

/// A `YEAR.MONTH.DAY` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginVersion(NaiveDate);

impl PluginVersion {
    /// Returns the version as a date.
    #[must_use]
    pub fn date(self) -> NaiveDate {
        self.0
    }
}

impl FromStr for PluginVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::Invalid(s.to_string());

        let mut parts = s.trim().split('.');
        let (Some(year), Some(month), Some(day), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let day: u32 = day.parse().map_err(|_| invalid())?;

        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.year(), self.0.month(), self.0.day())
    }
}

/// Decides whether sync may be enabled.
#[derive(Debug, Clone)]
pub struct VersionGate {
    own: String,
}

impl VersionGate {
    /// Creates a gate for the given bridge version.
    #[must_use]
    pub fn new(own: impl Into<String>) -> Self {
        Self { own: own.into() }
    }

    /// Returns the bridge version this gate checks.
    #[must_use]
    pub fn own_version(&self) -> &str {
        &self.own
    }

    /// Compares this bridge's version with a required one.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Invalid`] if either version does not parse,
    /// or [`VersionError::Outdated`] if the bridge is older than required.
    pub fn evaluate(&self, required: &str) -> Result<(), VersionError> {
        let own: PluginVersion = self.own.parse()?;
        let required_version: PluginVersion = required.parse()?;

        if own >= required_version {
            Ok(())
        } else {
            Err(VersionError::Outdated {
                own: own.to_string(),
                required: required_version.to_string(),
            })
        }
    }

    /// Fetches the required version and evaluates it.
    ///
    /// Fails closed: any request, envelope or parse failure returns `false`.
    pub async fn check(&self, web: &WebClient) -> bool {
        let config = match web.plugin_config().await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Plugin version check failed");
                return false;
            }
        };

        match self.evaluate(&config.plugin_version) {
            Ok(()) => {
                tracing::debug!(
                    own = %self.own,
                    required = %config.plugin_version,
                    "Plugin version accepted"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Plugin version rejected");
                false
            }
        }
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new(CURRENT_VERSION)
    }
}
