// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Capability registry
//!
//! The allow-list of dotted method names the gateway forwards upstream. The
//! upstream client may expose many more capabilities; only the names listed
//! here are ever wired into the RPC front. Adding a provider operation means
//! adding its name here, there is no discovery over the client's surface.

use thiserror::Error;

/// Methods exposed by default, in registration order.
pub const FLESPI_METHODS: &[&str] = &[
    "http.gw.channels.get",
    "http.gw.channels.messages.get",
    "http.gw.channels.logs.get",
    "http.gw.devices.get",
    "http.gw.devices.messages.get",
    "http.gw.devices.logs.get",
    "http.gw.devices.telemetry.get",
    "http.gw.devices.settings.put",
    "http.gw.devices.settings.post",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method name is empty")]
    EmptyName,
    #[error("method name '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// Ordered, immutable set of method names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRegistry {
    names: Vec<String>,
}

impl CapabilityRegistry {
    /// Build a registry, keeping first-seen order and dropping duplicates
    pub fn new<I, S>(names: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            validate_name(&name)?;
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Ok(Self { names: out })
    }

    /// The default flespi allow-list
    pub fn flespi() -> Self {
        Self {
            names: FLESPI_METHODS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::flespi()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.split('.').any(str::is_empty) {
        return Err(RegistryError::EmptySegment(name.to_string()));
    }
    Ok(())
}
