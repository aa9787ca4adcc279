use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::endpoints::Environment;

fn default_sandbox() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// Client configuration: taxpayer identity, certificate material, cache
/// directories, and environment selection.
///
/// `sandbox` defaults to true so a fresh setup talks to homologation
/// until production is opted into explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfipConfig {
    /// CUIT the calls are made on behalf of.
    pub cuit: String,
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
    /// PEM private key matching the certificate.
    pub key_file: String,
    /// X.509 certificate issued by AFIP for this CUIT.
    pub cert_file: String,
    #[serde(default)]
    pub cert_pass: String,
    /// Directory holding the persisted ticket records.
    pub ticket_dir: String,
    /// Directory holding the cached service descriptions.
    pub wsdl_dir: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AfipConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        serde_json::from_str(&raw).context("parsing JSON")
    }

    pub fn environment(&self) -> Environment {
        if self.sandbox {
            Environment::Sandbox
        } else {
            Environment::Production
        }
    }
}
