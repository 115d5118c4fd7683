// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-06-22

//! Persisted device configuration.
//!
//! The store is a small JSON file; a missing or unparsable file yields
//! the defaults rather than an error so the bridge always boots. Most
//! fields belong to the Wi-Fi and setup front-ends — the core itself
//! reads only `web_port`, the boot-time card assignment, and the USB
//! idle timeout.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

/// Wi-Fi mode selected at boot by the setup front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WifiBootMode {
    Ap,
    Sta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub dev_name: String,
    pub sta_ssid: String,
    pub sta_psk: String,
    pub web_port: u16,
    pub wifi_boot_mode: WifiBootMode,
    pub last_sta_ip: String,
    /// Whether the card boots exposed over USB or mounted for the app.
    pub usb_on_boot: bool,
    /// Auto-detach threshold for an idle USB session; zero disables.
    pub usb_idle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dev_name: "sdbridge".into(),
            sta_ssid: String::new(),
            sta_psk: String::new(),
            web_port: 8080,
            wifi_boot_mode: WifiBootMode::Ap,
            last_sta_ip: String::new(),
            usb_on_boot: true,
            usb_idle_timeout_ms: 0,
        }
    }
}

/// File-backed configuration store.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored configuration, falling back to defaults.
    pub fn load(&self) -> Config {
        match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("config {} unparsable ({e}), using defaults", self.path.display());
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Persist the configuration.
    pub fn save(&self, cfg: &Config) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(cfg)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
