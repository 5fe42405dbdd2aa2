use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_modbus::slave::SlaveId;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::telemetry::{validate_bindings, Binding};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub response_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            response_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Emulator settings, usually loaded from a JSON file.
pub struct EmulatorConfig {
    pub serial: SerialConfig,
    /// Id answered on the bus. `0` runs as a master polling `remote_id`.
    pub slave_id: SlaveId,
    pub remote_id: SlaveId,
    pub poll_interval_ms: u64,
    pub include_config_section: bool,
    pub bindings: Vec<Binding>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            slave_id: 1,
            remote_id: 1,
            poll_interval_ms: 5000,
            include_config_section: false,
            bindings: Binding::pv_defaults(),
        }
    }
}

impl EmulatorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self, catalog: &Catalog) -> Result<()> {
        if self.serial.path.trim().is_empty() {
            return Err(Error::Config("serial path is empty".to_string()));
        }
        if self.slave_id == 0 && self.remote_id == 0 {
            return Err(Error::Config(
                "remote_id must be set when running as a master".to_string(),
            ));
        }
        validate_bindings(catalog, &self.bindings)
    }
}
