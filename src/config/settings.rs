use clap::ArgMatches;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::utils::error::WriteError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: WriteNodeSettings,
    #[serde(default)]
    pub loopback: LoopbackSettings,
}

/// Settings of one write node, as the flow editor stores them.
///
/// Field aliases accept the editor's own key names (`unitid`, `adr`,
/// `dataType`, ...) so exported flow configs load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteNodeSettings {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "showStatusActivities")]
    pub show_status_activities: bool,
    #[serde(default, alias = "showErrors")]
    pub show_errors: bool,
    #[serde(alias = "unitid")]
    pub unit_id: u8,
    #[serde(alias = "dataType")]
    pub data_type: DataType,
    #[serde(alias = "adr")]
    pub address: u16,
    #[serde(default = "default_quantity")]
    pub quantity: u16,
    #[serde(default, alias = "emptyMsgOnFail")]
    pub empty_msg_on_fail: bool,
    /// Name of the shared transport this node writes through. `None` leaves
    /// the node inert.
    #[serde(default)]
    pub server: Option<String>,
    /// Pending writes older than this are failed with a timeout. `None`
    /// keeps them until a completion or teardown.
    #[serde(default, alias = "pendingTimeoutMs")]
    pub pending_timeout_ms: Option<u64>,
}

fn default_quantity() -> u16 {
    1
}

/// Logical target of a write. Strings the node does not know are kept so
/// that the mismatch surfaces per message instead of at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Coil,
    HoldingRegister,
    MCoils,
    MHoldingRegisters,
    Unknown(String),
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Coil" => DataType::Coil,
            "HoldingRegister" => DataType::HoldingRegister,
            "MCoils" => DataType::MCoils,
            "MHoldingRegisters" => DataType::MHoldingRegisters,
            _ => DataType::Unknown(name),
        }
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Coil => write!(f, "Coil"),
            DataType::HoldingRegister => write!(f, "HoldingRegister"),
            DataType::MCoils => write!(f, "MCoils"),
            DataType::MHoldingRegisters => write!(f, "MHoldingRegisters"),
            DataType::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Behaviour of the in-process loopback transport used by the CLI runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackSettings {
    #[serde(default = "default_true")]
    pub start_active: bool,
    /// Fail every n-th write; `None` acknowledges all of them.
    #[serde(default)]
    pub fail_every: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            start_active: true,
            fail_every: None,
        }
    }
}

impl Default for WriteNodeSettings {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "modbus write".to_string(),
            show_status_activities: false,
            show_errors: true,
            unit_id: 1,
            data_type: DataType::Coil,
            address: 0,
            quantity: 1,
            empty_msg_on_fail: false,
            server: Some("loopback".to_string()),
            pending_timeout_ms: None,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: WriteNodeSettings::default(),
            loopback: LoopbackSettings::default(),
        }
    }
}

impl WriteNodeSettings {
    /// Display name, falling back to the node id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<(), WriteError> {
        if self.id.is_empty() {
            return Err(WriteError::ConfigError("node id must not be empty".to_string()));
        }
        if self.quantity == 0 {
            return Err(WriteError::ConfigError("quantity must be at least 1".to_string()));
        }
        if self.pending_timeout_ms == Some(0) {
            return Err(WriteError::ConfigError(
                "pending_timeout_ms must be positive when set".to_string(),
            ));
        }
        if let DataType::Unknown(name) = &self.data_type {
            warn!("⚠️  Node '{}' uses unsupported data type '{}', every write will fail", self.label(), name);
        }
        Ok(())
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WriteError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: NodeConfig = toml::from_str(&content)?;

        // Generate node id if not present
        if config.node.id.is_empty() {
            config.node.id = Uuid::new_v4().to_string();
        }

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), WriteError> {
        // Create directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overrides targeting with command line arguments, where given.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), WriteError> {
        if let Some(unit_id) = matches.get_one::<String>("unit-id") {
            self.node.unit_id = parse_arg("unit-id", unit_id)?;
        }
        if let Some(address) = matches.get_one::<String>("address") {
            self.node.address = parse_arg("address", address)?;
        }
        if let Some(quantity) = matches.get_one::<String>("quantity") {
            self.node.quantity = parse_arg("quantity", quantity)?;
        }
        if let Some(data_type) = matches.get_one::<String>("data-type") {
            self.node.data_type = DataType::from(data_type.clone());
        }
        if let Some(fail_every) = matches.get_one::<String>("fail-every") {
            self.loopback.fail_every = Some(parse_arg("fail-every", fail_every)?);
        }
        if matches.get_flag("empty-msg-on-fail") {
            self.node.empty_msg_on_fail = true;
        }

        info!(
            "⚙️  Node '{}': unit {} | {} @ {} x{}",
            self.node.label(),
            self.node.unit_id,
            self.node.data_type,
            self.node.address,
            self.node.quantity
        );
        Ok(())
    }
}

fn parse_arg<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, WriteError>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| WriteError::ConfigError(format!("invalid --{} '{}': {}", name, raw, e)))
}
