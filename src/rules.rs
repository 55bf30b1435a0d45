//! Raw rule descriptors and where they come from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::read_bounded;
use crate::error::ConfigResult;

/// A policy rule as written by an operator, before compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDescriptor {
    pub name: String,
    /// CIDR, bare address or host name
    pub destination: String,
    /// Duration quota such as `"1h"`; empty means unbounded
    pub usage_time: String,
    /// Data quota such as `"2kb"`; empty means unbounded
    pub usage_size: String,
    /// `tcp`, `udp` or anything else for any protocol
    pub protocol: String,
}

impl RuleDescriptor {
    pub fn new(name: &str, destination: &str) -> Self {
        Self {
            name: name.to_string(),
            destination: destination.to_string(),
            ..Default::default()
        }
    }

    pub fn usage_size(mut self, size: &str) -> Self {
        self.usage_size = size.to_string();
        self
    }

    pub fn usage_time(mut self, time: &str) -> Self {
        self.usage_time = time.to_string();
        self
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }
}

/// Supplies the ordered rule set at construction and on every reload.
pub trait RuleSource: Send + Sync {
    fn rules(&self) -> ConfigResult<Vec<RuleDescriptor>>;
}

/// A fixed, in-memory rule set.
#[derive(Debug, Clone, Default)]
pub struct StaticRules(pub Vec<RuleDescriptor>);

impl RuleSource for StaticRules {
    fn rules(&self) -> ConfigResult<Vec<RuleDescriptor>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<RuleDescriptor>,
}

/// Parses the `"rules"` array of a JSON document.
pub fn parse_rules(json: &str) -> ConfigResult<Vec<RuleDescriptor>> {
    let doc: RuleDocument = serde_json::from_str(json)?;
    Ok(doc.rules)
}

/// Rules read from a JSON file on every call, so a reload picks up edits.
#[derive(Debug, Clone)]
pub struct JsonRuleFile {
    path: PathBuf,
}

impl JsonRuleFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleSource for JsonRuleFile {
    fn rules(&self) -> ConfigResult<Vec<RuleDescriptor>> {
        parse_rules(&read_bounded(&self.path)?)
    }
}
