//! Error types.

use crate::types::ProtocolClass;
use thiserror::Error;

/// Load-time failures: settings, rule files and rule compilation.
///
/// A reload that hits any of these is rejected whole; the active policy
/// index stays in place.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Destination is neither a CIDR nor a resolvable host
    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    /// Quota string does not follow `<integer><unit>`
    #[error("malformed quota value '{0}'")]
    MalformedQuota(String),

    /// Quota unit is not one of the accepted suffixes
    #[error("unknown {kind} unit '{unit}'")]
    UnknownUnit { kind: &'static str, unit: String },

    /// Quota does not fit in a signed 64-bit value
    #[error("quota value '{0}' out of range")]
    QuotaOverflow(String),

    /// Two policies for the same network and protocol class
    #[error("duplicate {protocol} policy for network {network}")]
    DuplicatePolicy {
        network: String,
        protocol: ProtocolClass,
    },

    /// File larger than the accepted maximum
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The flow table is at maximum occupancy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("flow table full ({limit} entries)")]
pub struct CapacityError {
    pub limit: usize,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
