//! Capability contract identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Contract name for the baseline message sender capability
pub const MESSAGE_SENDER: &str = "message-sender";

/// Contract name for the second-generation sender capability
pub const MESSAGE_SENDER_V2: &str = "message-sender.v2";

/// Identity of a capability contract.
///
/// Matching is by exact name only: no versioning, no priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `message-sender` contract
    pub fn message_sender() -> Self {
        Self::new(MESSAGE_SENDER)
    }

    /// The `message-sender.v2` contract
    pub fn message_sender_v2() -> Self {
        Self::new(MESSAGE_SENDER_V2)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContractId {
    fn default() -> Self {
        Self::message_sender()
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ContractId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
