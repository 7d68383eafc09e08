//! Cipher configuration.

use serde::{Deserialize, Serialize};

/// Default HKDF namespace, prefixed to every scope in the info string.
pub const DEFAULT_NAMESPACE: &str = "keyquorum";

/// Scope used for application records.
pub const SCOPE_DATA: &str = "data";

/// Scope used for replication traffic.
pub const SCOPE_REPLICATION: &str = "replication";

/// Configuration shared by every cipher engine in a process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherConfig {
    /// HKDF info prefix; the info string is `"<namespace>:<scope>"`.
    pub namespace: String,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}
