//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::discovery::DEFAULT_INVITATION_TIMEOUT;
use crate::CollabError;

/// Namespace every collaborative session advertises and browses under
pub const SERVICE_NAMESPACE: &str = "ar-collab";

/// Longest namespace the discovery layer accepts
pub const MAX_NAMESPACE_LEN: usize = 15;

/// Longest display name, in UTF-8 bytes
pub const MAX_DISPLAY_NAME_BYTES: usize = 63;

/// Longest an invitation may wait for an answer
pub const MAX_INVITATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Whether the transport session encrypts its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncryptionPreference {
    /// Every member must encrypt; peers without a channel key cannot join
    #[default]
    Required,
    /// Encrypt with peers that can, fall back to plaintext otherwise
    Optional,
    /// Never encrypt
    Disabled,
}

impl EncryptionPreference {
    /// Whether we offer a channel key in invitations and replies
    pub fn offers_key(&self) -> bool {
        !matches!(self, EncryptionPreference::Disabled)
    }
}

/// What to do when a member tries to use streams or resource transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapabilityPolicy {
    /// Terminate the session's event loop
    #[default]
    Fatal,
    /// Disconnect only the offending peer
    RejectPeer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Discovery namespace; peers with different namespaces never see each other
    pub namespace: String,

    /// Human-readable name shown to other peers
    pub display_name: String,

    /// Seconds an invitation waits for an answer
    pub invitation_timeout_secs: u64,

    pub encryption: EncryptionPreference,

    pub unsupported_capability: CapabilityPolicy,

    /// Start advertising and browsing as soon as the coordinator is built
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: SERVICE_NAMESPACE.to_string(),
            display_name: "ar-collab peer".to_string(),
            invitation_timeout_secs: DEFAULT_INVITATION_TIMEOUT.as_secs(),
            encryption: EncryptionPreference::default(),
            unsupported_capability: CapabilityPolicy::default(),
            auto_start: true,
        }
    }
}

impl SessionConfig {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the invitation timeout. Stored in whole seconds, so any fractional
    /// part is dropped: 1.9s becomes 1s and anything under a second fails
    /// validation.
    pub fn with_invitation_timeout(mut self, timeout: Duration) -> Self {
        self.invitation_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionPreference) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_capability_policy(mut self, policy: CapabilityPolicy) -> Self {
        self.unsupported_capability = policy;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn invitation_timeout(&self) -> Duration {
        Duration::from_secs(self.invitation_timeout_secs)
    }

    /// Check every field; the coordinator refuses to start on an invalid config
    pub fn validate(&self) -> Result<(), CollabError> {
        validate_namespace(&self.namespace)?;

        if self.display_name.is_empty() {
            return Err(CollabError::InvalidConfig(
                "Display name cannot be empty".to_string(),
            ));
        }
        if self.display_name.len() > MAX_DISPLAY_NAME_BYTES {
            return Err(CollabError::InvalidConfig(format!(
                "Display name is {} bytes (max {})",
                self.display_name.len(),
                MAX_DISPLAY_NAME_BYTES
            )));
        }
        if self.invitation_timeout_secs == 0 {
            return Err(CollabError::InvalidConfig(
                "Invitation timeout must be at least one second".to_string(),
            ));
        }
        if self.invitation_timeout() > MAX_INVITATION_TIMEOUT {
            return Err(CollabError::InvalidConfig(format!(
                "Invitation timeout is {}s (max {}s)",
                self.invitation_timeout_secs,
                MAX_INVITATION_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

/// Namespaces are 1-15 chars of lowercase ASCII letters, digits and hyphens,
/// with at least one letter and no leading, trailing or doubled hyphen.
pub fn validate_namespace(namespace: &str) -> Result<(), CollabError> {
    let invalid = |reason: &str| {
        Err(CollabError::InvalidConfig(format!(
            "Invalid namespace {:?}: {}",
            namespace, reason
        )))
    };

    if namespace.is_empty() || namespace.len() > MAX_NAMESPACE_LEN {
        return invalid("must be 1-15 characters");
    }
    if !namespace
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return invalid("only lowercase letters, digits and hyphens are allowed");
    }
    if !namespace.bytes().any(|b| b.is_ascii_lowercase()) {
        return invalid("must contain at least one letter");
    }
    if namespace.starts_with('-') || namespace.ends_with('-') || namespace.contains("--") {
        return invalid("hyphens must separate other characters");
    }
    Ok(())
}
