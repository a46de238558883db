use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a recurrence template (UUIDv7 — time-sortable
/// for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key of a checklist instance.
///
/// Base instances carry a human-readable slug derived from their display
/// name; run clones get a fresh UUIDv7. Neither form can contain the
/// `::` completion-key separator, which is what keeps composite
/// completion keys collision-free.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey(pub String);

impl InstanceKey {
    /// Fresh unique key for a materialized run clone.
    pub fn fresh() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Slug key for a base instance: lowercase, spaces to hyphens,
    /// everything outside `[a-z0-9-]` stripped.
    pub fn slug(name: &str) -> Self {
        let mut out = String::with_capacity(name.len());
        let mut last_hyphen = false;
        for c in name.trim().to_lowercase().chars() {
            if c.is_whitespace() {
                if !last_hyphen {
                    out.push('-');
                    last_hyphen = true;
                }
            } else if c.is_ascii_alphanumeric() || c == '-' {
                out.push(c);
                last_hyphen = c == '-';
            }
        }
        Self(out.trim_matches('-').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
