use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened to a resource. Payloads are never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Maps a transport's event name to a kind.
    ///
    /// Accepts both row-level database names (`INSERT`, `UPDATE`, `DELETE`)
    /// and the lowercase names used on the wire by this crate.
    pub fn from_wire(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "insert" | "created" | "create" => EventKind::Created,
            "update" | "updated" => EventKind::Updated,
            "delete" | "deleted" => EventKind::Deleted,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Something changed for this resource."
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource: String,
    pub kind: EventKind,
}

impl ChangeEvent {
    pub fn new(resource: impl Into<String>, kind: EventKind) -> Self {
        Self {
            resource: resource.into(),
            kind,
        }
    }

    pub fn created(resource: impl Into<String>) -> Self {
        Self::new(resource, EventKind::Created)
    }

    pub fn updated(resource: impl Into<String>) -> Self {
        Self::new(resource, EventKind::Updated)
    }

    pub fn deleted(resource: impl Into<String>) -> Self {
        Self::new(resource, EventKind::Deleted)
    }
}

/// Returns the pub/sub channel name carrying events for a resource.
pub fn feed_channel(resource: &str) -> String {
    format!("channel:feed:{}", resource)
}
