//! Live scan events pushed over the socket

use serde::{Deserialize, Serialize};

/// Progress update for a running scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub scan_id: String,
    pub project_id: String,
    /// Percent complete, 0-100
    pub progress: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanComplete {
    pub scan_id: String,
    pub project_id: String,
    pub findings_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailed {
    pub scan_id: String,
    pub project_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingCreated {
    pub finding_id: String,
    pub project_id: String,
    pub severity: String,
    pub title: String,
}

/// Server greeting sent once the socket is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    pub timestamp: String,
}

/// A socket frame, tagged by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketEvent {
    #[serde(rename = "scan:progress")]
    ScanProgress(ScanProgress),

    #[serde(rename = "scan:complete")]
    ScanComplete(ScanComplete),

    #[serde(rename = "scan:failed")]
    ScanFailed(ScanFailed),

    #[serde(rename = "finding:created")]
    FindingCreated(FindingCreated),

    #[serde(rename = "connected")]
    Connected(Connected),
}

impl SocketEvent {
    /// Wire tag of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            SocketEvent::ScanProgress(_) => "scan:progress",
            SocketEvent::ScanComplete(_) => "scan:complete",
            SocketEvent::ScanFailed(_) => "scan:failed",
            SocketEvent::FindingCreated(_) => "finding:created",
            SocketEvent::Connected(_) => "connected",
        }
    }

    /// Scan the event belongs to, if any
    pub fn scan_id(&self) -> Option<&str> {
        match self {
            SocketEvent::ScanProgress(e) => Some(&e.scan_id),
            SocketEvent::ScanComplete(e) => Some(&e.scan_id),
            SocketEvent::ScanFailed(e) => Some(&e.scan_id),
            SocketEvent::FindingCreated(_) | SocketEvent::Connected(_) => None,
        }
    }
}
