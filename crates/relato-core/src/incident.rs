//! Core data types for Relato

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an incident record came from. Set once at creation, immutable
/// afterward; governs sync eligibility for the lifetime of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Captured on this device by the local user.
    AuthoredLocal,
    /// Received from another device over the peer link.
    ReceivedFromPeer,
}

/// Reconciliation state against the remote incident service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Authored locally, not yet accepted by the remote service.
    PendingSync,
    /// Accepted by the remote service.
    Synced,
    /// Permanently excluded from reconciliation (peer-received records).
    NeverSync,
}

impl Origin {
    /// The sync state a freshly created record gets for this origin.
    pub fn initial_sync_state(self) -> SyncState {
        match self {
            Origin::AuthoredLocal => SyncState::PendingSync,
            Origin::ReceivedFromPeer => SyncState::NeverSync,
        }
    }
}

/// A citizen-reported incident, the unit of capture, storage and exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Local identifier, assigned by the store on first persistence.
    pub id: i64,
    /// Identifier assigned by the remote service once synced.
    pub remote_id: Option<i64>,
    pub description: String,
    /// Human-readable place name, if the reporter supplied one.
    pub symbolic_location: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Capture or report time.
    pub timestamp: DateTime<Utc>,
    pub urgent: bool,
    /// Number of confirmed outbound peer sends. Only increases.
    pub share_count: u32,
    /// Local path or remote URL of an attached photo.
    pub photo_ref: Option<String>,
    /// Local path or remote URL of an attached video (referenced, never
    /// transmitted inline).
    pub video_ref: Option<String>,
    pub origin: Origin,
    pub sync_state: SyncState,
    /// Unix seconds at first persistence; orders the pending-sync drain.
    pub created_at: i64,
}

/// An incident before the store has assigned it an identity.
///
/// Both the capture path and the peer-receive path produce one of these;
/// [`Origin`] is supplied separately when the record is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentDraft {
    pub description: String,
    pub symbolic_location: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub urgent: bool,
    pub photo_ref: Option<String>,
    pub video_ref: Option<String>,
}

impl IncidentDraft {
    /// Validate the fields a well-formed record requires.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude out of range: {}", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude out of range: {}", self.longitude));
        }
        Ok(())
    }
}

impl Incident {
    /// Whether the sync coordinator may ever submit this record.
    pub fn sync_eligible(&self) -> bool {
        self.origin == Origin::AuthoredLocal && self.sync_state != SyncState::NeverSync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> IncidentDraft {
        IncidentDraft {
            description: "Fire on 5th".to_string(),
            symbolic_location: None,
            latitude: -8.8,
            longitude: 13.2,
            timestamp: Utc::now(),
            urgent: true,
            photo_ref: None,
            video_ref: None,
        }
    }

    #[test]
    fn test_initial_sync_state() {
        assert_eq!(
            Origin::AuthoredLocal.initial_sync_state(),
            SyncState::PendingSync
        );
        assert_eq!(
            Origin::ReceivedFromPeer.initial_sync_state(),
            SyncState::NeverSync
        );
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft().validate().is_ok());

        let mut empty = draft();
        empty.description = "   ".to_string();
        assert!(empty.validate().is_err());

        let mut bad_lat = draft();
        bad_lat.latitude = 91.0;
        assert!(bad_lat.validate().is_err());
    }
}
