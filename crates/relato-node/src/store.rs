//! Local incident store backed by SQLite
//!
//! The authoritative record set. All mutations go through one connection
//! guarded by a mutex, which gives the single-writer semantics the share
//! counter and the origin/sync-state invariant rely on.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use relato_core::{Error, Incident, IncidentDraft, Origin, Result, SyncState};
use rusqlite::{params, Connection, Row};

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn origin_to_str(origin: Origin) -> &'static str {
    match origin {
        Origin::AuthoredLocal => "authored_local",
        Origin::ReceivedFromPeer => "received_from_peer",
    }
}

fn origin_from_str(s: &str) -> Result<Origin> {
    match s {
        "authored_local" => Ok(Origin::AuthoredLocal),
        "received_from_peer" => Ok(Origin::ReceivedFromPeer),
        other => Err(Error::InvalidData(format!("unknown origin {other:?}"))),
    }
}

fn sync_state_to_str(state: SyncState) -> &'static str {
    match state {
        SyncState::PendingSync => "pending_sync",
        SyncState::Synced => "synced",
        SyncState::NeverSync => "never_sync",
    }
}

fn sync_state_from_str(s: &str) -> Result<SyncState> {
    match s {
        "pending_sync" => Ok(SyncState::PendingSync),
        "synced" => Ok(SyncState::Synced),
        "never_sync" => Ok(SyncState::NeverSync),
        other => Err(Error::InvalidData(format!("unknown sync state {other:?}"))),
    }
}

/// The local record set, with share counters and sync-eligibility flags.
pub struct IncidentStore {
    conn: Mutex<Connection>,
}

impl IncidentStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// An in-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                remote_id INTEGER,
                description TEXT NOT NULL,
                symbolic_location TEXT,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                urgent INTEGER NOT NULL DEFAULT 0,
                share_count INTEGER NOT NULL DEFAULT 0,
                photo_ref TEXT,
                video_ref TEXT,
                origin TEXT NOT NULL,
                sync_state TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_sync_state
                ON incidents(sync_state);
            "#,
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist a draft, assigning a fresh identifier.
    ///
    /// The initial sync state follows the origin: locally authored records
    /// start pending, peer-received records are permanently excluded from
    /// reconciliation.
    pub fn create(&self, draft: &IncidentDraft, origin: Origin) -> Result<Incident> {
        draft.validate().map_err(Error::InvalidData)?;

        let sync_state = origin.initial_sync_state();
        let created_at = Utc::now().timestamp();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO incidents
            (description, symbolic_location, latitude, longitude, timestamp,
             urgent, share_count, photo_ref, video_ref, origin, sync_state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
            "#,
            params![
                draft.description,
                draft.symbolic_location,
                draft.latitude,
                draft.longitude,
                draft.timestamp.timestamp(),
                draft.urgent,
                draft.photo_ref,
                draft.video_ref,
                origin_to_str(origin),
                sync_state_to_str(sync_state),
                created_at,
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();

        tracing::info!(
            "created incident {} ({:?}, {:?})",
            id,
            origin,
            sync_state
        );

        Ok(Incident {
            id,
            remote_id: None,
            description: draft.description.clone(),
            symbolic_location: draft.symbolic_location.clone(),
            latitude: draft.latitude,
            longitude: draft.longitude,
            timestamp: draft.timestamp,
            urgent: draft.urgent,
            share_count: 0,
            photo_ref: draft.photo_ref.clone(),
            video_ref: draft.video_ref.clone(),
            origin,
            sync_state,
            created_at,
        })
    }

    /// Fetch one record by its local identifier.
    pub fn get(&self, id: i64) -> Result<Option<Incident>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM incidents WHERE id = ?")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![id], row_to_incident)
            .map_err(db_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(db_err)?)),
            None => Ok(None),
        }
    }

    /// All records, newest report first.
    pub fn list_all(&self) -> Result<Vec<Incident>> {
        self.query("SELECT * FROM incidents ORDER BY timestamp DESC", [])
    }

    /// Urgent records, newest report first.
    pub fn list_urgent(&self) -> Result<Vec<Incident>> {
        self.query(
            "SELECT * FROM incidents WHERE urgent = 1 ORDER BY timestamp DESC",
            [],
        )
    }

    /// Records awaiting remote acceptance, oldest first so the drain
    /// submits in capture order.
    pub fn list_pending_sync(&self) -> Result<Vec<Incident>> {
        self.query(
            "SELECT * FROM incidents WHERE sync_state = 'pending_sync' ORDER BY created_at ASC",
            [],
        )
    }

    /// Number of records with pending sync state.
    pub fn count_pending_sync(&self) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM incidents WHERE sync_state = 'pending_sync'",
            [],
            |row| row.get::<_, u32>(0),
        )
        .map_err(db_err)
    }

    /// Atomically bump the share counter, returning the new count.
    ///
    /// Callers invoke this exactly once per transport-confirmed send,
    /// never speculatively.
    pub fn increment_share_count(&self, id: i64) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE incidents SET share_count = share_count + 1 WHERE id = ?",
                params![id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("incident {id}")));
        }
        conn.query_row(
            "SELECT share_count FROM incidents WHERE id = ?",
            params![id],
            |row| row.get::<_, u32>(0),
        )
        .map_err(db_err)
    }

    /// Transition a locally authored record to synced, recording the id the
    /// remote service assigned.
    ///
    /// Rejected for peer-received records: those never leave `NeverSync`.
    pub fn mark_synced(&self, id: i64, remote_id: Option<i64>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let (origin, state): (String, String) = conn
            .query_row(
                "SELECT origin, sync_state FROM incidents WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("incident {id}"))
                }
                other => db_err(other),
            })?;

        if origin_from_str(&origin)? == Origin::ReceivedFromPeer
            || sync_state_from_str(&state)? == SyncState::NeverSync
        {
            return Err(Error::InvalidData(format!(
                "incident {id} was received from a peer and is never synced"
            )));
        }

        conn.execute(
            "UPDATE incidents SET sync_state = 'synced', remote_id = ? WHERE id = ?",
            params![remote_id, id],
        )
        .map_err(db_err)?;

        tracing::info!("incident {} marked synced (remote id {:?})", id, remote_id);
        Ok(())
    }

    /// Housekeeping: drop synced records older than the retention window.
    pub fn delete_synced_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - i64::from(days) * 24 * 60 * 60;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM incidents WHERE sync_state = 'synced' AND created_at < ?",
            params![cutoff],
        )
        .map_err(db_err)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Incident>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, row_to_incident)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

fn row_to_incident(row: &Row<'_>) -> rusqlite::Result<Incident> {
    let origin_raw: String = row.get("origin")?;
    let state_raw: String = row.get("sync_state")?;
    let ts: i64 = row.get("timestamp")?;

    let invalid = |msg: String| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            msg.into(),
        )
    };

    Ok(Incident {
        id: row.get("id")?,
        remote_id: row.get("remote_id")?,
        description: row.get("description")?,
        symbolic_location: row.get("symbolic_location")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        timestamp: DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| invalid(format!("bad timestamp {ts}")))?,
        urgent: row.get("urgent")?,
        share_count: row.get("share_count")?,
        photo_ref: row.get("photo_ref")?,
        video_ref: row.get("video_ref")?,
        origin: origin_from_str(&origin_raw).map_err(|e| invalid(e.to_string()))?,
        sync_state: sync_state_from_str(&state_raw).map_err(|e| invalid(e.to_string()))?,
        created_at: row.get("created_at")?,
    })
}
