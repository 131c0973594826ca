//! SQLite-backed anomaly archive with AES-GCM encryption of the raw event payload,
//! plus per-trail high-water-mark checkpoints.
//! Key derived from an operator-supplied secret.

use crate::error::{Result, StreamError};
use crate::model::Label;
use crate::sink::AnomalySink;
use crate::source::RawEvent;
use crate::stream::{Checkpoint, CheckpointStore, ScoredEvent};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const SINK: &str = "store";

fn derive_key(seed: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, seed);
    out[..h.as_ref().len().min(KEY_LEN)].copy_from_slice(h.as_ref());
    out
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> std::result::Result<String, aes_gcm::Error> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| aes_gcm::Error)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher.encrypt((&nonce).into(), plaintext)?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(BASE64.encode(&out))
}

fn decrypt(key: &[u8; KEY_LEN], encoded: &str) -> Result<Vec<u8>> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| StreamError::persistence(SINK, e))?;
    if raw.len() < NONCE_LEN {
        return Err(StreamError::persistence(SINK, "payload too short"));
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StreamError::persistence(SINK, e))?;
    cipher
        .decrypt(nonce.into(), ct)
        .map_err(|_| StreamError::persistence(SINK, "payload failed authentication"))
}

fn db_err(e: rusqlite::Error) -> StreamError {
    StreamError::persistence(SINK, e)
}

/// Archived anomaly with its decrypted event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnomaly {
    pub trail: String,
    pub event: RawEvent,
    pub label: Label,
    pub anomaly_score: f64,
    pub classified_at: DateTime<Utc>,
}

pub struct SecureStore {
    conn: Mutex<Connection>,
    key: [u8; KEY_LEN],
}

impl SecureStore {
    /// Open or create the DB at `path`. Key is derived from `secret`.
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StreamError::persistence(SINK, e))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS anomalies (
                event_id TEXT PRIMARY KEY,
                trail TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                classified_at INTEGER NOT NULL,
                prediction INTEGER NOT NULL,
                anomaly_score REAL NOT NULL,
                payload_enc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_anomalies_time ON anomalies(event_time);
            CREATE TABLE IF NOT EXISTS checkpoints (
                trail TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            key: derive_key(secret),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StreamError::persistence(SINK, "connection lock poisoned"))
    }

    /// Insert a batch in one transaction; re-inserting an event replaces it.
    pub fn insert_anomalies(&self, trail: &str, rows: &[ScoredEvent]) -> Result<()> {
        let mut encrypted = Vec::with_capacity(rows.len());
        for row in rows {
            let payload = serde_json::to_vec(&row.event).map_err(|e| StreamError::persistence(SINK, e))?;
            let enc = encrypt(&self.key, &payload).map_err(|e| StreamError::persistence(SINK, e))?;
            encrypted.push((row, enc));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        for (row, enc) in &encrypted {
            tx.execute(
                "INSERT OR REPLACE INTO anomalies \
                 (event_id, trail, event_time, classified_at, prediction, anomaly_score, payload_enc) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.event.event_id,
                    trail,
                    row.event.event_time.timestamp_millis(),
                    row.classified_at.timestamp_millis(),
                    row.label.prediction(),
                    row.anomaly_score,
                    enc
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    /// Read an anomaly back by event id (decrypting the payload).
    pub fn get_anomaly(&self, event_id: &str) -> Result<Option<StoredAnomaly>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT trail, classified_at, prediction, anomaly_score, payload_enc \
                 FROM anomalies WHERE event_id = ?1",
                params![event_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, f64>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;
        let Some((trail, classified_ms, prediction, anomaly_score, enc)) = row else {
            return Ok(None);
        };
        let plain = decrypt(&self.key, &enc)?;
        let event: RawEvent = serde_json::from_slice(&plain).map_err(|e| StreamError::persistence(SINK, e))?;
        let classified_at = Utc
            .timestamp_millis_opt(classified_ms)
            .single()
            .ok_or_else(|| StreamError::persistence(SINK, "classified_at out of range"))?;
        Ok(Some(StoredAnomaly {
            trail,
            event,
            label: Label::from_prediction(prediction),
            anomaly_score,
            classified_at,
        }))
    }

    pub fn count_anomalies(&self) -> Result<u64> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM anomalies", [], |r| r.get(0))
            .map_err(db_err)?;
        Ok(n as u64)
    }

    /// Retention: delete anomalies whose event happened before `cutoff`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM anomalies WHERE event_time < ?1",
                params![cutoff.timestamp_millis()],
            )
            .map_err(db_err)?;
        Ok(n as u64)
    }

    /// Sink view of this store for one trail.
    pub fn sink(self: &Arc<Self>, trail: &str) -> StoreSink {
        StoreSink {
            store: Arc::clone(self),
            trail: trail.to_string(),
            name: format!("store:{}", trail),
        }
    }
}

impl CheckpointStore for SecureStore {
    fn load_checkpoint(&self, trail: &str) -> Result<Option<Checkpoint>> {
        let state: Option<String> = self
            .conn()?
            .query_row(
                "SELECT state FROM checkpoints WHERE trail = ?1",
                params![trail],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        state
            .map(|s| serde_json::from_str(&s).map_err(|e| StreamError::persistence(SINK, e)))
            .transpose()
    }

    fn save_checkpoint(&self, trail: &str, checkpoint: &Checkpoint) -> Result<()> {
        let state = serde_json::to_string(checkpoint).map_err(|e| StreamError::persistence(SINK, e))?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO checkpoints (trail, state, updated_at) VALUES (?1, ?2, ?3)",
                params![trail, state, Utc::now().timestamp_millis()],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

/// Anomaly sink writing into a shared [`SecureStore`].
pub struct StoreSink {
    store: Arc<SecureStore>,
    trail: String,
    name: String,
}

impl AnomalySink for StoreSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, rows: &[ScoredEvent]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.store.insert_anomalies(&self.trail, rows)
    }
}
