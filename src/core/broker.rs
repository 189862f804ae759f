use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the single waist for engine state access.
///
/// Every read goes through `with_conn`, every mutation through `with_tx`, which
/// wraps the closure in one IMMEDIATE SQLite transaction: commit on `Ok`,
/// rollback on `Err`. Both append an audit event to `broker.events.jsonl`.
#[derive(Debug)]
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
    busy_timeout: Duration,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub mission_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

// In-process serialization of store access.
static DB_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path, busy_timeout: Duration) -> Self {
        Self {
            db_path: db::engine_db_path(root),
            audit_log_path: root.join(AUDIT_LOG_NAME),
            busy_timeout,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a read-only closure with a serialized connection.
    pub fn with_conn<F, R>(
        &self,
        actor: &str,
        mission_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::MissionError>
    where
        F: FnOnce(&Connection) -> Result<R, error::MissionError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout)?;

        let result = f(&conn);
        self.audit(actor, mission_ref, op_name, result.as_ref().err());
        result
    }

    /// Execute a closure inside one all-or-nothing transaction.
    pub fn with_tx<F, R>(
        &self,
        actor: &str,
        mission_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::MissionError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, error::MissionError>,
    {
        self.with_tx_resolved(actor, mission_ref, op_name, |tx| f(tx).map(|v| (v, None)))
    }

    /// Like `with_tx`, but the closure may name the mission it touched.
    ///
    /// A mission id returned by the closure replaces `mission_ref` on the
    /// audit event. Once the commit succeeds the result is returned even if
    /// the audit append fails.
    pub fn with_tx_resolved<F, R>(
        &self,
        actor: &str,
        mission_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::MissionError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<(R, Option<String>), error::MissionError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut conn = db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout)?;

        let result: Result<(R, Option<String>), error::MissionError> = (|| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })();

        match result {
            Ok((value, resolved)) => {
                self.audit(actor, resolved.as_deref().or(mission_ref), op_name, None);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!(op = op_name, error = %e, "transaction rolled back");
                self.audit(actor, mission_ref, op_name, Some(&e));
                Err(e)
            }
        }
    }

    // The store outcome stands regardless of whether the audit line lands.
    fn audit(
        &self,
        actor: &str,
        mission_ref: Option<&str>,
        op: &str,
        failure: Option<&error::MissionError>,
    ) {
        if let Err(e) = self.log_event(actor, mission_ref, op, failure) {
            tracing::warn!(
                op,
                path = %self.audit_log_path.display(),
                error = %e,
                "audit log append failed"
            );
        }
    }

    fn log_event(
        &self,
        actor: &str,
        mission_ref: Option<&str>,
        op: &str,
        failure: Option<&error::MissionError>,
    ) -> Result<(), error::MissionError> {
        let db_id = self
            .db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            mission_ref: mission_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id,
            status: if failure.is_none() { "success" } else { "error" }.to_string(),
            error_kind: failure.map(|e| e.kind().to_string()),
        };

        if let Some(parent) = self.audit_log_path.parent() {
            fs::create_dir_all(parent).map_err(error::MissionError::IoError)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::MissionError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(error::MissionError::IoError)?;
        Ok(())
    }
}

/// Read the broker audit log, oldest first. A missing log reads as empty.
pub fn read_audit_log(root: &Path) -> Result<Vec<BrokerEvent>, error::MissionError> {
    let path = root.join(AUDIT_LOG_NAME);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(&path).map_err(error::MissionError::IoError)?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(error::MissionError::IoError)?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}
