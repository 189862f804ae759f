//! Persistence for engine entities.
//!
//! Every function takes a `&Connection`; a `rusqlite::Transaction` derefs to
//! one, so the dispatcher runs all of these inside a single broker
//! transaction. Reads return `Ok(None)` for a missing row; the `load_*`
//! variants turn that into `NotFound`.

use crate::core::error::MissionError;
use crate::core::time;
use crate::engine::model::{
    Asset, AssetScope, Hop, HopSnapshot, Mission, MissionState, MissionStatus,
    ScopeKind, ToolStep, ToolStepStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Convert a rusqlite error, surfacing bad column contents as `Corrupt`.
fn storage_err(e: rusqlite::Error) -> MissionError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(idx, _, inner) => {
            MissionError::Corrupt(format!("column {}: {}", idx, inner))
        }
        other => MissionError::RusqliteError(other),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, MissionError> {
    Ok(serde_json::to_string(value)?)
}

// --- Missions ---

const MISSION_COLUMNS: &str =
    "id, name, goal, success_criteria, status, current_hop_id, created_at, updated_at";

fn mission_from_row(row: &Row<'_>) -> rusqlite::Result<Mission> {
    Ok(Mission {
        id: row.get(0)?,
        name: row.get(1)?,
        goal: row.get(2)?,
        success_criteria: json_col(row, 3)?,
        status: row.get(4)?,
        current_hop_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn insert_mission(conn: &Connection, mission: &Mission) -> Result<(), MissionError> {
    conn.execute(
        "INSERT INTO missions(id, name, goal, success_criteria, status, current_hop_id, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            mission.id,
            mission.name,
            mission.goal,
            to_json(&mission.success_criteria)?,
            mission.status,
            mission.current_hop_id,
            mission.created_at,
            mission.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_mission(conn: &Connection, mission_id: &str) -> Result<Option<Mission>, MissionError> {
    conn.query_row(
        &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = ?1"),
        params![mission_id],
        mission_from_row,
    )
    .optional()
    .map_err(storage_err)
}

pub fn load_mission(conn: &Connection, mission_id: &str) -> Result<Mission, MissionError> {
    get_mission(conn, mission_id)?
        .ok_or_else(|| MissionError::NotFound(format!("mission '{}'", mission_id)))
}

/// Persist status and current-hop pointer; stamps `updated_at` on the struct.
pub fn update_mission(conn: &Connection, mission: &mut Mission) -> Result<(), MissionError> {
    mission.updated_at = time::now_epoch_z();
    let updated = conn.execute(
        "UPDATE missions SET status = ?1, current_hop_id = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            mission.status,
            mission.current_hop_id,
            mission.updated_at,
            mission.id
        ],
    )?;
    if updated == 0 {
        return Err(MissionError::NotFound(format!("mission '{}'", mission.id)));
    }
    Ok(())
}

pub fn list_missions(
    conn: &Connection,
    status_filter: Option<MissionStatus>,
) -> Result<Vec<Mission>, MissionError> {
    let mut out = Vec::new();
    match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MISSION_COLUMNS} FROM missions WHERE status = ?1 ORDER BY created_at, id"
            ))?;
            for row in stmt.query_map(params![status], mission_from_row)? {
                out.push(row.map_err(storage_err)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MISSION_COLUMNS} FROM missions ORDER BY created_at, id"
            ))?;
            for row in stmt.query_map([], mission_from_row)? {
                out.push(row.map_err(storage_err)?);
            }
        }
    }
    Ok(out)
}

// --- Hops ---

const HOP_COLUMNS: &str = "id, mission_id, sequence_order, name, description, status, is_final, \
     is_resolved, input_mapping, output_mapping, version, created_at, updated_at";

fn hop_from_row(row: &Row<'_>) -> rusqlite::Result<Hop> {
    Ok(Hop {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        sequence_order: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        is_final: row.get(6)?,
        is_resolved: row.get(7)?,
        input_mapping: json_col(row, 8)?,
        output_mapping: json_col(row, 9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub fn insert_hop(conn: &Connection, hop: &Hop) -> Result<(), MissionError> {
    conn.execute(
        "INSERT INTO hops(id, mission_id, sequence_order, name, description, status, is_final,
                          is_resolved, input_mapping, output_mapping, version, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            hop.id,
            hop.mission_id,
            hop.sequence_order,
            hop.name,
            hop.description,
            hop.status,
            hop.is_final,
            hop.is_resolved,
            to_json(&hop.input_mapping)?,
            to_json(&hop.output_mapping)?,
            hop.version,
            hop.created_at,
            hop.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_hop(conn: &Connection, hop_id: &str) -> Result<Option<Hop>, MissionError> {
    conn.query_row(
        &format!("SELECT {HOP_COLUMNS} FROM hops WHERE id = ?1"),
        params![hop_id],
        hop_from_row,
    )
    .optional()
    .map_err(storage_err)
}

pub fn load_hop(conn: &Connection, hop_id: &str) -> Result<Hop, MissionError> {
    get_hop(conn, hop_id)?.ok_or_else(|| MissionError::NotFound(format!("hop '{}'", hop_id)))
}

/// Persist status, resolution flag and version; stamps `updated_at`.
pub fn update_hop(conn: &Connection, hop: &mut Hop) -> Result<(), MissionError> {
    hop.updated_at = time::now_epoch_z();
    let updated = conn.execute(
        "UPDATE hops SET status = ?1, is_resolved = ?2, version = ?3, updated_at = ?4 WHERE id = ?5",
        params![hop.status, hop.is_resolved, hop.version, hop.updated_at, hop.id],
    )?;
    if updated == 0 {
        return Err(MissionError::NotFound(format!("hop '{}'", hop.id)));
    }
    Ok(())
}

/// Hops of a mission ordered by sequence.
pub fn list_hops(conn: &Connection, mission_id: &str) -> Result<Vec<Hop>, MissionError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOP_COLUMNS} FROM hops WHERE mission_id = ?1 ORDER BY sequence_order"
    ))?;
    let mut out = Vec::new();
    for row in stmt.query_map(params![mission_id], hop_from_row)? {
        out.push(row.map_err(storage_err)?);
    }
    Ok(out)
}

pub fn next_sequence_order(conn: &Connection, mission_id: &str) -> Result<u32, MissionError> {
    let max: Option<u32> = conn.query_row(
        "SELECT MAX(sequence_order) FROM hops WHERE mission_id = ?1",
        params![mission_id],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |m| m + 1))
}

// --- Tool steps ---

const STEP_COLUMNS: &str =
    "id, hop_id, tool_id, step_index, description, parameter_mapping, result_mapping, status";

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<ToolStep> {
    Ok(ToolStep {
        id: row.get(0)?,
        hop_id: row.get(1)?,
        tool_id: row.get(2)?,
        index: row.get(3)?,
        description: row.get(4)?,
        parameter_mapping: json_col(row, 5)?,
        result_mapping: json_col(row, 6)?,
        status: row.get(7)?,
    })
}

pub fn insert_tool_step(conn: &Connection, step: &ToolStep) -> Result<(), MissionError> {
    let now = time::now_epoch_z();
    conn.execute(
        "INSERT INTO tool_steps(id, hop_id, tool_id, step_index, description, parameter_mapping,
                                result_mapping, status, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            step.id,
            step.hop_id,
            step.tool_id,
            step.index,
            step.description,
            to_json(&step.parameter_mapping)?,
            to_json(&step.result_mapping)?,
            step.status,
            now,
        ],
    )?;
    Ok(())
}

pub fn list_tool_steps(conn: &Connection, hop_id: &str) -> Result<Vec<ToolStep>, MissionError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM tool_steps WHERE hop_id = ?1 ORDER BY step_index"
    ))?;
    let mut out = Vec::new();
    for row in stmt.query_map(params![hop_id], step_from_row)? {
        out.push(row.map_err(storage_err)?);
    }
    Ok(out)
}

pub fn delete_tool_steps(conn: &Connection, hop_id: &str) -> Result<usize, MissionError> {
    Ok(conn.execute("DELETE FROM tool_steps WHERE hop_id = ?1", params![hop_id])?)
}

/// Move every step of a hop currently in one of `from` to `to`.
pub fn set_tool_step_status(
    conn: &Connection,
    hop_id: &str,
    from: &[ToolStepStatus],
    to: ToolStepStatus,
) -> Result<usize, MissionError> {
    let now = time::now_epoch_z();
    let mut changed = 0;
    for status in from {
        changed += conn.execute(
            "UPDATE tool_steps SET status = ?1, updated_at = ?2 WHERE hop_id = ?3 AND status = ?4",
            params![to, now, hop_id, status],
        )?;
    }
    Ok(changed)
}

// --- Assets ---

const ASSET_COLUMNS: &str =
    "scope_kind, scope_id, id, name, schema_json, status, role, value_json, metadata_json";

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        scope: AssetScope {
            kind: row.get(0)?,
            id: row.get(1)?,
        },
        id: row.get(2)?,
        name: row.get(3)?,
        schema: json_col(row, 4)?,
        status: row.get(5)?,
        role: row.get(6)?,
        value: json_col(row, 7)?,
        metadata: json_col(row, 8)?,
    })
}

pub fn get_asset(
    conn: &Connection,
    scope: &AssetScope,
    asset_id: &str,
) -> Result<Option<Asset>, MissionError> {
    conn.query_row(
        &format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE scope_kind = ?1 AND scope_id = ?2 AND id = ?3"
        ),
        params![scope.kind, scope.id, asset_id],
        asset_from_row,
    )
    .optional()
    .map_err(storage_err)
}

/// Insert or replace an asset keyed by (scope, id). `created_at` survives updates.
pub fn upsert_asset(conn: &Connection, asset: &Asset) -> Result<(), MissionError> {
    let now = time::now_epoch_z();
    conn.execute(
        "INSERT INTO assets(scope_kind, scope_id, id, name, schema_json, status, role,
                            value_json, metadata_json, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(scope_kind, scope_id, id) DO UPDATE SET
            name = excluded.name,
            schema_json = excluded.schema_json,
            status = excluded.status,
            role = excluded.role,
            value_json = excluded.value_json,
            metadata_json = excluded.metadata_json,
            updated_at = excluded.updated_at",
        params![
            asset.scope.kind,
            asset.scope.id,
            asset.id,
            asset.name,
            to_json(&asset.schema)?,
            asset.status,
            asset.role,
            to_json(&asset.value)?,
            to_json(&asset.metadata)?,
            now,
        ],
    )?;
    Ok(())
}

/// Scoped query: all assets of one mission or hop, ordered by id.
pub fn list_assets(conn: &Connection, scope: &AssetScope) -> Result<Vec<Asset>, MissionError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets WHERE scope_kind = ?1 AND scope_id = ?2 ORDER BY id"
    ))?;
    let mut out = Vec::new();
    for row in stmt.query_map(params![scope.kind, scope.id], asset_from_row)? {
        out.push(row.map_err(storage_err)?);
    }
    Ok(out)
}

/// True when the scope id references a live mission or hop row.
pub fn scope_exists(conn: &Connection, scope: &AssetScope) -> Result<bool, MissionError> {
    Ok(match scope.kind {
        ScopeKind::Mission => get_mission(conn, &scope.id)?.is_some(),
        ScopeKind::Hop => get_hop(conn, &scope.id)?.is_some(),
    })
}

// --- Aggregates ---

pub fn load_hop_snapshot(conn: &Connection, hop_id: &str) -> Result<HopSnapshot, MissionError> {
    let hop = load_hop(conn, hop_id)?;
    let tool_steps = list_tool_steps(conn, hop_id)?;
    let assets: BTreeMap<String, Asset> = list_assets(conn, &AssetScope::hop(hop_id))?
        .into_iter()
        .map(|a| (a.id.clone(), a))
        .collect();
    Ok(HopSnapshot {
        hop,
        tool_steps,
        assets,
    })
}

pub fn load_mission_state(conn: &Connection, mission_id: &str) -> Result<MissionState, MissionError> {
    let mission = load_mission(conn, mission_id)?;
    let hop_history = list_hops(conn, mission_id)?;
    let current_hop = match &mission.current_hop_id {
        Some(hop_id) => Some(
            hop_history
                .iter()
                .find(|h| &h.id == hop_id)
                .cloned()
                .map_or_else(|| load_hop(conn, hop_id), Ok)?,
        ),
        None => None,
    };
    Ok(MissionState {
        mission,
        current_hop,
        hop_history,
    })
}

// --- Transaction ledger ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub tx_type: String,
    pub mission_id: Option<String>,
    pub entity_id: String,
    pub resulting_status: String,
    pub payload_hash: String,
    pub message: String,
    pub created_at: String,
}

pub fn insert_ledger_entry(conn: &Connection, entry: &LedgerEntry) -> Result<(), MissionError> {
    conn.execute(
        "INSERT INTO transactions(id, tx_type, mission_id, entity_id, resulting_status,
                                  payload_hash, message, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.id,
            entry.tx_type,
            entry.mission_id,
            entry.entity_id,
            entry.resulting_status,
            entry.payload_hash,
            entry.message,
            entry.created_at,
        ],
    )?;
    Ok(())
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        tx_type: row.get(1)?,
        mission_id: row.get(2)?,
        entity_id: row.get(3)?,
        resulting_status: row.get(4)?,
        payload_hash: row.get(5)?,
        message: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Ledger entries in insertion order.
pub fn list_ledger(
    conn: &Connection,
    mission_id: Option<&str>,
) -> Result<Vec<LedgerEntry>, MissionError> {
    let base = "SELECT id, tx_type, mission_id, entity_id, resulting_status, payload_hash, message, created_at
                FROM transactions";
    let mut out = Vec::new();
    match mission_id {
        Some(mid) => {
            let mut stmt = conn.prepare(&format!("{base} WHERE mission_id = ?1 ORDER BY rowid"))?;
            for row in stmt.query_map(params![mid], ledger_from_row)? {
                out.push(row.map_err(storage_err)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!("{base} ORDER BY rowid"))?;
            for row in stmt.query_map([], ledger_from_row)? {
                out.push(row.map_err(storage_err)?);
            }
        }
    }
    Ok(out)
}
