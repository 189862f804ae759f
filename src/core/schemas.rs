//! Centralized database schema definitions for the missionctl engine store.
//!
//! All engine state lives in a single SQLite database (`engine.db`):
//! 1. missions / hops / tool_steps: the orchestration entities.
//! 2. assets: mission- and hop-scoped data items, keyed by (scope, scope id, id).
//! 3. transactions: the ledger of every dispatcher transaction applied.

pub const ENGINE_DB_NAME: &str = "engine.db";
pub const ENGINE_SCHEMA_VERSION: u32 = 1;

pub const ENGINE_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const ENGINE_DB_SCHEMA_MISSIONS: &str = "
    CREATE TABLE IF NOT EXISTS missions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        goal TEXT NOT NULL DEFAULT '',
        success_criteria TEXT NOT NULL DEFAULT '[]', -- JSON array of strings
        status TEXT NOT NULL,
        current_hop_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const ENGINE_DB_SCHEMA_HOPS: &str = "
    CREATE TABLE IF NOT EXISTS hops (
        id TEXT PRIMARY KEY,
        mission_id TEXT NOT NULL,
        sequence_order INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        is_final INTEGER NOT NULL DEFAULT 0,
        is_resolved INTEGER NOT NULL DEFAULT 0,
        input_mapping TEXT NOT NULL DEFAULT '{}',  -- JSON object local key -> mission asset id
        output_mapping TEXT NOT NULL DEFAULT '{}', -- JSON object local key -> mission asset id
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(mission_id, sequence_order),
        FOREIGN KEY(mission_id) REFERENCES missions(id)
    )
";

pub const ENGINE_DB_SCHEMA_TOOL_STEPS: &str = "
    CREATE TABLE IF NOT EXISTS tool_steps (
        id TEXT PRIMARY KEY,
        hop_id TEXT NOT NULL,
        tool_id TEXT NOT NULL,
        step_index INTEGER NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        parameter_mapping TEXT NOT NULL DEFAULT '{}',
        result_mapping TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(hop_id, step_index),
        FOREIGN KEY(hop_id) REFERENCES hops(id)
    )
";

pub const ENGINE_DB_SCHEMA_ASSETS: &str = "
    CREATE TABLE IF NOT EXISTS assets (
        scope_kind TEXT NOT NULL,
        scope_id TEXT NOT NULL,
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        schema_json TEXT NOT NULL,
        status TEXT NOT NULL,
        role TEXT NOT NULL,
        value_json TEXT NOT NULL DEFAULT 'null',
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY(scope_kind, scope_id, id)
    )
";

pub const ENGINE_DB_SCHEMA_TRANSACTIONS: &str = "
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        tx_type TEXT NOT NULL,
        mission_id TEXT,
        entity_id TEXT NOT NULL,
        resulting_status TEXT NOT NULL,
        payload_hash TEXT NOT NULL,
        message TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
";

pub const ENGINE_DB_INDEX_HOPS_MISSION: &str =
    "CREATE INDEX IF NOT EXISTS idx_hops_mission ON hops(mission_id, sequence_order)";
pub const ENGINE_DB_INDEX_STEPS_HOP: &str =
    "CREATE INDEX IF NOT EXISTS idx_tool_steps_hop ON tool_steps(hop_id, step_index)";
pub const ENGINE_DB_INDEX_MISSIONS_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_missions_status ON missions(status)";
pub const ENGINE_DB_INDEX_TRANSACTIONS_MISSION: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_mission ON transactions(mission_id, created_at)";

/// Ordered DDL applied by `db::initialize_engine_db`.
pub const ENGINE_DB_DDL: &[&str] = &[
    ENGINE_DB_SCHEMA_META,
    ENGINE_DB_SCHEMA_MISSIONS,
    ENGINE_DB_SCHEMA_HOPS,
    ENGINE_DB_SCHEMA_TOOL_STEPS,
    ENGINE_DB_SCHEMA_ASSETS,
    ENGINE_DB_SCHEMA_TRANSACTIONS,
    ENGINE_DB_INDEX_HOPS_MISSION,
    ENGINE_DB_INDEX_STEPS_HOP,
    ENGINE_DB_INDEX_MISSIONS_STATUS,
    ENGINE_DB_INDEX_TRANSACTIONS_MISSION,
];
