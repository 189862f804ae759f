//! Asset scope mapper: moves assets between a mission and one of its hops.
//!
//! Inputs are copied mission -> hop under the hop's local keys; outputs are
//! promoted hop -> mission on hop completion. Cross-scope links are only
//! ever id-keyed mappings, never shared rows.

use crate::core::error::MissionError;
use crate::core::time;
use crate::engine::model::{
    Asset, AssetRole, AssetSchema, AssetScope, AssetStatus, Hop, is_valid_asset_key,
};
use crate::engine::repo;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Provenance keys stamped into asset metadata.
pub const META_COPIED_FROM_MISSION: &str = "copied_from_mission";
pub const META_SOURCE_ASSET_ID: &str = "source_asset_id";
pub const META_PROMOTED_FROM_HOP: &str = "promoted_from_hop";
pub const META_PROMOTED_AT: &str = "promoted_at";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromotionOptions {
    /// Promote non-READY outputs with their own status instead of skipping them.
    pub promote_unready_outputs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPromotion {
    pub local_key: String,
    pub status: AssetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Mission asset ids written, in hop-key order.
    pub promoted: Vec<String>,
    pub skipped: Vec<SkippedPromotion>,
}

fn check_key(key: &str, what: &str) -> Result<(), MissionError> {
    if is_valid_asset_key(key) {
        Ok(())
    } else {
        Err(MissionError::MappingError(format!(
            "invalid {} '{}': allowed characters are [A-Za-z0-9_.:-], 1-128 long",
            what, key
        )))
    }
}

fn load_owned_hop(conn: &Connection, mission_id: &str, hop_id: &str) -> Result<Hop, MissionError> {
    repo::load_mission(conn, mission_id)?;
    let hop = repo::load_hop(conn, hop_id)?;
    if hop.mission_id != mission_id {
        return Err(MissionError::NotFound(format!(
            "hop '{}' in mission '{}'",
            hop_id, mission_id
        )));
    }
    Ok(hop)
}

/// Copy mapped mission assets into hop scope under their local keys.
///
/// Role is preserved; status is READY only if the mission asset is READY,
/// otherwise PENDING. Re-running with the same mapping overwrites the same
/// (hop, local key) rows, so no duplicate keys appear.
pub fn copy_to_hop(
    conn: &Connection,
    mission_id: &str,
    hop_id: &str,
    mapping: &BTreeMap<String, String>,
) -> Result<Vec<Asset>, MissionError> {
    load_owned_hop(conn, mission_id, hop_id)?;
    let mission_scope = AssetScope::mission(mission_id);
    let mut copied = Vec::with_capacity(mapping.len());

    for (local_key, mission_asset_id) in mapping {
        check_key(local_key, "local key")?;
        let source = repo::get_asset(conn, &mission_scope, mission_asset_id)?.ok_or_else(|| {
            MissionError::MappingError(format!(
                "input '{}' maps to mission asset '{}' which does not exist in mission '{}'",
                local_key, mission_asset_id, mission_id
            ))
        })?;

        let mut metadata = source.metadata.clone();
        metadata.insert(META_COPIED_FROM_MISSION.to_string(), json!(mission_id));
        metadata.insert(META_SOURCE_ASSET_ID.to_string(), json!(mission_asset_id));

        let asset = Asset {
            id: local_key.clone(),
            name: source.name.clone(),
            schema: source.schema.clone(),
            status: if source.is_ready() {
                AssetStatus::Ready
            } else {
                AssetStatus::Pending
            },
            role: source.role,
            scope: AssetScope::hop(hop_id),
            value: source.value.clone(),
            metadata,
        };
        repo::upsert_asset(conn, &asset)?;
        copied.push(asset);
    }

    tracing::debug!(mission_id, hop_id, count = copied.len(), "copied inputs to hop");
    Ok(copied)
}

/// Give every output-mapping key a PENDING output asset in hop scope.
///
/// The schema comes from the mapped mission asset. A mission asset that does
/// not exist yet is declared in mission scope as a PROPOSED output so that
/// promotion always has a target. A key that is already present (an in/out
/// key copied as an input) keeps its value and is re-tagged as an output.
pub fn declare_hop_outputs(
    conn: &Connection,
    mission_id: &str,
    hop_id: &str,
    output_mapping: &BTreeMap<String, String>,
) -> Result<Vec<Asset>, MissionError> {
    load_owned_hop(conn, mission_id, hop_id)?;
    let mission_scope = AssetScope::mission(mission_id);
    let hop_scope = AssetScope::hop(hop_id);
    let mut declared = Vec::with_capacity(output_mapping.len());

    for (local_key, mission_asset_id) in output_mapping {
        check_key(local_key, "local key")?;
        check_key(mission_asset_id, "mission asset id")?;

        let target = match repo::get_asset(conn, &mission_scope, mission_asset_id)? {
            Some(existing) => existing,
            None => {
                let placeholder = Asset {
                    id: mission_asset_id.clone(),
                    name: mission_asset_id.clone(),
                    schema: AssetSchema::default(),
                    status: AssetStatus::Proposed,
                    role: AssetRole::Output,
                    scope: mission_scope.clone(),
                    value: Value::Null,
                    metadata: serde_json::Map::new(),
                };
                repo::upsert_asset(conn, &placeholder)?;
                placeholder
            }
        };

        let asset = match repo::get_asset(conn, &hop_scope, local_key)? {
            Some(mut existing) => {
                existing.role = AssetRole::Output;
                existing
            }
            None => Asset {
                id: local_key.clone(),
                name: target.name.clone(),
                schema: target.schema.clone(),
                status: AssetStatus::Pending,
                role: AssetRole::Output,
                scope: hop_scope.clone(),
                value: Value::Null,
                metadata: serde_json::Map::new(),
            },
        };
        repo::upsert_asset(conn, &asset)?;
        declared.push(asset);
    }
    Ok(declared)
}

/// Write tool-executor results into hop assets and mark them READY.
///
/// A key with no hop asset is accepted only if the hop's output mapping
/// names it; it is then created as an output asset.
pub fn record_outputs(
    conn: &Connection,
    hop: &Hop,
    outputs: &BTreeMap<String, Value>,
) -> Result<Vec<Asset>, MissionError> {
    let hop_scope = AssetScope::hop(&hop.id);
    let mut written = Vec::with_capacity(outputs.len());

    for (local_key, value) in outputs {
        let mut asset = match repo::get_asset(conn, &hop_scope, local_key)? {
            Some(existing) => existing,
            None if hop.output_mapping.contains_key(local_key) => Asset {
                id: local_key.clone(),
                name: local_key.clone(),
                schema: AssetSchema::default(),
                status: AssetStatus::Pending,
                role: AssetRole::Output,
                scope: hop_scope.clone(),
                value: Value::Null,
                metadata: serde_json::Map::new(),
            },
            None => {
                return Err(MissionError::MappingError(format!(
                    "output '{}' is neither a hop asset nor in the output mapping of hop '{}'",
                    local_key, hop.id
                )));
            }
        };
        asset.value = value.clone();
        asset.status = AssetStatus::Ready;
        repo::upsert_asset(conn, &asset)?;
        written.push(asset);
    }
    Ok(written)
}

/// Promote the hop's output assets into mission scope.
///
/// Target id is the mission asset named by the hop's output mapping for the
/// local key, or the hop asset's own id when the key is unmapped. Non-output
/// assets are ignored, as are assets copied in from the mission whose key the
/// output mapping does not name. Non-READY outputs are skipped unless
/// `promote_unready_outputs` is set.
pub fn promote_to_mission(
    conn: &Connection,
    mission_id: &str,
    hop_id: &str,
    options: PromotionOptions,
) -> Result<PromotionReport, MissionError> {
    let hop = load_owned_hop(conn, mission_id, hop_id)?;
    let mission_scope = AssetScope::mission(mission_id);
    let mut report = PromotionReport::default();
    let now = time::now_epoch_z();

    for asset in repo::list_assets(conn, &AssetScope::hop(hop_id))? {
        if asset.role != AssetRole::Output {
            continue;
        }
        // A copied input only flows back when the plan maps it as an output.
        if asset.metadata.contains_key(META_COPIED_FROM_MISSION)
            && !hop.output_mapping.contains_key(&asset.id)
        {
            tracing::debug!(hop_id, key = %asset.id, "skipping unmapped copied input");
            continue;
        }
        if !asset.is_ready() && !options.promote_unready_outputs {
            tracing::debug!(hop_id, key = %asset.id, status = %asset.status, "skipping non-ready output");
            report.skipped.push(SkippedPromotion {
                local_key: asset.id.clone(),
                status: asset.status,
            });
            continue;
        }

        let target_id = hop
            .output_mapping
            .get(&asset.id)
            .cloned()
            .unwrap_or_else(|| asset.id.clone());
        check_key(&target_id, "mission asset id")?;

        let mut target = match repo::get_asset(conn, &mission_scope, &target_id)? {
            Some(existing) => existing,
            None => Asset {
                id: target_id.clone(),
                name: asset.name.clone(),
                schema: asset.schema.clone(),
                status: AssetStatus::Pending,
                role: AssetRole::Output,
                scope: mission_scope.clone(),
                value: Value::Null,
                metadata: serde_json::Map::new(),
            },
        };
        target.value = asset.value.clone();
        target.status = if asset.is_ready() {
            AssetStatus::Ready
        } else {
            asset.status
        };
        target
            .metadata
            .insert(META_PROMOTED_FROM_HOP.to_string(), json!(hop_id));
        target
            .metadata
            .insert(META_PROMOTED_AT.to_string(), json!(now));
        repo::upsert_asset(conn, &target)?;
        report.promoted.push(target_id);
    }

    tracing::debug!(
        mission_id,
        hop_id,
        promoted = report.promoted.len(),
        skipped = report.skipped.len(),
        "promoted hop outputs"
    );
    Ok(report)
}
