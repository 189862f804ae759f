//! missionctl: a local-first mission orchestration engine
//!
//! **missionctl advances missions, hops and tool steps through atomic,
//! precondition-checked transactions.**
//!
//! A mission is a goal with success criteria. It is worked through a
//! sequence of hops; each hop copies its inputs from the mission, runs an
//! ordered chain of tool steps, and promotes its outputs back to the
//! mission when it completes.
//!
//! # Core Principles
//!
//! - **Local-first**: all state lives in `<project>/.missionctl/data/engine.db`
//! - **Atomic**: every transaction commits entirely or not at all
//! - **Explicit**: a stale or out-of-order call fails with `IllegalStateTransition`
//! - **Auditable**: every call is ledgered and logged to `broker.events.jsonl`
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All state access routes through `DbBroker`:
//! - Serialization (in-process lock, IMMEDIATE SQLite transactions)
//! - Audit logging (`broker.events.jsonl`)
//!
//! ## Transactions
//!
//! `PROPOSE_MISSION`, `ACCEPT_MISSION`, `PROPOSE_HOP_PLAN`, `ACCEPT_HOP_PLAN`,
//! `PROPOSE_HOP_IMPL`, `ACCEPT_HOP_IMPL`, `EXECUTE_HOP`, `COMPLETE_HOP`,
//! `COMPLETE_MISSION`, plus `terminate` and `complete_hop_if_finished`.
//!
//! # Examples
//!
//! ```bash
//! missionctl init
//! missionctl apply PROPOSE_MISSION --payload '{"name": "Quarterly report"}'
//! missionctl route --mission M_01J...
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store, broker, config, logging, errors
//! - [`engine`]: model, scope mapper, validator, lifecycle, dispatcher, router

mod cli;
pub mod core;
pub mod engine;

use crate::cli::{
    ApplyCli, Cli, Command, HopCommand, MissionCommand, OutcomeArg, OutputFormat, ScopeArg,
};
use crate::core::{config, error::MissionError, logging, output, store, time};
use crate::engine::dispatcher::{ToolStepProposal, TransactionResult};
use crate::engine::model::{Asset, AssetScope, MissionStatus};
use crate::engine::{EngineContext, Termination, TerminationTarget, TransactionType};

use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment override for the project root.
pub const ROOT_ENV_VAR: &str = "MISSIONCTL_ROOT";

const PREVIEW_CHARS: usize = 72;
const PREVIEW_ITEMS: usize = 20;

/// Error envelope printed on stderr when a command fails.
pub fn error_envelope(err: &MissionError) -> Value {
    let mut detail = json!({
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let MissionError::ValidationError(issues) = err {
        detail["issues"] = serde_json::to_value(issues).unwrap_or(Value::Null);
    }
    time::command_envelope("missionctl", "error", json!({ "success": false, "error": detail }))
}

fn resolve_project_root(explicit: Option<PathBuf>, cwd: &Path) -> Result<PathBuf, MissionError> {
    let candidate = explicit.or_else(|| std::env::var_os(ROOT_ENV_VAR).map(PathBuf::from));
    match candidate {
        Some(root) => {
            if root.join(store::PROJECT_DIR_NAME).is_dir() {
                Ok(root)
            } else {
                Err(MissionError::NotFound(format!(
                    "no {} in {}; run `missionctl init`",
                    store::PROJECT_DIR_NAME,
                    root.display()
                )))
            }
        }
        None => store::find_project_root(cwd).ok_or_else(|| {
            MissionError::NotFound(format!(
                "no {} found from {}; run `missionctl init`",
                store::PROJECT_DIR_NAME,
                cwd.display()
            ))
        }),
    }
}

fn emit<T: Serialize>(
    format: OutputFormat,
    cmd: &str,
    result: &T,
    text: impl FnOnce() -> String,
) -> Result<(), MissionError> {
    match format {
        OutputFormat::Json => {
            let envelope = time::command_envelope(
                cmd,
                "ok",
                json!({ "success": true, "result": serde_json::to_value(result)? }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn render_result(result: &TransactionResult) -> String {
    format!(
        "{} {} {} -> {}\n  {}",
        "✓".green().bold(),
        result.tx_type.bold(),
        result.entity_id,
        output::status_badge(&result.status),
        output::compact_line(&result.message, 120)
    )
}

fn render_assets(assets: &[Asset]) -> String {
    if assets.is_empty() {
        return "  (no assets)".to_string();
    }
    assets
        .iter()
        .map(|a| {
            format!(
                "  {:<24} {:<12} {:<12} {}",
                a.id,
                output::status_badge(a.status.as_str()),
                a.role,
                output::compact_value(&a.value, PREVIEW_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_json_file(path: &Path) -> Result<Value, MissionError> {
    let raw = fs::read_to_string(path).map_err(MissionError::IoError)?;
    serde_json::from_str(&raw)
        .map_err(|e| MissionError::InvalidPayload(format!("{}: {}", path.display(), e)))
}

fn init_project(dir: &Path, format: OutputFormat) -> Result<(), MissionError> {
    fs::create_dir_all(dir).map_err(MissionError::IoError)?;
    let wrote_config = config::write_default_config(dir)?;
    let ctx = EngineContext::open_project(dir)?;
    let result = json!({
        "project_root": dir.display().to_string(),
        "data_root": ctx.store.root.display().to_string(),
        "config_written": wrote_config,
    });
    emit(format, "init", &result, || {
        format!(
            "{} initialized {}{}",
            "✓".green().bold(),
            store::config_path(dir)
                .parent()
                .unwrap_or(dir)
                .display(),
            if wrote_config { "" } else { " (existing config kept)" }
        )
    })
}

fn run_apply(ctx: &EngineContext, cli: ApplyCli, format: OutputFormat) -> Result<(), MissionError> {
    let tx_type = TransactionType::parse(&cli.transaction)?;
    let payload = match (cli.payload, cli.payload_file) {
        (Some(inline), _) => serde_json::from_str(&inline)
            .map_err(|e| MissionError::InvalidPayload(format!("--payload: {}", e)))?,
        (None, Some(path)) => read_json_file(&path)?,
        (None, None) => {
            return Err(MissionError::InvalidPayload(
                "--payload or --payload-file is required".to_string(),
            ));
        }
    };
    let result = ctx.dispatcher().apply_json(tx_type, payload)?;
    emit(format, "apply", &result, || render_result(&result))
}

fn run_command(
    ctx: &EngineContext,
    command: Command,
    format: OutputFormat,
) -> Result<(), MissionError> {
    match command {
        Command::Init { .. } => Ok(()),
        Command::Apply(apply) => run_apply(ctx, apply, format),

        Command::Mission(mission) => match mission.command {
            MissionCommand::Show { id } => {
                let state = ctx.mission_state(&id)?;
                emit(format, "mission.show", &state, || {
                    let m = &state.mission;
                    let mut lines = vec![
                        format!("{} {}  {}", m.id.bold(), m.name, output::status_badge(m.status.as_str())),
                        format!("  goal: {}", output::compact_line(&m.goal, 120)),
                        format!(
                            "  current hop: {}",
                            m.current_hop_id.as_deref().unwrap_or("-")
                        ),
                    ];
                    if !m.success_criteria.is_empty() {
                        lines.push("  success criteria:".to_string());
                        lines.push(output::bullet_list(
                            &m.success_criteria,
                            PREVIEW_ITEMS,
                            PREVIEW_CHARS,
                        ));
                    }
                    for hop in &state.hop_history {
                        lines.push(format!(
                            "  #{} {} {} {}{}",
                            hop.sequence_order,
                            hop.id,
                            hop.name,
                            output::status_badge(hop.status.as_str()),
                            if hop.is_final { " (final)" } else { "" }
                        ));
                    }
                    lines.join("\n")
                })
            }
            MissionCommand::List { status } => {
                let status = status
                    .as_deref()
                    .map(|raw| {
                        MissionStatus::parse(&raw.to_ascii_uppercase()).map_err(|_| {
                            MissionError::InvalidPayload(format!("unknown mission status '{}'", raw))
                        })
                    })
                    .transpose()?;
                let missions = ctx.list_missions(status)?;
                emit(format, "mission.list", &missions, || {
                    if missions.is_empty() {
                        return "no missions".to_string();
                    }
                    missions
                        .iter()
                        .map(|m| {
                            format!(
                                "{:<30} {:<20} {}",
                                m.id,
                                output::status_badge(m.status.as_str()),
                                output::compact_line(&m.name, PREVIEW_CHARS)
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
        },

        Command::Hop(hop) => match hop.command {
            HopCommand::Show { id } => {
                let snapshot = ctx.hop_snapshot(&id)?;
                emit(format, "hop.show", &snapshot, || {
                    let h = &snapshot.hop;
                    let mut lines = vec![
                        format!(
                            "{} #{} {}  {}",
                            h.id.bold(),
                            h.sequence_order,
                            h.name,
                            output::status_badge(h.status.as_str())
                        ),
                        format!(
                            "  mission: {}  final: {}  resolved: {}  version: {}",
                            h.mission_id, h.is_final, h.is_resolved, h.version
                        ),
                        "  tool steps:".to_string(),
                    ];
                    if snapshot.tool_steps.is_empty() {
                        lines.push("    (none)".to_string());
                    }
                    for step in &snapshot.tool_steps {
                        lines.push(format!(
                            "    {}. {} [{}] {}",
                            step.index, step.tool_id, step.status, step.id
                        ));
                    }
                    lines.push("  assets:".to_string());
                    let assets: Vec<Asset> = snapshot.assets.values().cloned().collect();
                    lines.push(render_assets(&assets));
                    lines.join("\n")
                })
            }
        },

        Command::Assets { scope, id } => {
            let scope = match scope {
                ScopeArg::Mission => AssetScope::mission(&id),
                ScopeArg::Hop => AssetScope::hop(&id),
            };
            let assets = ctx.assets(&scope)?;
            emit(format, "assets", &assets, || {
                format!("{}\n{}", scope.to_string().bold(), render_assets(&assets))
            })
        }

        Command::Route { mission } => {
            let report = ctx.route(&mission)?;
            emit(format, "route", &report, || {
                let mut out = format!(
                    "{} {}  next: {}",
                    report.mission_id.bold(),
                    output::status_badge(report.mission_status.as_str()),
                    report.next_action.to_string().bold()
                );
                if !report.violations.is_empty() {
                    let warnings: Vec<String> =
                        report.violations.iter().map(|v| v.to_string()).collect();
                    out.push_str(&format!(
                        "\n{}\n{}",
                        "coordination warnings:".yellow().bold(),
                        output::bullet_list(&warnings, PREVIEW_ITEMS, 120)
                    ));
                }
                out
            })
        }

        Command::Reconcile { mission } => {
            let result = ctx.dispatcher().complete_hop_if_finished(&mission)?;
            emit(format, "reconcile", &result, || match &result {
                Some(r) => render_result(r),
                None => format!("{} nothing to reconcile", mission),
            })
        }

        Command::Terminate {
            mission,
            hop,
            outcome,
            reason,
        } => {
            let target = match (hop, mission) {
                (Some(hop_id), _) => TerminationTarget::Hop(hop_id),
                (None, Some(mission_id)) => TerminationTarget::Mission(mission_id),
                (None, None) => {
                    return Err(MissionError::InvalidPayload(
                        "--mission or --hop is required".to_string(),
                    ));
                }
            };
            let outcome = match outcome {
                OutcomeArg::Failed => Termination::Failed,
                OutcomeArg::Cancelled => Termination::Cancelled,
            };
            let result = ctx.dispatcher().terminate(&target, outcome, &reason)?;
            emit(format, "terminate", &result, || render_result(&result))
        }

        Command::ValidateChain { hop, steps_file } => {
            let raw = read_json_file(&steps_file)?;
            let proposals: Vec<ToolStepProposal> = serde_json::from_value(raw).map_err(|e| {
                MissionError::InvalidPayload(format!("{}: {}", steps_file.display(), e))
            })?;
            let report = ctx.validate_chain(&hop, proposals)?;
            emit(format, "validate-chain", &report, || {
                if report.valid {
                    let mut out = format!("{} tool chain is valid", "✓".green().bold());
                    if !report.placeholders.is_empty() {
                        out.push_str(&format!(
                            "\n  intermediates: {}",
                            report.placeholders.join(", ")
                        ));
                    }
                    out
                } else {
                    let issues: Vec<String> = report.issues.iter().map(|i| i.to_string()).collect();
                    format!(
                        "{} {} issue(s)\n{}",
                        "✗".red().bold(),
                        issues.len(),
                        output::bullet_list(&issues, PREVIEW_ITEMS, 120)
                    )
                }
            })
        }

        Command::Ledger { mission } => {
            let entries = ctx.ledger(mission.as_deref())?;
            emit(format, "ledger", &entries, || {
                if entries.is_empty() {
                    return "ledger is empty".to_string();
                }
                entries
                    .iter()
                    .map(|e| {
                        format!(
                            "{} {:<24} {:<30} {:<18} {}",
                            e.created_at,
                            e.tx_type,
                            e.entity_id,
                            output::status_badge(&e.resulting_status),
                            output::compact_line(&e.message, PREVIEW_CHARS)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

pub fn run() -> Result<(), MissionError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;
    let format = cli.format;

    if let Command::Init { dir } = &cli.command {
        logging::init_logging("warn");
        let target = dir
            .clone()
            .or_else(|| cli.root.clone())
            .unwrap_or_else(|| current_dir.clone());
        return init_project(&target, format);
    }

    let project_root = resolve_project_root(cli.root, &current_dir)?;
    let config = config::load_config(&project_root)?;
    logging::init_logging(&config.logging.level);
    let ctx = EngineContext::open(store::Store::for_project(&project_root), config)?;
    run_command(&ctx, cli.command, format)
}
