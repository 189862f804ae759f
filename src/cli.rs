//! CLI struct definitions for the missionctl command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "missionctl",
    version = env!("CARGO_PKG_VERSION"),
    about = "missionctl advances missions, hops and tool steps through atomic, precondition-checked transactions. 🦀"
)]
pub(crate) struct Cli {
    /// Project root (the directory holding `.missionctl/`). Defaults to
    /// MISSIONCTL_ROOT, then the nearest ancestor with `.missionctl/`.
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScopeArg {
    Mission,
    Hop,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutcomeArg {
    Failed,
    Cancelled,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create `.missionctl/` with a default config and an empty database
    Init {
        /// Directory to initialize (default: --root or the current directory)
        #[clap(long)]
        dir: Option<PathBuf>,
    },
    /// Apply one of the nine transactions
    Apply(ApplyCli),
    /// Inspect missions
    Mission(MissionCli),
    /// Inspect hops
    Hop(HopCli),
    /// List the assets of a mission or hop scope
    Assets {
        #[clap(long, value_enum)]
        scope: ScopeArg,
        #[clap(long)]
        id: String,
    },
    /// Print the next action for a mission
    Route {
        #[clap(long)]
        mission: String,
    },
    /// Finalize a COMPLETED current hop (clear it, or complete the mission)
    Reconcile {
        #[clap(long)]
        mission: String,
    },
    /// Fail or cancel a mission or hop
    #[clap(group(ArgGroup::new("target").required(true).args(["mission", "hop"])))]
    Terminate {
        #[clap(long)]
        mission: Option<String>,
        #[clap(long)]
        hop: Option<String>,
        #[clap(long, value_enum)]
        outcome: OutcomeArg,
        #[clap(long, default_value = "")]
        reason: String,
    },
    /// Dry-run the tool chain validator against a hop
    ValidateChain {
        #[clap(long)]
        hop: String,
        /// JSON array of tool steps
        #[clap(long)]
        steps_file: PathBuf,
    },
    /// Show the transaction ledger
    Ledger {
        #[clap(long)]
        mission: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
#[clap(group(ArgGroup::new("input").required(true).args(["payload", "payload_file"])))]
pub(crate) struct ApplyCli {
    /// Transaction type, e.g. PROPOSE_MISSION or propose-mission
    pub transaction: String,
    /// Payload as an inline JSON object
    #[clap(long)]
    pub payload: Option<String>,
    /// Path to a file holding the JSON payload
    #[clap(long)]
    pub payload_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MissionCli {
    #[clap(subcommand)]
    pub command: MissionCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MissionCommand {
    /// Mission, current hop and hop history
    Show {
        #[clap(long)]
        id: String,
    },
    /// All missions, optionally filtered by status
    List {
        #[clap(long)]
        status: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct HopCli {
    #[clap(subcommand)]
    pub command: HopCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum HopCommand {
    /// Hop, tool steps and hop-scope assets
    Show {
        #[clap(long)]
        id: String,
    },
}
