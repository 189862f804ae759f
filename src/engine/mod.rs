//! Mission orchestration engine.
//!
//! - [`model`]: missions, hops, tool steps, assets and their closed status enums
//! - [`repo`]: SQLite persistence for the model and the transaction ledger
//! - [`scope`]: asset scope mapper (mission -> hop copy, hop -> mission promotion)
//! - [`tool_chain`]: tool chain validator and parameter resolution
//! - [`lifecycle`]: legal transitions for hops and missions
//! - [`dispatcher`]: the nine atomic transactions plus termination
//! - [`router`]: pure next-action routing and coordination checks
//! - [`context`]: `EngineContext`, the handle callers hold

pub mod context;
pub mod dispatcher;
pub mod lifecycle;
pub mod model;
pub mod repo;
pub mod router;
pub mod scope;
pub mod tool_chain;

pub use context::EngineContext;
pub use dispatcher::{
    Dispatcher, Termination, TerminationTarget, TransactionPayload, TransactionResult,
    TransactionType,
};
pub use router::NextAction;
