// src/decision/mod.rs
//! Boundary to the reasoning collaborator.
pub mod client;
pub mod context;
pub mod parser;
pub mod traits;
pub mod types;

pub use self::context::{DecisionContext, SymbolContext};
pub use self::traits::DecisionMaker;
pub use self::types::{Action, Decision, DecisionBatch};
