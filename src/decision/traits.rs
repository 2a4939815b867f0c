// src/decision/traits.rs
use super::context::DecisionContext;
use super::types::DecisionBatch;
use crate::error::CollaboratorError;
use async_trait::async_trait;

/// The reasoning collaborator: market context in, structured decisions out.
///
/// Implementations should degrade unparseable answers to a hold-all batch
/// themselves and reserve errors for failures to get an answer at all.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, context: &DecisionContext) -> Result<DecisionBatch, CollaboratorError>;
}
