//! Identifier generation.

use crate::types::OperationId;

/// Produces globally unique operation identifiers on demand.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> OperationId;
}

/// Random 128-bit identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> OperationId {
        OperationId::random()
    }
}
