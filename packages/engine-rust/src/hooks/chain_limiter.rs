//! Rejects requests whose total score exceeds the caller's ceiling.

use async_trait::async_trait;
use tracing::debug;

use super::score::ScoreTable;
use crate::error::OperationError;
use crate::service::hook::{Hook, Request};

#[derive(Debug, Clone, Default)]
pub struct OperationChainLimiter {
    table: ScoreTable,
}

impl OperationChainLimiter {
    #[must_use]
    pub fn new(table: ScoreTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &ScoreTable {
        &self.table
    }
}

#[async_trait]
impl Hook for OperationChainLimiter {
    fn name(&self) -> &'static str {
        "OperationChainLimiter"
    }

    async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
        let user = request.user();
        let score = self.table.score(request.operation(), user)?;
        let ceiling = self.table.ceiling(user);
        debug!(user = %user.user_id, score, ceiling, "scored request");
        if score > ceiling {
            return Err(OperationError::unauthorised(format!(
                "user {} does not have permission to run an operation chain with score {score}; \
                 the maximum allowed is {ceiling}",
                user.user_id
            )));
        }
        Ok(())
    }
}
