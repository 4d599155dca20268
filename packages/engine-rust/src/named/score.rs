use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_core::{Operation, Value};

use super::cache::NamedOperationCache;
use super::{OPERATION_NAME_ARG, PARAMETERS_ARG};
use crate::error::OperationError;
use crate::hooks::score::{ScoreFallback, ScoreResolver};

/// Scores a `NamedOperation` reference by its stored score, or by scoring
/// its expansion when no score is stored. References the caller cannot see
/// score like any unknown leaf.
#[derive(Debug, Clone)]
pub struct NamedOperationScoreResolver {
    cache: Arc<NamedOperationCache>,
    admin_auth: Option<String>,
}

impl NamedOperationScoreResolver {
    #[must_use]
    pub fn new(cache: Arc<NamedOperationCache>, admin_auth: Option<String>) -> Self {
        Self { cache, admin_auth }
    }
}

impl ScoreResolver for NamedOperationScoreResolver {
    fn score(&self, operation: &Operation, fallback: &ScoreFallback<'_>) -> Result<i64, OperationError> {
        let Some(name) = operation.arg_str(OPERATION_NAME_ARG) else {
            return Ok(fallback.base_score(operation.op_type()));
        };
        let detail = match self.cache.get(name, fallback.user(), self.admin_auth.as_deref()) {
            Ok(detail) => detail,
            Err(OperationError::NotFound(_) | OperationError::Unauthorised { .. }) => {
                return Ok(fallback.base_score(operation.op_type()));
            }
            Err(other) => return Err(other),
        };
        if let Some(score) = detail.score {
            return Ok(score);
        }
        let parameters: BTreeMap<String, Value> = operation
            .arg(PARAMETERS_ARG)
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();
        fallback.score(&detail.resolve(&parameters)?)
    }
}

#[cfg(test)]
mod tests {
    use conductor_core::{op_types, TypeMatcher, User};

    use super::*;
    use crate::hooks::score::ScoreTable;
    use crate::named::NamedOperationDetail;

    fn table(cache: &Arc<NamedOperationCache>) -> ScoreTable {
        ScoreTable::new()
            .with_op_score(TypeMatcher::parse("Count").unwrap(), 3)
            .with_op_score(TypeMatcher::parse("Limit").unwrap(), 2)
            .with_resolver(
                op_types::NAMED_OPERATION,
                Arc::new(NamedOperationScoreResolver::new(Arc::clone(cache), None)),
            )
    }

    fn reference(name: &str) -> Operation {
        Operation::new(op_types::NAMED_OPERATION).with_arg(OPERATION_NAME_ARG, name)
    }

    #[test]
    fn stored_score_wins_over_expansion() {
        let cache = Arc::new(NamedOperationCache::new());
        let alice = User::new("alice");
        let detail = NamedOperationDetail::new("n", "alice", r#"{"type":"Count"}"#).with_score(7);
        cache.add(detail, false, &alice, None).unwrap();
        assert_eq!(table(&cache).score(&reference("n"), &alice).unwrap(), 7);
    }

    #[test]
    fn expansion_is_scored_when_no_score_stored() {
        let cache = Arc::new(NamedOperationCache::new());
        let alice = User::new("alice");
        let text = r#"{"type":"OperationChain","operations":[{"type":"Limit"},{"type":"Count"}]}"#;
        cache
            .add(NamedOperationDetail::new("n", "alice", text), false, &alice, None)
            .unwrap();
        assert_eq!(table(&cache).score(&reference("n"), &alice).unwrap(), 5);
    }

    #[test]
    fn self_reference_is_bounded() {
        let cache = Arc::new(NamedOperationCache::new());
        let alice = User::new("alice");
        let text = r#"{"type":"NamedOperation","args":{"operationName":"loop"}}"#;
        cache
            .add(NamedOperationDetail::new("loop", "alice", text), false, &alice, None)
            .unwrap();
        let err = table(&cache).score(&reference("loop"), &alice).unwrap_err();
        assert!(matches!(err, OperationError::Validation { .. }));
    }

    #[test]
    fn unknown_reference_scores_as_leaf() {
        let cache = Arc::new(NamedOperationCache::new());
        assert_eq!(
            table(&cache).score(&reference("missing"), &User::new("u")).unwrap(),
            1
        );
    }
}
