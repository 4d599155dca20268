//! Hooks shipped with the engine.
//!
//! All four are meant to be registered as request-scope hooks: they inspect
//! or rewrite the whole operation tree once per request.

pub mod add_to_chain;
pub mod authoriser;
pub mod chain_limiter;
pub mod named_operation;
pub mod score;

pub use add_to_chain::{AddOperationsToChain, AddToChainConfig, InsertionSet};
pub use authoriser::{AuthMode, AuthRule, OperationAuthoriser};
pub use chain_limiter::OperationChainLimiter;
pub use named_operation::NamedOperationResolver;
pub use score::{ScoreConfig, ScoreFallback, ScoreResolver, ScoreTable};
