//! Built-in handlers registered by every standard executor.
//!
//! - [`chain`]: sequential execution with output-to-input splicing
//! - [`export`]: per-request set export and retrieval
//! - [`values`]: `Count` and `Limit` over array inputs
//! - [`unsupported`]: default handler reporting unknown operation types

pub mod chain;
pub mod export;
pub mod unsupported;
pub mod values;

pub use chain::ChainHandler;
pub use export::{ExportToSetHandler, GetSetExportHandler};
pub use unsupported::UnsupportedHandler;
pub use values::{CountHandler, LimitHandler};

use conductor_core::{op_types, Operation};

use super::config::ConfigBuilder;

/// Registers the built-in handlers plus the `Unsupported` default.
#[must_use]
pub fn register_builtins(builder: ConfigBuilder) -> ConfigBuilder {
    builder
        .handler(op_types::OPERATION_CHAIN, ChainHandler)
        .handler(op_types::EXPORT_TO_SET, ExportToSetHandler)
        .handler(op_types::GET_SET_EXPORT, GetSetExportHandler)
        .handler(op_types::COUNT, CountHandler)
        .handler(op_types::LIMIT, LimitHandler)
        .default_handler(UnsupportedHandler)
}

/// Payload of a composite carrier operation (`FederatedOperation`,
/// `ExecuteJob`): a single child as-is, several children as one chain. The
/// carrier's input reaches the payload under the chain splicing rule.
#[must_use]
pub fn payload(operation: &Operation) -> Option<Operation> {
    match operation.children() {
        [] => None,
        [single] => {
            let mut child = single.clone();
            if let Some(input) = operation.input() {
                child.inject_input(input);
            }
            Some(child)
        }
        many => {
            let mut chain = Operation::chain(many.to_vec());
            if let Some(input) = operation.input() {
                chain.set_input(input.clone());
            }
            Some(chain)
        }
    }
}
