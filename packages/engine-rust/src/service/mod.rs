//! Operation execution.
//!
//! 1. **Registration** (`config`, `properties`): handler registry, hook lists
//!    and the property bag owned by one executor
//! 2. **Contracts** (`handler`, `hook`): the traits handlers and hooks implement
//! 3. **Dispatch** (`executor`): hook pipeline, handler resolution, compensation
//! 4. **Built-ins** (`handlers`): chains, exports, `Count`, `Limit`
//! 5. **Middleware** (`middleware`): Tower layers (per-user admission, timeout, outcome logging)

pub mod config;
pub mod executor;
pub mod handler;
pub mod handlers;
pub mod hook;
pub mod middleware;
pub mod properties;

pub use config::{Config, ConfigBuilder, ConfigError, ServiceConfig};
pub use executor::{Executor, FALLBACK_OPTION};
pub use handler::OperationHandler;
pub use hook::{Hook, Request};
pub use properties::Properties;
