//! The executor dispatch loop.
//!
//! `execute` runs, in order:
//!
//! 1. **Pre hooks**: request-scope hooks (outermost call only), then
//!    operation-scope hooks. Either may rewrite or reject the operation.
//! 2. **Resolution**: exact handler, default handler, or one retry wrapped
//!    in an `OperationChain`.
//! 3. **Validation**: the handler's declared fields, all problems at once.
//! 4. **Handler**: may recurse into `execute` for child operations.
//! 5. **Post hooks**: operation-scope, then request-scope, each threading
//!    the previous result.
//!
//! Errors from 1, 4 and 5 run every active hook's `on_failure` before being
//! returned wrapped in `OperationError::Failed`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwap;
use conductor_core::{op_types, Context, Operation, ValidationResult, Value};
use tracing::{debug, debug_span, warn, Instrument};

use super::config::Config;
use super::handler::OperationHandler;
use super::hook::{Hook, Request};
use crate::error::OperationError;

/// Option set on an operation that was wrapped in a chain because no
/// handler matched it. A marked operation is never wrapped again.
pub const FALLBACK_OPTION: &str = "conductor.fallback";

/// Boxed future returned by [`Executor::execute`].
pub type ExecuteFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

struct ExecutorInner {
    id: String,
    config: ArcSwap<Config>,
}

/// Routes operations to handlers through the hook pipeline.
///
/// Cheap to clone; clones share the same registry. Safe to call from many
/// tasks at once.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    #[must_use]
    pub fn new(id: impl Into<String>, config: Config) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                id: id.into(),
                config: ArcSwap::from_pointee(config),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Snapshot of the current registry.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.inner.config.load_full()
    }

    /// Registers a handler at runtime. Requests already running keep the
    /// registry they started with.
    pub fn add_handler(&self, op_type: &str, handler: Arc<dyn OperationHandler>) {
        self.inner
            .config
            .rcu(|current| current.with_handler(op_type, Arc::clone(&handler)));
    }

    /// Identity used to track nesting of calls into this executor.
    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Executes an operation.
    ///
    /// The executor owns `operation` from here on; hooks may rewrite it
    /// freely without affecting the caller, who keeps a clone if needed.
    pub fn execute<'a>(&'a self, operation: Operation, context: &'a Context) -> ExecuteFuture<'a> {
        let span = debug_span!(
            "execute",
            executor = %self.inner.id,
            op_type = %operation.op_type(),
            user = %context.user_id(),
        );
        Box::pin(self.run(operation, context).instrument(span))
    }

    async fn run(&self, operation: Operation, context: &Context) -> Result<Value, OperationError> {
        let config = self.config();
        let scope = context.enter(self.key());
        if scope.is_outermost() {
            context.record_original_operation(&operation);
        }
        let hooks = ActiveHooks::new(&config, scope.is_outermost());
        let op_type = operation.op_type().to_string();
        let mut request = Request::new(operation, context);

        match self.dispatch(&config, &hooks, &mut request).await {
            Ok(result) => Ok(result),
            Err(Stage::Rejected(error)) => {
                debug!(%op_type, %error, "operation rejected before execution");
                Err(error)
            }
            Err(Stage::Failed { partial, error }) => {
                let recovered = hooks.compensate(partial, &request, &error).await;
                // Anything the partially consumed operation or result holds is
                // released here, before the error reaches the caller.
                drop(recovered);
                drop(request);
                debug!(%op_type, %error, "operation failed; resources released");
                Err(OperationError::failure(&op_type, error))
            }
        }
    }

    async fn dispatch(
        &self,
        config: &Config,
        hooks: &ActiveHooks,
        request: &mut Request<'_>,
    ) -> Result<Value, Stage> {
        for hook in &hooks.pre {
            hook.pre_execute(request)
                .await
                .map_err(|error| Stage::failed(None, error))?;
        }

        let handler = resolve_handler(config, request).map_err(Stage::Rejected)?;

        if let ValidationResult::Invalid { errors } = handler.fields().validate(request.operation())
        {
            return Err(Stage::Rejected(OperationError::Validation { errors }));
        }

        let mut result = handler
            .handle(request.operation(), request.context(), self)
            .await
            .map_err(|error| Stage::failed(None, error))?;

        for hook in &hooks.post {
            let previous = result.clone();
            result = hook
                .post_execute(result, request)
                .await
                .map_err(|error| Stage::failed(Some(previous), error))?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.inner.id)
            .field("config", &self.config())
            .finish()
    }
}

/// Exact or default handler; otherwise wraps the operation once in an
/// `OperationChain` and resolves the chain handler instead.
fn resolve_handler(
    config: &Config,
    request: &mut Request<'_>,
) -> Result<Arc<dyn OperationHandler>, OperationError> {
    let op = request.operation();
    if let Some(handler) = config.resolve(op.op_type()) {
        return Ok(handler);
    }

    let op_type = op.op_type().to_string();
    let already_wrapped = op.option(FALLBACK_OPTION).is_some();
    let chain_handler = config.handler(op_types::OPERATION_CHAIN);
    let Some(chain_handler) = chain_handler.filter(|_| !already_wrapped) else {
        return Err(OperationError::NoHandler { op_type });
    };

    warn!(%op_type, "no handler registered; retrying wrapped in an OperationChain");
    let mut inner = request.replace_operation(Operation::chain(Vec::new()));
    inner.set_option(FALLBACK_OPTION, "true");
    request.operation_mut().replace_children(vec![inner]);
    Ok(chain_handler)
}

// ---------------------------------------------------------------------------
// Hook pipeline
// ---------------------------------------------------------------------------

/// Where a dispatch stopped.
enum Stage {
    /// Refused before the handler ran; no compensation.
    Rejected(OperationError),
    /// Failed in a hook or the handler; compensation runs.
    Failed {
        partial: Option<Value>,
        error: OperationError,
    },
}

impl Stage {
    fn failed(partial: Option<Value>, error: OperationError) -> Self {
        Self::Failed { partial, error }
    }
}

/// Hooks active for one call, in the order each phase runs them.
struct ActiveHooks {
    pre: Vec<Arc<dyn Hook>>,
    post: Vec<Arc<dyn Hook>>,
}

impl ActiveHooks {
    fn new(config: &Config, outermost: bool) -> Self {
        let request: &[Arc<dyn Hook>] = if outermost {
            config.request_hooks()
        } else {
            &[]
        };
        let operation = config.operation_hooks();
        Self {
            pre: request.iter().chain(operation).cloned().collect(),
            post: operation.iter().chain(request).cloned().collect(),
        }
    }

    /// Runs every `on_failure` in post order. A hook that errors is logged
    /// and skipped; the others still run.
    async fn compensate(
        &self,
        mut partial: Option<Value>,
        request: &Request<'_>,
        error: &OperationError,
    ) -> Option<Value> {
        for hook in &self.post {
            match hook.on_failure(partial.clone(), request, error).await {
                Ok(next) => partial = next,
                Err(hook_error) => warn!(
                    hook = hook.name(),
                    error = %hook_error,
                    "on_failure hook raised an error; skipping it"
                ),
            }
        }
        partial
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use conductor_core::{FieldDeclaration, User, ValueType};
    use parking_lot::Mutex;

    use super::*;
    use crate::error::Status;
    use crate::service::handlers::{ChainHandler, UnsupportedHandler};

    /// Returns a fixed value and counts invocations.
    struct Fixed {
        value: i64,
        calls: Arc<AtomicU32>,
    }

    impl Fixed {
        fn new(value: i64) -> Self {
            Self {
                value,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl OperationHandler for Fixed {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(self.value))
        }
    }

    struct Failing;

    #[async_trait]
    impl OperationHandler for Failing {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            Err(OperationError::validation("bad seed"))
        }
    }

    struct Typed;

    #[async_trait]
    impl OperationHandler for Typed {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            Ok(Value::Null)
        }

        fn fields(&self) -> FieldDeclaration {
            FieldDeclaration::none()
                .required("a", ValueType::String)
                .optional("b", ValueType::Int)
        }
    }

    /// Records every hook call into a shared log and optionally misbehaves.
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        add: i64,
        fail_pre: bool,
        fail_on_failure: bool,
    }

    impl Recording {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                add: 0,
                fail_pre: false,
                fail_on_failure: false,
            }
        }
    }

    #[async_trait]
    impl Hook for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
            self.log.lock().push(format!(
                "pre:{}:{}",
                self.name,
                request.operation().op_type()
            ));
            if self.fail_pre {
                return Err(OperationError::unauthorised("denied by hook"));
            }
            Ok(())
        }

        async fn post_execute(
            &self,
            result: Value,
            _request: &Request<'_>,
        ) -> Result<Value, OperationError> {
            self.log.lock().push(format!("post:{}", self.name));
            Ok(Value::Int(result.as_i64().unwrap_or(0) + self.add))
        }

        async fn on_failure(
            &self,
            result: Option<Value>,
            _request: &Request<'_>,
            error: &OperationError,
        ) -> Result<Option<Value>, OperationError> {
            self.log
                .lock()
                .push(format!("fail:{}:{}", self.name, error.status()));
            if self.fail_on_failure {
                return Err(OperationError::validation("hook broke"));
            }
            Ok(result)
        }
    }

    fn ctx() -> Context {
        Context::new(User::new("user01"))
    }

    #[tokio::test]
    async fn routes_to_exact_handler() {
        let config = Config::builder().handler("Get", Fixed::new(7)).build().unwrap();
        let executor = Executor::new("graph", config);
        let result = executor.execute(Operation::new("Get"), &ctx()).await.unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[tokio::test]
    async fn unregistered_type_uses_default_handler() {
        let default = Fixed::new(99);
        let calls = Arc::clone(&default.calls);
        let config = Config::builder()
            .handler("Get", Fixed::new(7))
            .default_handler(default)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let result = executor.execute(Operation::new("Other"), &ctx()).await.unwrap();
        assert_eq!(result, Value::Int(99));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_registry_is_a_configuration_error() {
        let executor = Executor::new("graph", Config::builder().build().unwrap());
        let err = executor.execute(Operation::new("Get"), &ctx()).await.unwrap_err();
        assert!(matches!(err, OperationError::NoHandler { ref op_type } if op_type == "Get"));
        assert_eq!(err.status(), Status::Configuration);
    }

    #[tokio::test]
    async fn fallback_wraps_once_then_fails_loudly() {
        let config = Config::builder()
            .handler(op_types::OPERATION_CHAIN, ChainHandler)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let err = executor.execute(Operation::new("Get"), &ctx()).await.unwrap_err();
        assert_eq!(err.status(), Status::Configuration);
        assert!(matches!(err.root(), OperationError::NoHandler { op_type } if op_type == "Get"));
    }

    #[tokio::test]
    async fn unsupported_default_reports_operation_type() {
        let config = Config::builder()
            .default_handler(UnsupportedHandler)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let err = executor
            .execute(Operation::new("Mystery"), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::NotImplemented);
        assert!(err.to_string().contains("Mystery"));
    }

    #[tokio::test]
    async fn validation_reports_every_field_before_handler_runs() {
        let config = Config::builder().handler("Typed", Typed).build().unwrap();
        let executor = Executor::new("graph", config);
        let op = Operation::new("Typed").with_arg("b", "not an int");
        let err = executor.execute(op, &ctx()).await.unwrap_err();
        match err {
            OperationError::Validation { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.contains("'a'")));
                assert!(errors.iter().any(|e| e.contains("'b'")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order_and_thread_results() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut h1 = Recording::new("h1", &log);
        h1.add = 1;
        let mut h2 = Recording::new("h2", &log);
        h2.add = 10;
        let config = Config::builder()
            .handler("Get", Fixed::new(100))
            .operation_hook(h1)
            .operation_hook(h2)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);

        let result = executor.execute(Operation::new("Get"), &ctx()).await.unwrap();
        assert_eq!(result, Value::Int(111));
        assert_eq!(
            *log.lock(),
            vec!["pre:h1:Get", "pre:h2:Get", "post:h1", "post:h2"]
        );
    }

    #[tokio::test]
    async fn failure_hooks_run_in_order_whoever_failed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = Config::builder()
            .handler("Get", Failing)
            .operation_hook(Recording::new("h1", &log))
            .operation_hook(Recording::new("h2", &log))
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let err = executor.execute(Operation::new("Get"), &ctx()).await.unwrap_err();
        assert!(matches!(err, OperationError::Failed { ref op_type, .. } if op_type == "Get"));
        assert_eq!(err.status(), Status::BadRequest);
        assert_eq!(
            *log.lock(),
            vec![
                "pre:h1:Get",
                "pre:h2:Get",
                "fail:h1:BAD_REQUEST",
                "fail:h2:BAD_REQUEST"
            ]
        );

        // Now the second hook rejects in pre_execute.
        log.lock().clear();
        let mut h2 = Recording::new("h2", &log);
        h2.fail_pre = true;
        let config = Config::builder()
            .handler("Get", Fixed::new(1))
            .operation_hook(Recording::new("h1", &log))
            .operation_hook(h2)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let err = executor.execute(Operation::new("Get"), &ctx()).await.unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
        assert_eq!(
            *log.lock(),
            vec![
                "pre:h1:Get",
                "pre:h2:Get",
                "fail:h1:FORBIDDEN",
                "fail:h2:FORBIDDEN"
            ]
        );
    }

    #[tokio::test]
    async fn failing_on_failure_hook_does_not_mask_original_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut h1 = Recording::new("h1", &log);
        h1.fail_on_failure = true;
        let config = Config::builder()
            .handler("Get", Failing)
            .operation_hook(h1)
            .operation_hook(Recording::new("h2", &log))
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let err = executor.execute(Operation::new("Get"), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("bad seed"));
        assert!(log.lock().contains(&"fail:h2:BAD_REQUEST".to_string()));
    }

    #[tokio::test]
    async fn request_hooks_run_once_operation_hooks_every_level() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = Config::builder()
            .handler(op_types::OPERATION_CHAIN, ChainHandler)
            .handler("A", Fixed::new(1))
            .handler("B", Fixed::new(2))
            .request_hook(Recording::new("req", &log))
            .operation_hook(Recording::new("op", &log))
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let chain = Operation::chain(vec![Operation::new("A"), Operation::new("B")]);
        executor.execute(chain, &ctx()).await.unwrap();

        let entries = log.lock().clone();
        let count = |prefix: &str| entries.iter().filter(|e| e.starts_with(prefix)).count();
        assert_eq!(count("pre:req"), 1);
        assert_eq!(count("post:req"), 1);
        assert_eq!(count("pre:op"), 3);
        assert_eq!(count("post:op"), 3);
        assert_eq!(entries.first().map(String::as_str), Some("pre:req:OperationChain"));
        assert_eq!(entries.last().map(String::as_str), Some("post:req"));
    }

    #[tokio::test]
    async fn original_operation_is_snapshotted_before_hooks() {
        struct Rewrite;

        #[async_trait]
        impl Hook for Rewrite {
            fn name(&self) -> &'static str {
                "rewrite"
            }

            async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
                request.replace_operation(Operation::new("Get"));
                Ok(())
            }
        }

        let config = Config::builder()
            .handler("Get", Fixed::new(5))
            .request_hook(Rewrite)
            .build()
            .unwrap();
        let executor = Executor::new("graph", config);
        let context = ctx();
        let result = executor
            .execute(Operation::new("Alias"), &context)
            .await
            .unwrap();
        assert_eq!(result, Value::Int(5));
        assert_eq!(context.original_operation().unwrap().op_type(), "Alias");
    }

    #[tokio::test]
    async fn add_handler_is_copy_on_write() {
        let executor = Executor::new("graph", Config::builder().build().unwrap());
        let before = executor.config();
        executor.add_handler("Get", Arc::new(Fixed::new(3)));
        assert!(!before.is_supported("Get"));
        let result = executor.execute(Operation::new("Get"), &ctx()).await.unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[tokio::test]
    async fn concurrent_executions_share_one_executor() {
        let handler = Fixed::new(1);
        let calls = Arc::clone(&handler.calls);
        let executor = Executor::new(
            "graph",
            Config::builder().handler("Get", handler).build().unwrap(),
        );
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let executor = executor.clone();
            tasks.push(tokio::spawn(async move {
                let context = Context::new(User::new("u"));
                executor.execute(Operation::new("Get"), &context).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Value::Int(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 16);
    }
}
