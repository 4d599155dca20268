//! Composition root: builds a fully wired executor from a property bag.
//!
//! Every executor built here, including federated sub-executors, gets the
//! built-in handlers, the named-operation admin handlers and the request
//! hooks configured under `conductor.hooks.*`. The root executor also gets
//! the federation and job handlers.

use std::sync::Arc;

use anyhow::Context as _;
use conductor_core::{op_types, Context, Operation, User, Value};
use tracing::info;

use crate::error::OperationError;
use crate::federation::{
    AddExecutorHandler, ExecutorFactory, ExecutorLibrary, FederatedOperationHandler,
    FederatedStorage, GetAllExecutorIdsHandler, MergeRegistry, RemoveExecutorHandler,
};
use crate::hooks::{
    AddOperationsToChain, AddToChainConfig, NamedOperationResolver, OperationAuthoriser,
    OperationChainLimiter, ScoreConfig, ScoreTable,
};
use crate::jobs::{
    CancelScheduledJobHandler, ExecuteJobHandler, GetAllJobDetailsHandler, GetJobDetailsHandler,
    JobService, MemoryJobTracker,
};
use crate::named::{
    AddNamedOperationHandler, DeleteNamedOperationHandler, GetAllNamedOperationsHandler,
    NamedOperationCache, NamedOperationScoreResolver,
};
use crate::service::config::{Config, ConfigBuilder, ServiceConfig};
use crate::service::executor::Executor;
use crate::service::handlers::register_builtins;
use crate::service::middleware::{build_execution_pipeline, ExecuteRequest};
use crate::service::properties::{keys, Properties};

/// Id of the root executor.
pub const ROOT_EXECUTOR_ID: &str = "root";

/// A root executor together with the stores its handlers share.
#[derive(Debug)]
pub struct Engine {
    executor: Executor,
    named_operations: Arc<NamedOperationCache>,
    jobs: Arc<JobService>,
    federation: Arc<FederatedStorage>,
    library: Arc<ExecutorLibrary>,
    merges: Arc<MergeRegistry>,
    service_config: ServiceConfig,
}

impl Engine {
    /// Builds the root executor. Must be called inside a tokio runtime,
    /// which runs the job worker.
    ///
    /// # Errors
    ///
    /// Returns an error if an engine property or hook configuration is
    /// malformed.
    pub fn build(properties: Properties) -> anyhow::Result<Self> {
        properties.validate()?;
        let service_config = ServiceConfig::from_properties(&properties)?;

        let named_operations = Arc::new(NamedOperationCache::new());
        let jobs = Arc::new(JobService::start(
            Arc::new(MemoryJobTracker::new()),
            properties.job_executor_threads(),
        ));
        let federation = Arc::new(FederatedStorage::new());
        let library = Arc::new(ExecutorLibrary::new());
        let merges = Arc::new(MergeRegistry::new());
        let factory: Arc<dyn ExecutorFactory> = Arc::new(standard_executor);

        let builder = standard_config(Config::builder(), &properties, &named_operations)?
            .handler(
                op_types::ADD_EXECUTOR,
                AddExecutorHandler::new(Arc::clone(&federation), Arc::clone(&library), factory),
            )
            .handler(
                op_types::REMOVE_EXECUTOR,
                RemoveExecutorHandler::new(Arc::clone(&federation)),
            )
            .handler(
                op_types::GET_ALL_EXECUTOR_IDS,
                GetAllExecutorIdsHandler::new(Arc::clone(&federation)),
            )
            .handler(
                op_types::FEDERATED_OPERATION,
                FederatedOperationHandler::new(Arc::clone(&federation), Arc::clone(&merges)),
            )
            .handler(op_types::EXECUTE_JOB, ExecuteJobHandler::new(Arc::clone(&jobs)))
            .handler(op_types::GET_JOB_DETAILS, GetJobDetailsHandler::new(Arc::clone(&jobs)))
            .handler(
                op_types::GET_ALL_JOB_DETAILS,
                GetAllJobDetailsHandler::new(Arc::clone(&jobs)),
            )
            .handler(
                op_types::CANCEL_SCHEDULED_JOB,
                CancelScheduledJobHandler::new(Arc::clone(&jobs)),
            );
        let executor = Executor::new(ROOT_EXECUTOR_ID, builder.build()?);

        info!(
            executor = %executor.id(),
            operations = executor.config().supported_operations().len(),
            request_hooks = executor.config().request_hooks().len(),
            "engine built"
        );

        Ok(Self {
            executor,
            named_operations,
            jobs,
            federation,
            library,
            merges,
            service_config,
        })
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    #[must_use]
    pub fn named_operations(&self) -> &Arc<NamedOperationCache> {
        &self.named_operations
    }

    #[must_use]
    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    #[must_use]
    pub fn federation(&self) -> &Arc<FederatedStorage> {
        &self.federation
    }

    /// Property presets available to `AddExecutor` through `libraryId`.
    #[must_use]
    pub fn library(&self) -> &Arc<ExecutorLibrary> {
        &self.library
    }

    #[must_use]
    pub fn merges(&self) -> &Arc<MergeRegistry> {
        &self.merges
    }

    #[must_use]
    pub fn service_config(&self) -> &ServiceConfig {
        &self.service_config
    }

    /// The root executor behind per-user admission, timeout and outcome logging layers.
    #[must_use]
    pub fn service(
        &self,
    ) -> impl tower::Service<ExecuteRequest, Response = Value, Error = OperationError> + Clone {
        build_execution_pipeline(self.executor.clone(), &self.service_config)
    }

    /// Runs one top-level request for `user` on the root executor.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed operation.
    pub async fn execute(&self, operation: Operation, user: User) -> Result<Value, OperationError> {
        let context = Context::new(user);
        self.executor.execute(operation, &context).await
    }

    /// Stops job schedules and the job worker.
    pub async fn shutdown(&self) {
        self.jobs.shutdown().await;
    }
}

/// Builds a standard executor with its own named-operation cache. Used for
/// federated sub-executors.
///
/// # Errors
///
/// Returns an error if a property is malformed.
pub fn standard_executor(id: &str, properties: &Properties) -> anyhow::Result<Executor> {
    let cache = Arc::new(NamedOperationCache::new());
    let config = standard_config(Config::builder(), properties, &cache)?
        .build()
        .with_context(|| format!("building executor {id}"))?;
    Ok(Executor::new(id, config))
}

/// Built-in handlers, named-operation handlers and configured hooks.
fn standard_config(
    builder: ConfigBuilder,
    properties: &Properties,
    cache: &Arc<NamedOperationCache>,
) -> anyhow::Result<ConfigBuilder> {
    let builder = register_builtins(builder.properties(properties.clone()))
        .handler(
            op_types::ADD_NAMED_OPERATION,
            AddNamedOperationHandler::new(Arc::clone(cache)),
        )
        .handler(
            op_types::GET_ALL_NAMED_OPERATIONS,
            GetAllNamedOperationsHandler::new(Arc::clone(cache)),
        )
        .handler(
            op_types::DELETE_NAMED_OPERATION,
            DeleteNamedOperationHandler::new(Arc::clone(cache)),
        );
    register_hooks(builder, properties, cache)
}

/// Request hooks in execution order: named-operation expansion (always on),
/// then chain additions, authorisation and the score limit when configured.
fn register_hooks(
    mut builder: ConfigBuilder,
    properties: &Properties,
    cache: &Arc<NamedOperationCache>,
) -> anyhow::Result<ConfigBuilder> {
    let admin_auth = properties.admin_auth();

    builder = builder.request_hook(
        NamedOperationResolver::new(Arc::clone(cache))
            .with_admin_auth(admin_auth.clone())
            .with_max_depth(properties.named_max_depth()),
    );

    if let Some(config) = properties.get_json::<AddToChainConfig>(keys::HOOK_ADD_TO_CHAIN)? {
        builder = builder.request_hook(AddOperationsToChain::new(config));
    }

    if let Some(authoriser) = properties.get_json::<OperationAuthoriser>(keys::HOOK_AUTHORISER)? {
        builder = builder.request_hook(authoriser);
    }

    if let Some(config) = properties.get_json::<ScoreConfig>(keys::HOOK_SCORES)? {
        let table = ScoreTable::from_config(&config)
            .with_context(|| format!("property {}", keys::HOOK_SCORES))?
            .with_resolver(
                op_types::NAMED_OPERATION,
                Arc::new(NamedOperationScoreResolver::new(Arc::clone(cache), admin_auth)),
            );
        builder = builder.request_hook(OperationChainLimiter::new(table));
    }

    Ok(builder)
}
