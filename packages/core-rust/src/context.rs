use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::operation::Operation;
use crate::types::{User, Value};

/// Per-request context carrying identity and accumulator state.
///
/// Created once per top-level request and threaded by shared reference
/// through the whole call tree, including federated sub-executions. All
/// mutable state is behind locks so a `&Context` is enough everywhere.
#[derive(Debug)]
pub struct Context {
    user: User,
    job_id: Option<String>,
    /// First operation submitted with this context, kept for audit logging.
    original_operation: Mutex<Option<Operation>>,
    /// Exporters keyed by their concrete type.
    exporters: Mutex<HashMap<TypeId, Box<dyn Any + Send>>>,
    /// Active call depth per executor, keyed by an executor identity.
    nesting: Mutex<HashMap<usize, usize>>,
}

impl Context {
    #[must_use]
    pub fn new(user: User) -> Self {
        Self {
            user,
            job_id: None,
            original_operation: Mutex::new(None),
            exporters: Mutex::new(HashMap::new()),
            nesting: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// A fresh context for a background job run by the same user. Exporters
    /// and the audit snapshot are not carried over.
    #[must_use]
    pub fn for_job(&self, job_id: impl Into<String>) -> Self {
        Self::new(self.user.clone()).with_job_id(job_id)
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Records the caller's operation unless one was already recorded.
    pub fn record_original_operation(&self, op: &Operation) {
        let mut slot = self.original_operation.lock();
        if slot.is_none() {
            *slot = Some(op.clone());
        }
    }

    #[must_use]
    pub fn original_operation(&self) -> Option<Operation> {
        self.original_operation.lock().clone()
    }

    /// Runs `f` against the exporter of type `E`, creating it on first use.
    pub fn with_exporter<E, R>(&self, f: impl FnOnce(&mut E) -> R) -> R
    where
        E: Exporter + Default,
    {
        let mut exporters = self.exporters.lock();
        let slot = exporters
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(E::default()));
        match slot.downcast_mut::<E>() {
            Some(exporter) => f(exporter),
            None => {
                // Entries are keyed by their own TypeId, so a mismatch means the
                // map was corrupted; start the exporter afresh.
                let mut fresh = E::default();
                let out = f(&mut fresh);
                *slot = Box::new(fresh);
                out
            }
        }
    }

    /// Whether an exporter of type `E` has been created for this request.
    #[must_use]
    pub fn has_exporter<E: Exporter>(&self) -> bool {
        self.exporters.lock().contains_key(&TypeId::of::<E>())
    }

    /// Marks entry into the executor identified by `executor_key`. The
    /// returned guard reports whether this is the outermost call into that
    /// executor and restores the depth when dropped.
    #[must_use]
    pub fn enter(&self, executor_key: usize) -> NestingGuard<'_> {
        let depth = {
            let mut nesting = self.nesting.lock();
            let depth = nesting.entry(executor_key).or_insert(0);
            *depth += 1;
            *depth - 1
        };
        NestingGuard {
            context: self,
            executor_key,
            depth,
        }
    }
}

/// Scope of one executor call on a context. See [`Context::enter`].
#[derive(Debug)]
pub struct NestingGuard<'a> {
    context: &'a Context,
    executor_key: usize,
    depth: usize,
}

impl NestingGuard<'_> {
    /// Number of enclosing calls into the same executor.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.depth == 0
    }
}

impl Drop for NestingGuard<'_> {
    fn drop(&mut self) {
        let mut nesting = self.context.nesting.lock();
        if let Some(depth) = nesting.get_mut(&self.executor_key) {
            *depth = depth.saturating_sub(1);
            if *depth == 0 {
                nesting.remove(&self.executor_key);
            }
        }
    }
}

/// A per-request accumulator used by export-style operations.
pub trait Exporter: Any + Send {
    /// Appends values under `key`.
    fn add(&mut self, key: &str, values: Vec<Value>);

    /// Everything exported under `key` so far.
    fn get(&self, key: &str) -> Option<Vec<Value>>;
}

/// Exports values into named, de-duplicated sets that keep insertion order.
#[derive(Debug, Default)]
pub struct SetExporter {
    sets: BTreeMap<String, Vec<Value>>,
}

impl Exporter for SetExporter {
    fn add(&mut self, key: &str, values: Vec<Value>) {
        let set = self.sets.entry(key.to_string()).or_default();
        for value in values {
            if !set.contains(&value) {
                set.push(value);
            }
        }
    }

    fn get(&self, key: &str) -> Option<Vec<Value>> {
        self.sets.get(key).cloned()
    }
}
