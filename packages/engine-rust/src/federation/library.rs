use std::fmt;

use dashmap::DashMap;

use crate::service::executor::Executor;
use crate::service::properties::Properties;

/// Builds a sub-executor from its id and resolved properties.
pub trait ExecutorFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the executor cannot be built from `properties`.
    fn create(&self, id: &str, properties: &Properties) -> anyhow::Result<Executor>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&str, &Properties) -> anyhow::Result<Executor> + Send + Sync,
{
    fn create(&self, id: &str, properties: &Properties) -> anyhow::Result<Executor> {
        self(id, properties)
    }
}

/// Named property presets that `AddExecutor` may refer to by `libraryId`.
#[derive(Default)]
pub struct ExecutorLibrary {
    presets: DashMap<String, Properties>,
}

impl ExecutorLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, library_id: impl Into<String>, properties: Properties) {
        self.presets.insert(library_id.into(), properties);
    }

    #[must_use]
    pub fn get(&self, library_id: &str) -> Option<Properties> {
        self.presets.get(library_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, library_id: &str) -> Option<Properties> {
        self.presets.remove(library_id).map(|(_, properties)| properties)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.presets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for ExecutorLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorLibrary").field("presets", &self.ids()).finish()
    }
}
