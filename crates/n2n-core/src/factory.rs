//! Type-keyed construction of sources and destinations
//!
//! A configuration names its source and destination by type (`csv`, `api`,
//! ...). The registries map those names to constructors. Names are matched
//! case-insensitively. Callers can register their own constructors, which is
//! also how tests hand a pipeline a pre-wired component.
//!
//! ```rust,ignore
//! let mut destinations = DestinationRegistry::with_defaults();
//! let handle = MemoryHandle::default();
//! destinations.register("memory", move || {
//!     Box::new(MemoryDestination::with_handle(handle.clone()))
//! });
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::connectors::{
    ApiDestination, CsvSource, Destination, FileDestination, JsonlSource, MemoryDestination,
    Source,
};
use crate::error::{Error, Result};
use crate::record::ValidationOutcome;

type Constructor<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// Name to constructor map for one kind of component
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    constructors: BTreeMap<String, Constructor<T>>,
}

/// Registry of source constructors
pub type SourceRegistry = Registry<dyn Source>;

/// Registry of destination constructors
pub type DestinationRegistry = Registry<dyn Destination>;

impl<T: ?Sized> Registry<T> {
    /// An empty registry; `kind` names the component kind in errors
    pub fn empty(kind: &'static str) -> Self {
        Self {
            kind,
            constructors: BTreeMap::new(),
        }
    }

    /// Register a constructor, replacing any previous one for `name`
    pub fn register<F>(&mut self, name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.trim().to_lowercase(), Arc::new(constructor));
        self
    }

    /// Whether a constructor is registered for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.trim().to_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Construct an uninitialized component
    pub fn construct(&self, name: &str) -> Result<Box<T>> {
        let constructor = self
            .constructors
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| Error::UnknownType {
                kind: self.kind,
                requested: name.to_string(),
                available: self.names().join(", "),
            })?;
        Ok(constructor())
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

fn check(name: &str, outcome: ValidationOutcome) -> Result<()> {
    for warning in &outcome.warnings {
        warn!(component = name, "{warning}");
    }
    if outcome.valid {
        Ok(())
    } else {
        Err(Error::configuration(name, outcome.errors.join("; ")))
    }
}

impl Registry<dyn Source> {
    /// Registry with the built-in sources: `csv`, `jsonl`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty("source");
        registry
            .register("csv", || Box::new(CsvSource::new()))
            .register("jsonl", || Box::new(JsonlSource::new()));
        registry
    }

    /// Construct, initialize and validate a source
    pub async fn create(&self, name: &str, settings: &Settings) -> Result<Box<dyn Source>> {
        let mut source = self.construct(name)?;
        source.initialize(settings).await?;
        check(name, source.validate())?;
        debug!(source = name, "source created");
        Ok(source)
    }
}

impl Default for Registry<dyn Source> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry<dyn Destination> {
    /// Registry with the built-in destinations: `api` (alias `http`),
    /// `file`, `memory`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty("destination");
        registry
            .register("api", || Box::new(ApiDestination::new()))
            .register("http", || Box::new(ApiDestination::new()))
            .register("file", || Box::new(FileDestination::new()))
            .register("memory", || Box::new(MemoryDestination::new()));
        registry
    }

    /// Construct, initialize and validate a destination
    pub async fn create(&self, name: &str, settings: &Settings) -> Result<Box<dyn Destination>> {
        let mut destination = self.construct(name)?;
        destination.initialize(settings).await?;
        check(name, destination.validate())?;
        debug!(destination = name, "destination created");
        Ok(destination)
    }
}

impl Default for Registry<dyn Destination> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::MemoryHandle;
    use crate::record::Record;

    #[test]
    fn test_default_names() {
        assert_eq!(SourceRegistry::with_defaults().names(), vec!["csv", "jsonl"]);
        assert_eq!(
            DestinationRegistry::with_defaults().names(),
            vec!["api", "file", "http", "memory"]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let sources = SourceRegistry::with_defaults();
        assert!(sources.contains("CSV"));
        assert_eq!(sources.construct(" Csv ").unwrap().kind(), "csv");
        assert_eq!(
            DestinationRegistry::with_defaults().construct("HTTP").unwrap().kind(),
            "api"
        );
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let err = DestinationRegistry::with_defaults()
            .construct("kafka")
            .err()
            .unwrap();
        assert!(err.is_configuration());
        let message = err.to_string();
        assert!(message.contains("kafka"));
        assert!(message.contains("api, file, http, memory"));
    }

    #[tokio::test]
    async fn test_create_initializes() {
        let handle = MemoryHandle::default();
        let mut destinations = DestinationRegistry::with_defaults();
        let shared = handle.clone();
        destinations.register("memory", move || {
            Box::new(MemoryDestination::with_handle(shared.clone()))
        });

        let destination = destinations.create("memory", &Settings::new()).await.unwrap();
        destination
            .write_one(&Record::new("1", Default::default()))
            .await
            .unwrap();
        assert_eq!(handle.len(), 1);
    }

    #[tokio::test]
    async fn test_create_reports_initialize_failure() {
        let err = SourceRegistry::with_defaults()
            .create("csv", &Settings::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
