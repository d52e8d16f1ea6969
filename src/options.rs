//! Traversal options: numeric configuration, the first request, and hooks.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::handler::{Doner, Starter, Updater};
use crate::page::PageMeta;

/// Default capacity of the mutation queue. Generous enough that page sources
/// rarely wait on it.
pub const DEFAULT_CAPACITY: usize = 500;

/// Plain-data part of the options, loadable from TOML.
///
/// ```toml
/// per_page = 50
/// total_items = 1234
/// capacity = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Expected total number of items, 0 if unknown.
    pub total_items: usize,
    /// Expected total number of pages, 0 if unknown.
    pub total_pages: usize,
    /// Expected items per page, 0 if unknown.
    pub per_page: usize,
    /// Capacity of the mutation queue.
    pub capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_items: 0,
            total_pages: 0,
            per_page: 0,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks that the configuration can drive a traversal.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.total_items > 0 && self.total_pages > 0 && self.per_page > 0 {
            let max_items = self.total_pages.saturating_mul(self.per_page);
            let min_items = (self.total_pages - 1).saturating_mul(self.per_page);
            if self.total_items > max_items || self.total_items <= min_items {
                return Err(ConfigError::InconsistentHints {
                    total_items: self.total_items,
                    total_pages: self.total_pages,
                    per_page: self.per_page,
                });
            }
        }
        Ok(self)
    }

    /// Metadata known before the first page is fetched.
    pub fn initial_meta(&self) -> PageMeta {
        PageMeta::new(self.total_items, self.total_pages, self.per_page)
    }
}

/// Options accepted by [`depaginate`](crate::depaginate).
///
/// Hooks are never taken implicitly from the item handler; pass them here.
pub struct DepaginateOptions<R> {
    pub(crate) config: EngineConfig,
    pub(crate) request: R,
    pub(crate) starter: Option<Arc<dyn Starter>>,
    pub(crate) updater: Option<Arc<dyn Updater>>,
    pub(crate) doner: Option<Arc<dyn Doner>>,
}

impl<R: Default> Default for DepaginateOptions<R> {
    fn default() -> Self {
        Self::from_config(EngineConfig::default())
    }
}

impl<R: Default> DepaginateOptions<R> {
    /// Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options seeded from a loaded configuration; the first request carries
    /// `R::default()`.
    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::with_request(R::default())
        }
    }
}

impl<R> DepaginateOptions<R> {
    /// Default options whose first request carries `payload`. Works for
    /// payload types with no default value.
    pub fn with_request(payload: R) -> Self {
        Self {
            config: EngineConfig::default(),
            request: payload,
            starter: None,
            updater: None,
            doner: None,
        }
    }

    /// Hints at the total number of items.
    pub fn total_items(mut self, n: usize) -> Self {
        self.config.total_items = n;
        self
    }

    /// Hints at the total number of pages.
    pub fn total_pages(mut self, n: usize) -> Self {
        self.config.total_pages = n;
        self
    }

    /// Hints at the number of items per page.
    pub fn per_page(mut self, n: usize) -> Self {
        self.config.per_page = n;
        self
    }

    /// Sets the mutation queue capacity.
    pub fn capacity(mut self, n: usize) -> Self {
        self.config.capacity = n;
        self
    }

    /// Sets the payload of the request for page 0.
    pub fn request(mut self, payload: R) -> Self {
        self.request = payload;
        self
    }

    /// Calls `starter` before the first fetch.
    pub fn with_starter(mut self, starter: impl Starter) -> Self {
        self.starter = Some(Arc::new(starter));
        self
    }

    /// Calls `updater` whenever the metadata changes.
    pub fn with_updater(mut self, updater: impl Updater) -> Self {
        self.updater = Some(Arc::new(updater));
        self
    }

    /// Calls `doner` once the traversal is complete.
    pub fn with_doner(mut self, doner: impl Doner) -> Self {
        self.doner = Some(Arc::new(doner));
        self
    }

    /// Installs one object as starter, updater, and doner.
    pub fn with_lifecycle<L>(mut self, hooks: Arc<L>) -> Self
    where
        L: Starter + Updater + Doner,
    {
        self.starter = Some(hooks.clone());
        self.updater = Some(hooks.clone());
        self.doner = Some(hooks);
        self
    }

    /// The numeric configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<R: fmt::Debug> fmt::Debug for DepaginateOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepaginateOptions")
            .field("config", &self.config)
            .field("request", &self.request)
            .field("starter", &self.starter.is_some())
            .field("updater", &self.updater.is_some())
            .field("doner", &self.doner.is_some())
            .finish()
    }
}
