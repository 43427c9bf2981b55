use std::sync::Arc;

use sealdrop_core::config::SealdropConfig;
use tokio::sync::Mutex;

use crate::api::ShareApi;
use crate::registry::LocalRegistry;

/// Everything a share operation needs, passed in explicitly.
pub struct ShareContext<A> {
    pub config: Arc<SealdropConfig>,
    pub api: Arc<A>,
    /// `None` when uploads should not be remembered locally.
    pub registry: Option<Arc<Mutex<LocalRegistry>>>,
}

impl<A> Clone for ShareContext<A> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            api: Arc::clone(&self.api),
            registry: self.registry.clone(),
        }
    }
}

impl<A: ShareApi> ShareContext<A> {
    pub fn new(config: SealdropConfig, api: A) -> Self {
        Self {
            config: Arc::new(config),
            api: Arc::new(api),
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: LocalRegistry) -> Self {
        self.registry = Some(Arc::new(Mutex::new(registry)));
        self
    }

    /// Absolute URL for a server-relative location such as `/d/{id}`.
    pub fn absolute_url(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            return location.to_string();
        }
        let base = self.config.server.url.trim_end_matches('/');
        if location.starts_with('/') {
            format!("{base}{location}")
        } else {
            format!("{base}/{location}")
        }
    }
}
