//! Virtual redirectors for metalink URLs.
//!
//! A metalink URL does not name a server; it resolves to an ordered list of
//! candidate endpoints the handler traverses on redirects and retries. The
//! registry is process-wide shared state, injected as a collaborator rather
//! than reached through a global; registration is idempotent and
//! thread-safe. Fetching and parsing metalink documents is the concern of
//! whoever populates the registry.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::{
    error::{Error, Result},
    url::Url,
};

/// An ordered list of candidate endpoints behind a metalink URL.
#[derive(Debug)]
pub struct VirtualRedirector {
    url: Url,
    endpoints: Vec<Url>,
}

impl VirtualRedirector {
    /// Create a redirector for `url` resolving to `endpoints`, best first.
    #[must_use]
    pub const fn new(url: Url, endpoints: Vec<Url>) -> Self { Self { url, endpoints } }

    /// The metalink URL this redirector stands for.
    #[must_use]
    pub const fn url(&self) -> &Url { &self.url }

    /// Candidate endpoint at `index`, in preference order.
    #[must_use]
    pub fn endpoint(&self, index: usize) -> Option<&Url> { self.endpoints.get(index) }

    /// Number of candidate endpoints.
    #[must_use]
    pub fn len(&self) -> usize { self.endpoints.len() }

    /// Whether the redirector resolves to no endpoints at all.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.endpoints.is_empty() }
}

/// Process-wide index of virtual redirectors keyed by metalink location.
#[derive(Debug, Default)]
pub struct RedirectorRegistry {
    entries: DashMap<String, Arc<VirtualRedirector>>,
}

impl RedirectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Populate the registry with a resolved redirector.
    ///
    /// The first population wins; repeated inserts for the same URL return
    /// the existing entry, keeping registration idempotent.
    pub fn insert(&self, url: &Url, endpoints: Vec<Url>) -> Arc<VirtualRedirector> {
        self.entries
            .entry(key(url))
            .or_insert_with(|| {
                debug!(
                    "registering virtual redirector: url={url}, endpoints={}",
                    endpoints.len()
                );
                Arc::new(VirtualRedirector::new(url.clone(), endpoints))
            })
            .clone()
    }

    /// Activate the redirector for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] when no redirector has been resolved
    /// for the URL; loading metalink documents is the populator's concern.
    pub fn register(&self, url: &Url) -> Result<Arc<VirtualRedirector>> {
        self.resolve(url)
            .ok_or(Error::Uninitialized("virtual redirector"))
    }

    /// Look up the redirector for `url`, if one is known.
    #[must_use]
    pub fn resolve(&self, url: &Url) -> Option<Arc<VirtualRedirector>> {
        self.entries
            .get(&key(url))
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn key(url: &Url) -> String { format!("{}{}", url.host_id(), url.path()) }

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_url() -> Url {
        Url::parse("root://meta.cern.ch:1094//data/set.meta4").expect("metalink URL")
    }

    fn endpoints() -> Vec<Url> {
        vec![
            Url::parse("root://a.cern.ch:1094//data/set").expect("endpoint a"),
            Url::parse("root://b.cern.ch:1094//data/set").expect("endpoint b"),
        ]
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = RedirectorRegistry::new();
        let url = meta_url();
        let first = registry.insert(&url, endpoints());
        let second = registry.insert(&url, Vec::new());
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn register_requires_prior_resolution() {
        let registry = RedirectorRegistry::new();
        let url = meta_url();
        assert!(matches!(
            registry.register(&url),
            Err(Error::Uninitialized(_))
        ));
        registry.insert(&url, endpoints());
        let redirector = registry.register(&url).expect("registered redirector");
        assert_eq!(redirector.endpoint(0).map(Url::host), Some("a.cern.ch"));
    }
}
