// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LoaderError;
use crate::value::Resource;

/// External resource loader. Given a list of urls and a cancellation token,
/// returns a mapping from url to an ordered list of resources. A url absent
/// from the map is treated as "zero resources".
#[async_trait(?Send)]
pub trait ResourceLoader {
    async fn fetch(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<Resource>>, LoaderError>;
}

/// Deduplicates urls across expressions and caches per-url results for the
/// lifetime of one resolution pass.
pub struct LoaderFacade<'a> {
    inner: &'a dyn ResourceLoader,
    cache: HashMap<String, Rc<Vec<Resource>>>,
}

impl<'a> LoaderFacade<'a> {
    pub fn new(inner: &'a dyn ResourceLoader) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self, url: &str) -> Option<Rc<Vec<Resource>>> {
        self.cache.get(url).cloned()
    }

    /// Fetches every url in `urls` not already cached, merges the results
    /// into the cache, and returns the full set of results for `urls`
    /// (cached or fresh).
    pub async fn fetch_all(
        &mut self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Rc<Vec<Resource>>>, LoaderError> {
        let pending: Vec<String> = urls
            .iter()
            .filter(|u| !self.cache.contains_key(*u))
            .cloned()
            .collect();

        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "batching fetch for {} url(s)", pending.len());
            let fetched = self.inner.fetch(&pending, cancel).await?;
            for url in &pending {
                let resources = fetched.get(url).cloned().unwrap_or_default();
                self.cache.insert(url.clone(), Rc::new(resources));
            }
        }

        Ok(urls
            .iter()
            .filter_map(|u| self.cache.get(u).cloned().map(|r| (u.clone(), r)))
            .collect())
    }
}
