//! Template store: the layouts each exporter has announced.
//!
//! Keyed on (exporter address, source id, template id). Last write wins:
//! exporters periodically re-announce their templates and may redefine one
//! under the same id. Entries live until swept; without a sweep they live
//! as long as the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use nf9_core::{Template, TemplateKey};

#[derive(Debug, Clone)]
struct StoredTemplate {
    template: Arc<Template>,
    refreshed: Instant,
}

/// Shared template store. Clones share the same map.
///
/// DashMap shards by key, so a store cloned into several listener tasks
/// needs no outer lock.
#[derive(Clone, Default)]
pub struct TemplateStore {
    entries: Arc<DashMap<TemplateKey, StoredTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the template for `key`.
    pub fn put(&self, key: TemplateKey, template: Template) {
        let replaced = self.entries.insert(
            key,
            StoredTemplate {
                template: Arc::new(template),
                refreshed: Instant::now(),
            },
        );

        if replaced.is_none() {
            tracing::debug!(
                exporter = %key.exporter,
                source_id = key.source_id,
                template_id = key.template_id,
                "template learned"
            );
        }
    }

    /// The current template for `key`, if one has been announced.
    pub fn get(&self, key: &TemplateKey) -> Option<Arc<Template>> {
        self.entries.get(key).map(|e| e.template.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove templates not refreshed within `older_than`.
    /// Returns the number of entries removed.
    pub fn sweep(&self, older_than: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.refreshed.elapsed() < older_than);
        before.saturating_sub(self.entries.len())
    }
}
