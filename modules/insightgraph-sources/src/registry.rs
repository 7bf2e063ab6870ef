//! Registry of validated source plugins, keyed by `source_id`.
//!
//! Registration swaps a whole [`RegisteredSource`] behind one `Arc` under the
//! write lock, so a concurrent `get` sees either the old entry or the new one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use insightgraph_common::{
    Capability, ContentItem, InsightError, PluginDescriptor, SourceConfig,
};

use crate::plugin::{SearchFilters, SourcePlugin};

/// A plugin together with what it declared at registration time.
pub struct RegisteredSource {
    pub descriptor: PluginDescriptor,
    pub config: SourceConfig,
    pub plugin: Arc<dyn SourcePlugin>,
}

impl RegisteredSource {
    pub fn source_id(&self) -> &str {
        &self.descriptor.source_id
    }
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, Arc<RegisteredSource>>,
    order: Vec<String>,
}

#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<Entries>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a plugin. Replaces any entry with the same
    /// `source_id`, keeping its position in [`list`](Self::list).
    pub fn register(
        &self,
        descriptor: PluginDescriptor,
        config: SourceConfig,
        plugin: Arc<dyn SourcePlugin>,
    ) -> Result<(), InsightError> {
        let source_id = descriptor.source_id.clone();

        if source_id.trim().is_empty() {
            return Err(InsightError::invalid_config(&source_id, "empty source_id"));
        }
        if config.source_id != source_id {
            return Err(InsightError::invalid_config(
                &source_id,
                format!("config is for {}", config.source_id),
            ));
        }
        if descriptor.requires_auth && config.auth.is_empty() {
            return Err(InsightError::invalid_config(&source_id, "auth required but not provided"));
        }
        let supported = plugin.capabilities();
        if let Some(missing) = descriptor
            .capabilities
            .iter()
            .find(|c| !supported.contains(c))
        {
            return Err(InsightError::invalid_config(
                &source_id,
                format!("{} plugin does not provide {missing}", plugin.kind()),
            ));
        }
        if !plugin.validate_config(&config) {
            return Err(InsightError::invalid_config(
                &source_id,
                format!("rejected by {} plugin", plugin.kind()),
            ));
        }

        let entry = Arc::new(RegisteredSource {
            descriptor,
            config,
            plugin,
        });

        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.by_id.insert(source_id.clone(), entry).is_some() {
            info!(source_id = source_id.as_str(), "Replaced registered source");
        } else {
            entries.order.push(source_id.clone());
            info!(source_id = source_id.as_str(), "Registered source");
        }
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Result<Arc<RegisteredSource>, InsightError> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .by_id
            .get(source_id)
            .cloned()
            .ok_or_else(|| InsightError::NotFound(source_id.to_string()))
    }

    pub fn descriptor(&self, source_id: &str) -> Option<PluginDescriptor> {
        self.get(source_id).ok().map(|e| e.descriptor.clone())
    }

    /// Registered source ids in first-registration order.
    pub fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .order
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keyword search against one source. Fails fast with
    /// `CapabilityUnsupported` if the source never declared `Search`.
    pub async fn search(
        &self,
        source_id: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ContentItem>, InsightError> {
        let entry = self.get(source_id)?;
        if !entry.descriptor.supports(Capability::Search) {
            return Err(InsightError::CapabilityUnsupported {
                source_id: source_id.to_string(),
                capability: Capability::Search,
            });
        }
        entry.plugin.search_content(query, filters).await
    }

    /// Build a registry from startup configuration. Disabled sources are
    /// skipped; a source whose plugin cannot be built or fails validation is
    /// logged and left out without affecting the others.
    pub fn from_configs<F>(configs: &[SourceConfig], mut factory: F) -> Self
    where
        F: FnMut(&SourceConfig) -> anyhow::Result<(PluginDescriptor, Arc<dyn SourcePlugin>)>,
    {
        let registry = Self::new();
        for config in configs {
            if !config.enabled {
                info!(source_id = config.source_id.as_str(), "Source disabled, skipping");
                continue;
            }
            let (descriptor, plugin) = match factory(config) {
                Ok(built) => built,
                Err(e) => {
                    warn!(source_id = config.source_id.as_str(), error = %e, "Could not build plugin");
                    continue;
                }
            };
            if let Err(e) = registry.register(descriptor, config.clone(), plugin) {
                warn!(source_id = config.source_id.as_str(), error = %e, "Plugin not registered");
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::plugin::{ContentStream, FetchParams};

    struct StubPlugin {
        caps: BTreeSet<Capability>,
        valid: bool,
        tag: &'static str,
    }

    impl StubPlugin {
        fn new(tag: &'static str) -> Self {
            Self {
                caps: BTreeSet::from([Capability::Stream]),
                valid: true,
                tag,
            }
        }
    }

    #[async_trait]
    impl SourcePlugin for StubPlugin {
        fn kind(&self) -> &str {
            self.tag
        }

        fn validate_config(&self, _config: &SourceConfig) -> bool {
            self.valid
        }

        fn capabilities(&self) -> BTreeSet<Capability> {
            self.caps.clone()
        }

        fn fetch_content(&self, _params: FetchParams) -> ContentStream<'_> {
            Box::pin(stream::empty())
        }
    }

    fn register(registry: &PluginRegistry, id: &str, plugin: StubPlugin) -> Result<(), InsightError> {
        registry.register(
            PluginDescriptor::new(id, [Capability::Stream]),
            SourceConfig::new(id, "stub"),
            Arc::new(plugin),
        )
    }

    #[test]
    fn re_registering_replaces_instead_of_duplicating() {
        let registry = PluginRegistry::new();
        register(&registry, "reddit", StubPlugin::new("first")).unwrap();
        register(&registry, "hn", StubPlugin::new("other")).unwrap();
        register(&registry, "reddit", StubPlugin::new("second")).unwrap();

        assert_eq!(registry.list(), vec!["reddit".to_string(), "hn".to_string()]);
        assert_eq!(registry.get("reddit").unwrap().plugin.kind(), "second");
    }

    #[test]
    fn invalid_config_is_not_added() {
        let registry = PluginRegistry::new();
        let mut plugin = StubPlugin::new("bad");
        plugin.valid = false;

        let err = register(&registry, "bad", plugin).unwrap_err();
        assert!(matches!(err, InsightError::InvalidConfig { .. }));
        assert!(registry.is_empty());
        assert!(matches!(registry.get("bad"), Err(InsightError::NotFound(_))));
    }

    #[test]
    fn failed_replacement_keeps_previous_entry() {
        let registry = PluginRegistry::new();
        register(&registry, "feed", StubPlugin::new("good")).unwrap();
        let mut plugin = StubPlugin::new("bad");
        plugin.valid = false;
        assert!(register(&registry, "feed", plugin).is_err());
        assert_eq!(registry.get("feed").unwrap().plugin.kind(), "good");
    }

    #[test]
    fn descriptor_cannot_claim_capabilities_the_plugin_lacks() {
        let registry = PluginRegistry::new();
        let err = registry
            .register(
                PluginDescriptor::new("s", [Capability::Stream, Capability::Search]),
                SourceConfig::new("s", "stub"),
                Arc::new(StubPlugin::new("s")),
            )
            .unwrap_err();
        assert!(matches!(err, InsightError::InvalidConfig { .. }));
    }

    #[test]
    fn auth_required_without_credentials_is_invalid() {
        let registry = PluginRegistry::new();
        let mut descriptor = PluginDescriptor::new("s", [Capability::Stream]);
        descriptor.requires_auth = true;
        let err = registry
            .register(descriptor, SourceConfig::new("s", "stub"), Arc::new(StubPlugin::new("s")))
            .unwrap_err();
        assert!(matches!(err, InsightError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn search_on_stream_only_source_is_capability_unsupported() {
        let registry = PluginRegistry::new();
        register(&registry, "feed", StubPlugin::new("feed")).unwrap();

        let err = registry
            .search("feed", "openai", &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InsightError::CapabilityUnsupported {
                capability: Capability::Search,
                ..
            }
        ));

        let err = registry
            .search("missing", "openai", &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InsightError::NotFound(_)));
    }

    #[test]
    fn from_configs_skips_disabled_and_broken_sources() {
        let mut disabled = SourceConfig::new("off", "stub");
        disabled.enabled = false;
        let configs = vec![
            SourceConfig::new("a", "stub"),
            disabled,
            SourceConfig::new("b", "unknown"),
            SourceConfig::new("c", "stub"),
        ];

        let registry = PluginRegistry::from_configs(&configs, |config| {
            if config.kind != "stub" {
                anyhow::bail!("unknown kind {}", config.kind);
            }
            let plugin: Arc<dyn SourcePlugin> = Arc::new(StubPlugin::new("stub"));
            Ok((PluginDescriptor::new(&config.source_id, [Capability::Stream]), plugin))
        });

        assert_eq!(registry.list(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn concurrent_readers_never_see_partial_entries() {
        let registry = Arc::new(PluginRegistry::new());
        register(&registry, "s", StubPlugin::new("v0")).unwrap();

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let tag: &'static str = if i % 2 == 0 { "even" } else { "odd" };
                    register(&registry, "s", StubPlugin::new(tag)).unwrap();
                }
            })
        };
        for _ in 0..200 {
            let entry = registry.get("s").unwrap();
            assert_eq!(entry.source_id(), "s");
            assert!(["v0", "even", "odd"].contains(&entry.plugin.kind()));
            assert_eq!(registry.len(), 1);
        }
        writer.join().unwrap();
    }
}
