//! Prompt resolution: declarative table, remote-first fetch, local fallback.
//!
//! Prompts are declared once at startup in a TOML table keyed by logical
//! name. At request time the resolver prefers the remote prompt store (so
//! prompt edits take effect without a redeploy) and silently degrades to the
//! local template on any remote failure. Degradation is an observable tag on
//! the result, never a swallowed exception.

mod store;

pub use store::{HttpPromptStore, PromptStore};

use crate::{RelayError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One prompt declaration from the local table. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub name: String,
    pub description: String,
    /// Name of the prompt in the remote store, if remotely managed
    pub remote_ref: Option<String>,
    /// Local template used whenever the remote path is unavailable
    pub fallback_template: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptEntry {
    #[serde(default)]
    description: String,
    remote_ref: Option<String>,
    template: String,
}

/// The local declarative prompt table, loaded once at process start.
///
/// TOML rejects duplicate keys, so a table with two entries under the same
/// name fails to parse; both that and a missing template are startup-fatal.
#[derive(Debug, Clone, Default)]
pub struct PromptTable {
    specs: HashMap<String, PromptSpec>,
}

impl PromptTable {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let entries: HashMap<String, PromptEntry> = toml::from_str(raw)
            .map_err(|e| RelayError::Config(format!("Malformed prompt table: {e}")))?;

        let mut specs = HashMap::new();
        for (name, entry) in entries {
            if entry.template.trim().is_empty() {
                return Err(RelayError::Config(format!(
                    "Prompt '{}' does not define a template",
                    name
                )));
            }
            specs.insert(
                name.clone(),
                PromptSpec {
                    name,
                    description: entry.description,
                    remote_ref: entry.remote_ref,
                    fallback_template: entry.template,
                },
            );
        }
        debug!(target = "prompt", count = specs.len(), "Loaded prompt table");
        Ok(Self { specs })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Prompt file not found at {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&PromptSpec> {
        self.specs.get(name)
    }

    /// Startup check: every prompt the pipeline depends on must be declared.
    pub fn validate(&self, required: &[&str]) -> Result<()> {
        for name in required {
            if !self.specs.contains_key(*name) {
                return Err(RelayError::Config(format!(
                    "Required prompt '{}' not defined in prompt table",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Parameterized prompt text with `{name}` slots filled per request
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fill `{key}` slots. Unknown slots are left as-is.
    pub fn render(&self, slots: &HashMap<&str, String>) -> String {
        let mut out = self.text.clone();
        for (key, value) in slots {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }
}

/// Where a resolved template came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSource {
    Remote,
    Fallback,
}

/// A resolved template plus its provenance, so callers can observe
/// degradation without the resolver ever failing their request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub template: PromptTemplate,
    pub source: PromptSource,
}

/// Resolves logical prompt names against the remote store with local
/// fallback. One bounded remote attempt per resolution, no caching.
pub struct PromptResolver {
    table: Arc<PromptTable>,
    store: Option<Arc<dyn PromptStore>>,
}

impl PromptResolver {
    pub fn new(table: Arc<PromptTable>, store: Option<Arc<dyn PromptStore>>) -> Self {
        Self { table, store }
    }

    /// Resolve a prompt by logical name.
    /// Contract:
    /// - The name must exist in the local table (enforced at startup by
    ///   `PromptTable::validate`); an unknown name here is a Config error.
    /// - Remote failures never propagate: the local fallback is returned
    ///   verbatim with `PromptSource::Fallback`.
    pub async fn resolve(&self, name: &str) -> Result<Resolution> {
        let spec = self.table.get(name).ok_or_else(|| {
            RelayError::Config(format!("Prompt '{}' not defined in prompt table", name))
        })?;

        if let (Some(store), Some(remote_ref)) = (&self.store, &spec.remote_ref) {
            debug!(target = "prompt", prompt = %name, remote = %remote_ref, "Fetching remote prompt");
            match store.fetch(remote_ref, None).await {
                Ok(template) => {
                    return Ok(Resolution {
                        template: PromptTemplate::new(template),
                        source: PromptSource::Remote,
                    });
                }
                Err(e) => {
                    warn!(target = "prompt", prompt = %name, error = %e, "Remote prompt fetch failed; using local fallback");
                }
            }
        }

        Ok(Resolution {
            template: PromptTemplate::new(spec.fallback_template.clone()),
            source: PromptSource::Fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const TABLE: &str = r#"
        [chat_response]
        description = "News answer with retrieved context"
        remote_ref = "chat-response-v2"
        template = "Context: {context}\nAnswer: {query}"

        [general_response]
        description = "Plain chat answer"
        template = "Answer: {query}"
    "#;

    struct FailingStore;

    #[async_trait]
    impl PromptStore for FailingStore {
        async fn fetch(&self, _name: &str, _label: Option<&str>) -> Result<String> {
            Err(RelayError::RemoteUnavailable("connection refused".into()))
        }
    }

    struct FixedStore(String);

    #[async_trait]
    impl PromptStore for FixedStore {
        async fn fetch(&self, _name: &str, _label: Option<&str>) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_table_parsing() {
        let table = PromptTable::from_toml_str(TABLE).unwrap();
        assert_eq!(table.len(), 2);
        let spec = table.get("chat_response").unwrap();
        assert_eq!(spec.remote_ref.as_deref(), Some("chat-response-v2"));
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_empty_template_is_fatal() {
        let err = PromptTable::from_toml_str("[p]\ntemplate = \"  \"").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let raw = "[p]\ntemplate = \"a\"\n[p]\ntemplate = \"b\"";
        assert!(matches!(
            PromptTable::from_toml_str(raw),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_validate_required() {
        let table = PromptTable::from_toml_str(TABLE).unwrap();
        assert!(table.validate(&["chat_response", "general_response"]).is_ok());
        assert!(table.validate(&["nonexistent"]).is_err());
    }

    #[test]
    fn test_render_fills_known_slots() {
        let template = PromptTemplate::new("Answer: {query} ({locale})");
        let mut slots = HashMap::new();
        slots.insert("query", "hello".to_string());
        assert_eq!(template.render(&slots), "Answer: hello ({locale})");
    }

    #[tokio::test]
    async fn test_resolve_prefers_remote() {
        let table = Arc::new(PromptTable::from_toml_str(TABLE).unwrap());
        let resolver = PromptResolver::new(
            table,
            Some(Arc::new(FixedStore("Remote: {query}".into()))),
        );

        let res = resolver.resolve("chat_response").await.unwrap();
        assert_eq!(res.source, PromptSource::Remote);
        assert_eq!(res.template.text(), "Remote: {query}");
    }

    #[tokio::test]
    async fn test_resolve_falls_back_on_remote_failure() {
        let table = Arc::new(PromptTable::from_toml_str(TABLE).unwrap());
        let resolver = PromptResolver::new(table.clone(), Some(Arc::new(FailingStore)));

        let res = resolver.resolve("chat_response").await.unwrap();
        assert_eq!(res.source, PromptSource::Fallback);
        assert_eq!(
            res.template.text(),
            table.get("chat_response").unwrap().fallback_template
        );
    }

    #[tokio::test]
    async fn test_resolve_without_remote_ref_uses_fallback() {
        let table = Arc::new(PromptTable::from_toml_str(TABLE).unwrap());
        let resolver = PromptResolver::new(
            table,
            Some(Arc::new(FixedStore("never used".into()))),
        );

        // general_response has no remote_ref, so the store is not consulted
        let res = resolver.resolve("general_response").await.unwrap();
        assert_eq!(res.source, PromptSource::Fallback);
        assert_eq!(res.template.text(), "Answer: {query}");
    }

    #[tokio::test]
    async fn test_resolve_unknown_name_is_config_error() {
        let table = Arc::new(PromptTable::from_toml_str(TABLE).unwrap());
        let resolver = PromptResolver::new(table, None);
        let err = resolver.resolve("missing").await.unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
