//! Domain config store
//!
//! Serves loaded `DomainConfig`s to the rest of the gateway. Loading is
//! fail-soft: one bad definition file never blocks the others. A lookup
//! miss triggers a lazy load when a backing file exists.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{ConfigError, DomainConfig, IntentConfig};

const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

pub struct ConfigStore {
    dir: PathBuf,
    configs: RwLock<HashMap<String, Arc<DomainConfig>>>,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            configs: RwLock::new(HashMap::new()),
        }
    }

    fn definition_path(&self, domain: &str) -> Option<PathBuf> {
        DEFINITION_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", domain, ext)))
            .find(|p| p.is_file())
    }

    /// Load (or reload) one domain from its definition file.
    pub fn load(&self, domain: &str) -> Result<Arc<DomainConfig>, ConfigError> {
        let path = self
            .definition_path(domain)
            .ok_or_else(|| ConfigError::FileNotFound(format!("{}/{}", self.dir.display(), domain)))?;
        self.load_path(&path)
    }

    fn load_path(&self, path: &Path) -> Result<Arc<DomainConfig>, ConfigError> {
        let config = Arc::new(DomainConfig::from_file(path)?);
        self.configs
            .write()
            .insert(config.domain_name.clone(), config.clone());
        tracing::info!(domain = %config.domain_name, path = %path.display(), "domain config loaded");
        Ok(config)
    }

    /// Load every definition file in the directory. Invalid files are
    /// logged and skipped; returns the number successfully loaded.
    pub fn load_all(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "domain config directory unreadable");
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            if !path.is_file() || !DEFINITION_EXTENSIONS.contains(&ext) {
                continue;
            }
            match self.load_path(&path) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "skipping invalid domain config");
                }
            }
        }
        loaded
    }

    /// Fetch a domain, lazily loading it on a miss when a backing
    /// definition file exists.
    pub fn get(&self, domain: &str) -> Option<Arc<DomainConfig>> {
        if let Some(config) = self.configs.read().get(domain) {
            return Some(config.clone());
        }
        self.load(domain).ok()
    }

    pub fn get_intent(&self, domain: &str, intent: &str) -> Option<IntentConfig> {
        self.get(domain)
            .and_then(|c| c.get_intent(intent).cloned())
    }

    pub fn system_prompt(&self, domain: &str) -> Option<String> {
        self.get(domain).and_then(|c| c.system_prompt.clone())
    }

    pub fn response_template(&self, domain: &str, intent: &str) -> Option<String> {
        self.get(domain)
            .and_then(|c| c.response_templates.get(intent).cloned())
    }

    pub fn list_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.configs.read().keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Re-read one domain from disk, replacing the cached copy.
    pub fn reload(&self, domain: &str) -> Result<Arc<DomainConfig>, ConfigError> {
        self.load(domain)
    }

    /// Persist a definition and cache it. Writes YAML next to the other
    /// definitions.
    pub fn save(&self, config: &DomainConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let path = self
            .definition_path(&config.domain_name)
            .unwrap_or_else(|| self.dir.join(format!("{}.yaml", config.domain_name)));
        config.save_to_file(&path)?;
        self.configs
            .write()
            .insert(config.domain_name.clone(), Arc::new(config.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpMethod, RetrievalConfig};

    fn write_domain(dir: &Path, name: &str) {
        let config = DomainConfig {
            domain_name: name.to_string(),
            description: String::new(),
            intents: vec![IntentConfig {
                name: "greeting".to_string(),
                entities: vec![],
                api_endpoint: None,
                api_method: HttpMethod::default(),
                api_headers: HashMap::new(),
                response_template: None,
                requires_auth: false,
            }],
            context_retrieval: RetrievalConfig::default(),
            response_templates: HashMap::new(),
            system_prompt: None,
            fallback_response: "Sorry.".to_string(),
            max_turns: 50,
            metadata: HashMap::new(),
        };
        config
            .save_to_file(&dir.join(format!("{}.yaml", name)))
            .unwrap();
    }

    #[test]
    fn test_load_all_fail_soft() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "healthcare");
        write_domain(dir.path(), "real_estate");
        // An invalid definition must not block the others
        std::fs::write(dir.path().join("broken.yaml"), "intents: []").unwrap();

        let store = ConfigStore::new(dir.path());
        assert_eq!(store.load_all(), 2);
        assert!(store.get("healthcare").is_some());
        assert!(store.get("broken").is_none());
    }

    #[test]
    fn test_lazy_hydrate_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "healthcare");

        let store = ConfigStore::new(dir.path());
        // Nothing loaded yet; the lookup loads from disk
        assert!(store.get("healthcare").is_some());
        assert_eq!(store.list_domains(), vec!["healthcare".to_string()]);
    }

    #[test]
    fn test_get_unknown_domain() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(store.get("nope").is_none());
        assert!(store.get_intent("nope", "greeting").is_none());
    }

    #[test]
    fn test_save_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "retail");
        let store = ConfigStore::new(dir.path());

        let mut config = (*store.get("retail").unwrap()).clone();
        config
            .response_templates
            .insert("greeting".to_string(), "Welcome!".to_string());
        store.save(&config).unwrap();

        let reloaded = store.reload("retail").unwrap();
        assert_eq!(
            reloaded.response_templates.get("greeting").map(String::as_str),
            Some("Welcome!")
        );
    }
}
