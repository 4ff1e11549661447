//! Write-through JSON store for post templates.
//!
//! Separate file from the ticket store so the admin editor can read and
//! write templates without touching live ticket state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use ferry_core::write_text_atomic;

use crate::template_records::PostTemplate;

pub const TEMPLATE_STORE_FILE_NAME: &str = "templates.json";
const TEMPLATE_STORE_SCHEMA_VERSION: u32 = 1;

fn template_store_schema_version() -> u32 {
    TEMPLATE_STORE_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateStoreFile {
    #[serde(default = "template_store_schema_version")]
    schema_version: u32,
    #[serde(default)]
    templates: BTreeMap<String, PostTemplate>,
}

impl Default for TemplateStoreFile {
    fn default() -> Self {
        Self {
            schema_version: TEMPLATE_STORE_SCHEMA_VERSION,
            templates: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    path: PathBuf,
    state: Arc<Mutex<TemplateStoreFile>>,
}

impl TemplateStore {
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(TEMPLATE_STORE_FILE_NAME);
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read template file {}", path.display()))?;
            let parsed: TemplateStoreFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse template file {}", path.display()))?;
            if parsed.schema_version != TEMPLATE_STORE_SCHEMA_VERSION {
                bail!(
                    "unsupported template store schema: expected {}, found {}",
                    TEMPLATE_STORE_SCHEMA_VERSION,
                    parsed.schema_version
                );
            }
            parsed
        } else {
            TemplateStoreFile::default()
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut TemplateStoreFile) -> T) -> Result<T> {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let value = op(&mut guard);
        let mut payload = serde_json::to_string_pretty(&*guard)
            .context("failed to serialize template store")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write template file {}", self.path.display()))?;
        Ok(value)
    }

    pub fn get(&self, name: &str) -> Option<PostTemplate> {
        let guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.templates.get(name).cloned()
    }

    pub fn set(&self, template: PostTemplate) -> Result<()> {
        self.mutate(|state| {
            state.templates.insert(template.name.clone(), template);
        })
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        self.mutate(|state| state.templates.remove(name).is_some())
    }

    pub fn list_names(&self) -> Vec<String> {
        let guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.templates.keys().cloned().collect()
    }
}
