//! Agent Registry (§4.3): the route table mapping an `agent_id` to its
//! system prompt, model, and tool schema, with a three-layer persistence
//! model — compiled defaults, an on-disk JSON override document overlaid
//! at startup, and an admin write-through.
//!
//! Layering and the "rewrite the whole document on every write" persistence
//! contract are grounded on `original_source/backend/agents/registry.py`.
//! The process-global, rarely-written, never-awaits-while-locked shape
//! matches the `std::sync::RwLock`-guarded globals in `orchestration.rs`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum RegistryError {
    UnknownAgent(String),
    Io(String),
    Serde(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownAgent(id) => write!(f, "unknown agent_id '{id}'"),
            RegistryError::Io(msg) => write!(f, "registry I/O error: {msg}"),
            RegistryError::Serde(msg) => write!(f, "registry document error: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// One routable agent: a system prompt, a model id, and the tool names it
/// may call (empty for pure text/JSON generators).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub module: String,
    pub system_prompt: String,
    pub model: String,
    pub tools: Vec<String>,
}

/// A sparse patch accepted by `PUT /api/admin/agents/{id}` (§6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentPatch {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub tools: Option<Vec<String>>,
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

/// The concrete agent set (§4.3 expansion), grounded in the original
/// registry's module groupings.
fn compiled_defaults() -> HashMap<String, AgentEntry> {
    let model = default_model();
    let agent = |module: &str, prompt: &str, tools: &[&str]| AgentEntry {
        module: module.to_string(),
        system_prompt: prompt.to_string(),
        model: model.clone(),
        tools: tools.iter().map(|s| s.to_string()).collect(),
    };

    HashMap::from([
        (
            "chat".to_string(),
            agent(
                "Conversational",
                "Você é um assistente conversacional direto e prestativo.",
                &[],
            ),
        ),
        (
            "web_search".to_string(),
            agent(
                "Conversational",
                "Pesquise na web e responda com fontes.",
                &["web_search", "web_fetch"],
            ),
        ),
        (
            "file_generator".to_string(),
            agent(
                "Chat",
                "Gere o documento solicitado e sempre inclua o link de download.",
                &["generate_pdf", "generate_excel", "execute_python"],
            ),
        ),
        (
            "file_modifier".to_string(),
            agent(
                "Chat",
                "Modifique o arquivo existente conforme solicitado e inclua o novo link.",
                &["fetch_file_content", "modify_excel", "modify_pptx", "modify_pdf"],
            ),
        ),
        (
            "design".to_string(),
            agent("Pages", "Produza um JSON de design para a página.", &[]),
        ),
        (
            "pages_ux".to_string(),
            agent("Pages", "Planeje a experiência da página.", &[]),
        ),
        (
            "pages_dev".to_string(),
            agent("Pages", "Implemente a página solicitada.", &[]),
        ),
        (
            "pages_copy".to_string(),
            agent("Pages", "Escreva o texto da página solicitada.", &[]),
        ),
        (
            "dev".to_string(),
            agent("System", "Implemente a alteração de código solicitada.", &[]),
        ),
        (
            "qa".to_string(),
            agent(
                "System",
                "Revise a saída do especialista e responda apenas com JSON estrito.",
                &[],
            ),
        ),
    ])
}

/// Process-global route table. Reads are frequent; writes are rare and
/// always synchronous (serializing JSON, never performing I/O while the
/// lock is held beyond the final `fs::write`), so a synchronous
/// `RwLock` is sufficient (§5 Shared resources).
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentEntry>>,
    override_path: Option<PathBuf>,
}

impl AgentRegistry {
    /// Builds the registry from compiled defaults, overlaying the on-disk
    /// override document at `override_path` if it exists and parses.
    pub fn load(override_path: Option<PathBuf>) -> Self {
        let mut entries = compiled_defaults();
        if let Some(path) = &override_path {
            if let Ok(raw) = std::fs::read_to_string(path) {
                if let Ok(overrides) = serde_json::from_str::<HashMap<String, AgentEntry>>(&raw) {
                    for (id, entry) in overrides {
                        entries.insert(id, entry);
                    }
                } else {
                    log::warn!("[REGISTRY] override document at {path:?} failed to parse; compiled defaults only");
                }
            }
        }
        Self {
            entries: RwLock::new(entries),
            override_path,
        }
    }

    pub fn get_prompt(&self, agent_id: &str) -> Result<String, RegistryError> {
        self.entries
            .read()
            .unwrap()
            .get(agent_id)
            .map(|e| e.system_prompt.clone())
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    /// Falls back to the process default model when `agent_id` has none set
    /// (never happens with compiled defaults, but an override document may
    /// omit the field via a lenient hand edit).
    pub fn get_model(&self, agent_id: &str, process_default: &str) -> String {
        self.entries
            .read()
            .unwrap()
            .get(agent_id)
            .map(|e| e.model.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| process_default.to_string())
    }

    pub fn get_tools(&self, agent_id: &str) -> Result<Vec<String>, RegistryError> {
        self.entries
            .read()
            .unwrap()
            .get(agent_id)
            .map(|e| e.tools.clone())
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    pub fn get_entry(&self, agent_id: &str) -> Result<AgentEntry, RegistryError> {
        self.entries
            .read()
            .unwrap()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    pub fn list(&self) -> HashMap<String, AgentEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Applies `patch` to `agent_id` and, if an override path is configured,
    /// rewrites the *entire* override document (not a sparse merge),
    /// matching the original's "rewrite the whole document" contract.
    pub fn update(&self, agent_id: &str, patch: AgentPatch) -> Result<AgentEntry, RegistryError> {
        let updated = {
            let mut guard = self.entries.write().unwrap();
            let entry = guard
                .get_mut(agent_id)
                .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;
            if let Some(prompt) = patch.system_prompt {
                entry.system_prompt = prompt;
            }
            if let Some(model) = patch.model {
                entry.model = model;
            }
            if let Some(tools) = patch.tools {
                entry.tools = tools;
            }
            entry.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    /// Resets `agent_id` back to its compiled default and persists.
    pub fn reset(&self, agent_id: &str) -> Result<AgentEntry, RegistryError> {
        let default_entry = compiled_defaults()
            .remove(agent_id)
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))?;
        {
            let mut guard = self.entries.write().unwrap();
            guard.insert(agent_id.to_string(), default_entry.clone());
        }
        self.persist()?;
        Ok(default_entry)
    }

    fn persist(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.override_path else {
            return Ok(());
        };
        let snapshot = self.entries.read().unwrap().clone();
        let serialized = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| RegistryError::Serde(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io(e.to_string()))?;
        }
        std::fs::write(path, serialized).map_err(|e| RegistryError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_defaults_cover_every_route_named_in_the_registry_contract() {
        let defaults = compiled_defaults();
        for id in [
            "chat",
            "web_search",
            "file_generator",
            "file_modifier",
            "design",
            "pages_ux",
            "pages_dev",
            "pages_copy",
            "dev",
            "qa",
        ] {
            assert!(defaults.contains_key(id), "missing agent_id '{id}'");
        }
    }

    #[test]
    fn update_then_reset_round_trips_through_a_temp_override_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let registry = AgentRegistry::load(Some(path.clone()));

        registry
            .update(
                "chat",
                AgentPatch {
                    system_prompt: Some("Seja breve.".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(registry.get_prompt("chat").unwrap(), "Seja breve.");
        assert!(path.exists());

        let reloaded = AgentRegistry::load(Some(path));
        assert_eq!(reloaded.get_prompt("chat").unwrap(), "Seja breve.");

        registry.reset("chat").unwrap();
        assert_ne!(registry.get_prompt("chat").unwrap(), "Seja breve.");
    }

    #[test]
    fn unknown_agent_id_is_an_error_not_a_default() {
        let registry = AgentRegistry::load(None);
        assert!(matches!(
            registry.get_prompt("does_not_exist"),
            Err(RegistryError::UnknownAgent(_))
        ));
    }
}
