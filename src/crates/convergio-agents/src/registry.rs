//! Agent registry: the dynamic pool of specialist agents
//!
//! The registry owns every [`Agent`] for its lifetime. Lookup is hashed on
//! the lowercase name and on the numeric id; spawning is idempotent per
//! name, so two delegations to "Baccio" and "baccio" resolve to the same
//! agent. The chief (id 1) is created at construction and is never
//! despawned.
//!
//! Agent personas can be loaded from Markdown files with a YAML front
//! matter block; the file body becomes the agent's system prompt. Files
//! following the `COMMON*` / `*Coordinator*` naming convention are skipped
//! (they hold shared boilerplate, not personas).

use crate::agent::{Agent, AgentRole, WorkState};
use crate::error::{AgentsError, Result};
use convergio_core::{AgentId, CHIEF};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Longest name accepted for spawn
const MAX_AGENT_NAME: usize = 256;

/// A known persona: role, routing keywords and the system prompt
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub role: AgentRole,
    pub keywords: Vec<String>,
    pub system_prompt: String,
}

/// YAML front matter of a persona file
#[derive(Debug, Deserialize)]
struct DefinitionHeader {
    name: String,
    role: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Built-in personas available without any definition files
fn builtin_definitions() -> Vec<AgentDefinition> {
    let defs: &[(&str, AgentRole, &[&str], &str)] = &[
        (
            "baccio",
            AgentRole::Coder,
            &["architecture", "technical", "design", "implement"],
            "You are Baccio, a pragmatic software architect. You reason about \
             structure, trade-offs and long-term maintainability before writing code.",
        ),
        (
            "luca",
            AgentRole::Critic,
            &["security", "audit", "risk", "vulnerability"],
            "You are Luca, a security specialist. You look for what can go wrong: \
             attack surfaces, unsafe defaults, missing validation.",
        ),
        (
            "amy",
            AgentRole::Analyst,
            &["analyze", "analysis", "data", "metrics", "finance"],
            "You are Amy, an analyst. You break problems into measurable parts and \
             answer with evidence.",
        ),
        (
            "sofia",
            AgentRole::Writer,
            &["write", "document", "draft", "marketing"],
            "You are Sofia, a writer. You turn rough material into clear, \
             well-structured prose.",
        ),
        (
            "marco",
            AgentRole::Planner,
            &["plan", "roadmap", "schedule", "milestones"],
            "You are Marco, a planner. You decompose goals into ordered, \
             achievable steps with explicit dependencies.",
        ),
        (
            "enzo",
            AgentRole::Executor,
            &["execute", "run", "deploy", "operate"],
            "You are Enzo, an executor. You carry tasks out precisely and report \
             exactly what happened.",
        ),
        (
            "mira",
            AgentRole::Memory,
            &["remember", "recall", "history", "context"],
            "You are Mira, the memory keeper. You retrieve and summarize what the \
             team already knows.",
        ),
    ];

    defs.iter()
        .map(|(name, role, keywords, prompt)| AgentDefinition {
            name: (*name).to_string(),
            role: *role,
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            system_prompt: (*prompt).to_string(),
        })
        .collect()
}

#[derive(Debug, Default)]
struct Pool {
    agents: Vec<Agent>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<AgentId, usize>,
    definitions: HashMap<String, AgentDefinition>,
    next_id: u64,
}

/// Thread-safe agent pool
///
/// One mutex guards the pool and both hash indexes; methods return clones
/// of agent records so no borrow outlives the lock.
#[derive(Debug)]
pub struct AgentRegistry {
    pool: Mutex<Pool>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new("You are the chief orchestrator.")
    }
}

impl AgentRegistry {
    /// Create the registry with the chief agent already spawned as id 1
    pub fn new(chief_prompt: impl Into<String>) -> Self {
        let mut pool = Pool {
            next_id: CHIEF.as_u64(),
            ..Default::default()
        };
        for def in builtin_definitions() {
            pool.definitions.insert(def.name.clone(), def);
        }

        let registry = Self {
            pool: Mutex::new(pool),
        };
        let chief = registry.spawn(AgentRole::Orchestrator, "ali", None);
        debug_assert_eq!(chief, CHIEF);
        {
            let mut pool = registry.pool.lock();
            let idx = pool.by_id[&CHIEF];
            pool.agents[idx].system_prompt = chief_prompt.into();
        }
        registry
    }

    /// Spawn an agent, or return the existing one with the same name
    ///
    /// Names are case-insensitive; when the name matches a known definition
    /// the definition's role and prompt win over the requested role.
    pub fn spawn(&self, role: AgentRole, name: &str, context: Option<String>) -> AgentId {
        let canonical = name.trim().to_lowercase();

        let mut pool = self.pool.lock();
        if let Some(&idx) = pool.by_name.get(&canonical) {
            return pool.agents[idx].id;
        }

        let (role, prompt) = match pool.definitions.get(&canonical) {
            Some(def) => (def.role, def.system_prompt.clone()),
            None => (role, default_prompt(&canonical, role)),
        };

        let id = AgentId(pool.next_id);
        pool.next_id += 1;

        // Mirror the doubling growth of the pool explicitly; Vec would do it
        // anyway but capacity checks keep reallocation out of the indexes.
        if pool.agents.len() == pool.agents.capacity() {
            let grow = pool.agents.capacity().max(4);
            pool.agents.reserve(grow);
        }

        let idx = pool.agents.len();
        pool.agents
            .push(Agent::new(id, canonical.clone(), role, prompt, context));
        pool.by_name.insert(canonical.clone(), idx);
        pool.by_id.insert(id, idx);

        info!(category = "agent", agent = %canonical, role = %role, id = %id, "agent spawned");
        id
    }

    /// Find an active agent by id
    pub fn find_by_id(&self, id: AgentId) -> Option<Agent> {
        let pool = self.pool.lock();
        pool.by_id
            .get(&id)
            .map(|&idx| pool.agents[idx].clone())
            .filter(|a| a.is_active)
    }

    /// Find an active agent by (case-insensitive) name
    pub fn find_by_name(&self, name: &str) -> Option<Agent> {
        let canonical = name.trim().to_lowercase();
        let pool = self.pool.lock();
        pool.by_name
            .get(&canonical)
            .map(|&idx| pool.agents[idx].clone())
            .filter(|a| a.is_active)
    }

    /// First active agent with the given role
    pub fn find_by_role(&self, role: AgentRole) -> Option<Agent> {
        let pool = self.pool.lock();
        pool.agents
            .iter()
            .find(|a| a.is_active && a.role == role)
            .cloned()
    }

    /// Deactivate an agent by name; the chief cannot be despawned
    pub fn despawn(&self, name: &str) -> Result<()> {
        let canonical = name.trim().to_lowercase();
        let mut pool = self.pool.lock();
        let idx = *pool
            .by_name
            .get(&canonical)
            .ok_or_else(|| AgentsError::Registry(format!("agent not found: {canonical}")))?;
        if pool.agents[idx].id == CHIEF {
            return Err(AgentsError::Registry("the chief cannot be despawned".into()));
        }
        pool.agents[idx].is_active = false;
        info!(category = "agent", agent = %canonical, "agent despawned");
        Ok(())
    }

    /// Deactivate the first active agent with a role; the chief is exempt
    pub fn despawn_by_role(&self, role: AgentRole) -> Result<()> {
        let name = self
            .find_by_role(role)
            .filter(|a| a.id != CHIEF)
            .map(|a| a.name)
            .ok_or_else(|| AgentsError::Registry(format!("no active agent with role {role}")))?;
        self.despawn(&name)
    }

    /// All active agents, in spawn order
    pub fn active_agents(&self) -> Vec<Agent> {
        let pool = self.pool.lock();
        pool.agents.iter().filter(|a| a.is_active).cloned().collect()
    }

    /// Count of active agents
    pub fn active_count(&self) -> usize {
        self.pool.lock().agents.iter().filter(|a| a.is_active).count()
    }

    /// Update an agent's work state
    pub fn set_work_state(&self, id: AgentId, state: WorkState) {
        let mut pool = self.pool.lock();
        if let Some(&idx) = pool.by_id.get(&id) {
            pool.agents[idx].work_state = state;
        }
    }

    /// Accumulate token usage onto an agent
    pub fn add_tokens(&self, id: AgentId, input: u64, output: u64) {
        let mut pool = self.pool.lock();
        if let Some(&idx) = pool.by_id.get(&id) {
            pool.agents[idx].input_tokens += input;
            pool.agents[idx].output_tokens += output;
        }
    }

    /// Insert or replace a persona definition
    pub fn add_definition(&self, def: AgentDefinition) {
        let mut pool = self.pool.lock();
        pool.definitions.insert(def.name.trim().to_lowercase(), def);
    }

    /// Parse one persona document (YAML front matter + Markdown body)
    pub fn parse_definition(file: &str, content: &str) -> Result<AgentDefinition> {
        let rest = content.strip_prefix("---").ok_or_else(|| AgentsError::Definition {
            file: file.to_string(),
            message: "missing front matter".into(),
        })?;
        let (header, body) = rest.split_once("\n---").ok_or_else(|| AgentsError::Definition {
            file: file.to_string(),
            message: "unterminated front matter".into(),
        })?;

        let header: DefinitionHeader = serde_yaml::from_str(header)?;
        let name = header.name.trim().to_lowercase();
        if name.is_empty() || name.len() > MAX_AGENT_NAME {
            return Err(AgentsError::Definition {
                file: file.to_string(),
                message: format!("invalid agent name {:?}", header.name),
            });
        }

        Ok(AgentDefinition {
            name,
            role: header
                .role
                .as_deref()
                .map(AgentRole::parse_or_executor)
                .unwrap_or(AgentRole::Executor),
            keywords: header
                .keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            system_prompt: body.trim().to_string(),
        })
    }

    /// Load every persona file from a directory
    ///
    /// Returns how many definitions were loaded. Shared boilerplate files
    /// (`COMMON*`, `*Coordinator*`) are skipped; unparsable files are logged
    /// and skipped rather than failing the whole load.
    pub fn load_definitions(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_lowercase();
            if stem.starts_with("common") || stem.contains("coordinator") {
                debug!(category = "agent", file = %path.display(), "skipping shared definition file");
                continue;
            }

            let content = std::fs::read_to_string(&path)?;
            match Self::parse_definition(&path.display().to_string(), &content) {
                Ok(def) => {
                    self.add_definition(def);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(category = "agent", file = %path.display(), error = %e, "skipping invalid definition");
                }
            }
        }
        info!(category = "agent", loaded, "agent definitions loaded");
        Ok(loaded)
    }

    /// Pick agents suited to a task description by keyword match
    ///
    /// Matching definitions are spawned if missing; the returned list is in
    /// first-match order with duplicates removed.
    pub fn select_for_task(&self, description: &str) -> Vec<AgentId> {
        let lower = description.to_lowercase();

        let candidates: Vec<AgentDefinition> = {
            let pool = self.pool.lock();
            let mut defs: Vec<&AgentDefinition> = pool.definitions.values().collect();
            defs.sort_by(|a, b| a.name.cmp(&b.name));
            defs.into_iter()
                .filter(|def| def.keywords.iter().any(|k| lower.contains(k.as_str())))
                .cloned()
                .collect()
        };

        let mut selected = Vec::new();
        for def in candidates {
            let id = self.spawn(def.role, &def.name, None);
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
        selected
    }
}

fn default_prompt(name: &str, role: AgentRole) -> String {
    format!(
        "You are {name}, a specialist agent in the {role} role. Answer within \
         your specialty and say so when a request falls outside it."
    )
}
