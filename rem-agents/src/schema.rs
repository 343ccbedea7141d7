//! Agent schema loading and caching
//!
//! Agents live in `schemas` rows with `kind='agent'`: `content` is the
//! system prompt, `json_schema` is a flat JSON Schema whose `properties` are
//! thinking aides (or output fields under `structured_output`), plus
//! `tools`, `model`, `temperature`, `limits`, and `chained_tool`.

use dashmap::DashMap;
use rem_core::AgentError;
use rem_llm::ChatLimits;
use rem_store::EntityStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Reference to a tool the agent may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToolRef {
    pub name: String,
    #[serde(default)]
    pub server: Option<String>,
    /// Per-tool context suffix surfaced under `## Tool Notes`.
    #[serde(default)]
    pub description: Option<String>,
}

/// A fully parsed agent definition.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSchema {
    pub name: String,
    /// System prompt.
    pub description: String,
    /// Thinking aides, or output fields under structured output.
    pub properties: Map<String, JsonValue>,
    pub structured_output: bool,
    pub tools: Vec<AgentToolRef>,
    pub model: String,
    pub temperature: Option<f64>,
    pub limits: ChatLimits,
    pub chained_tool: Option<String>,
}

impl AgentSchema {
    /// Parse an agent from its registry row parts.
    pub fn from_row(
        name: &str,
        content: Option<&str>,
        json_schema: Option<&JsonValue>,
    ) -> Result<Self, AgentError> {
        let schema = json_schema.cloned().unwrap_or_else(|| json!({}));
        let object = schema.as_object().ok_or_else(|| AgentError::MalformedSchema {
            name: name.to_string(),
            reason: "json_schema is not an object".to_string(),
        })?;

        let description = content
            .map(str::to_string)
            .or_else(|| {
                object
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        if description.is_empty() {
            return Err(AgentError::MalformedSchema {
                name: name.to_string(),
                reason: "agent has no system prompt".to_string(),
            });
        }

        let properties = object
            .get("properties")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let tools = object
            .get("tools")
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| AgentError::MalformedSchema {
                    name: name.to_string(),
                    reason: format!("tools list is malformed: {e}"),
                })
            })
            .transpose()?
            .unwrap_or_default();

        let limits = object
            .get("limits")
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| AgentError::MalformedSchema {
                    name: name.to_string(),
                    reason: format!("limits block is malformed: {e}"),
                })
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            description,
            properties,
            structured_output: object
                .get("structured_output")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            tools,
            model: object
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or("gpt-4o-mini")
                .to_string(),
            temperature: object.get("temperature").and_then(|v| v.as_f64()),
            limits,
            chained_tool: object
                .get("chained_tool")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    /// The output schema sent to the model: the properties block with the
    /// top-level description stripped so the system prompt is not duplicated
    /// in the response schema.
    pub fn output_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.properties.keys().collect::<Vec<_>>(),
            "additionalProperties": false,
        })
    }

    /// Enforce that a structured response matches the declared properties.
    pub fn validate_output(&self, output: &JsonValue) -> Result<(), AgentError> {
        let object = output.as_object().ok_or_else(|| AgentError::OutputMismatch {
            reason: "response is not a JSON object".to_string(),
        })?;
        for key in self.properties.keys() {
            if !object.contains_key(key) {
                return Err(AgentError::OutputMismatch {
                    reason: format!("missing declared field '{key}'"),
                });
            }
        }
        if let Some(extra) = object.keys().find(|k| !self.properties.contains_key(*k)) {
            return Err(AgentError::OutputMismatch {
                reason: format!("undeclared field '{extra}'"),
            });
        }
        Ok(())
    }
}

struct CachedAgent {
    agent: Arc<AgentSchema>,
    loaded_at: Instant,
}

/// TTL cache keyed by `(name, user_id)`; user-scoped agent rows shadow
/// global ones.
pub struct AgentCache {
    store: Arc<EntityStore>,
    entries: DashMap<(String, Option<Uuid>), CachedAgent>,
}

impl AgentCache {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    pub async fn load(
        &self,
        name: &str,
        user_id: Option<Uuid>,
    ) -> Result<Arc<AgentSchema>, AgentError> {
        let key = (name.to_string(), user_id);
        if let Some(cached) = self.entries.get(&key) {
            if cached.loaded_at.elapsed() < CACHE_TTL {
                return Ok(Arc::clone(&cached.agent));
            }
        }

        let agent = Arc::new(self.fetch(name, user_id).await?);
        self.entries.insert(
            key,
            CachedAgent {
                agent: Arc::clone(&agent),
                loaded_at: Instant::now(),
            },
        );
        Ok(agent)
    }

    /// Drop one agent's cache entries after a registry write.
    pub fn invalidate(&self, name: &str) {
        self.entries.retain(|(n, _), _| n != name);
    }

    async fn fetch(&self, name: &str, user_id: Option<Uuid>) -> Result<AgentSchema, AgentError> {
        let mut filters = Map::new();
        filters.insert("name".into(), json!(name));
        filters.insert("kind".into(), json!("agent"));
        if let Some(user) = user_id {
            filters.insert("user_id".into(), json!(user));
        }
        let mut records = self.store.find("schemas", &filters, 1).await?;

        // Fall back to the tenant-global agent when no user-scoped row
        // exists.
        if records.is_empty() && user_id.is_some() {
            filters.remove("user_id");
            records = self.store.find("schemas", &filters, 1).await?;
        }
        let record = records.into_iter().next().ok_or_else(|| AgentError::NotFound {
            name: name.to_string(),
        })?;

        AgentSchema::from_row(
            name,
            record.str_field("content"),
            record.fields.get("json_schema"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> JsonValue {
        json!({
            "structured_output": true,
            "model": "gpt-4o",
            "temperature": 0.3,
            "properties": {
                "headline": {"type": "string"},
                "body": {"type": "string"},
            },
            "tools": [{"name": "search", "description": "query the memory store"}],
            "chained_tool": "publish",
            "limits": {"max_tokens": 2048, "timeout_secs": 60},
        })
    }

    #[test]
    fn parses_a_full_agent_row() {
        let agent =
            AgentSchema::from_row("daily-news", Some("You write the news."), Some(&sample_schema()))
                .unwrap();
        assert!(agent.structured_output);
        assert_eq!(agent.model, "gpt-4o");
        assert_eq!(agent.tools.len(), 1);
        assert_eq!(agent.chained_tool.as_deref(), Some("publish"));
        assert_eq!(agent.limits.max_tokens, 2048);
    }

    #[test]
    fn missing_prompt_is_malformed() {
        let err = AgentSchema::from_row("ghost", None, Some(&json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::MalformedSchema { .. }));
    }

    #[test]
    fn output_schema_strips_the_description() {
        let agent =
            AgentSchema::from_row("a", Some("prompt"), Some(&sample_schema())).unwrap();
        let schema = agent.output_schema();
        assert!(schema.get("description").is_none());
        assert!(schema["properties"].get("headline").is_some());
    }

    #[test]
    fn validate_output_requires_exact_fields() {
        let agent =
            AgentSchema::from_row("a", Some("prompt"), Some(&sample_schema())).unwrap();
        assert!(agent
            .validate_output(&json!({"headline": "x", "body": "y"}))
            .is_ok());
        assert!(agent.validate_output(&json!({"headline": "x"})).is_err());
        assert!(agent
            .validate_output(&json!({"headline": "x", "body": "y", "extra": 1}))
            .is_err());
        assert!(agent.validate_output(&json!("not an object")).is_err());
    }
}
