//! Core entity structures
//!
//! Every persisted entity shares the same envelope of system fields
//! ([`SystemFields`]); table-specific payloads sit beside it. The generic
//! [`EntityRecord`] is what the registry-driven store moves around; the typed
//! structs are for the entities the core manipulates directly.

use crate::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

// ============================================================================
// SYSTEM-FIELD ENVELOPE
// ============================================================================

/// A directed edge in an entity's `graph_edges` list.
///
/// `target` is a normalised entity key (see [`normalise_key`]); edges may
/// link any entity to any other and cycles are legal in data. Weight affects
/// returned metadata only, never traversal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub target: String,
    pub relation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl GraphEdge {
    pub fn new(target: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            relation: relation.into(),
            weight: None,
            metadata: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Merge-dedup two edge lists on `(target, relation)`.
///
/// Incoming edges win on collision so weight/metadata updates stick; relative
/// order is existing-first then new arrivals, which keeps edge order stable
/// across repeated upserts.
pub fn merge_edges(existing: &[GraphEdge], incoming: &[GraphEdge]) -> Vec<GraphEdge> {
    let mut merged: Vec<GraphEdge> = existing.to_vec();
    for edge in incoming {
        match merged
            .iter_mut()
            .find(|e| e.target == edge.target && e.relation == edge.relation)
        {
            Some(slot) => *slot = edge.clone(),
            None => merged.push(edge.clone()),
        }
    }
    merged
}

/// Shallow-union two JSON objects; incoming keys win.
///
/// Non-object inputs fall back to the incoming value, matching JSONB `||`.
pub fn shallow_merge_metadata(existing: &JsonValue, incoming: &JsonValue) -> JsonValue {
    match (existing, incoming) {
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            JsonValue::Object(out)
        }
        _ => incoming.clone(),
    }
}

/// System fields carried by every entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFields {
    pub id: Uuid,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub tenant_id: Option<String>,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    #[serde(default)]
    pub graph_edges: Vec<GraphEdge>,
    #[serde(default)]
    pub encryption_level: EncryptionLevel,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

impl SystemFields {
    /// Fresh envelope for a new row; timestamps are stamped by the store on
    /// write, these are placeholders for in-memory construction.
    pub fn new(id: Uuid) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            tenant_id: None,
            user_id: None,
            tags: Vec::new(),
            metadata: empty_object(),
            graph_edges: Vec::new(),
            encryption_level: EncryptionLevel::None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Generic entity row: envelope plus table-specific payload columns.
///
/// The entity store operates on this shape for any table named in the
/// registry; typed entities convert through serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub sys: SystemFields,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl EntityRecord {
    pub fn new(id: Uuid) -> Self {
        Self {
            sys: SystemFields::new(id),
            fields: Map::new(),
        }
    }

    /// Payload field as a string, if present and textual.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: JsonValue) {
        self.fields.insert(name.into(), value);
    }

    /// The row's display name, used for KV keys: `name` then `uri` then id.
    pub fn name_key(&self) -> String {
        self.str_field("name")
            .or_else(|| self.str_field("uri"))
            .map(str::to_string)
            .unwrap_or_else(|| self.sys.id.to_string())
    }
}

// ============================================================================
// REGISTRY CONTROL METADATA
// ============================================================================

/// Per-table control metadata, loaded from `schemas` rows with
/// `kind='table'`. The set of entity tables is open at install time; all
/// iteration over "all entity tables" goes through rows of this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table_name: String,
    pub has_kv_sync: bool,
    pub has_embeddings: bool,
    pub embedding_field: Option<String>,
    pub is_encrypted: bool,
    /// Columns the encryption service transforms on write.
    #[serde(default)]
    pub encrypted_fields: Vec<String>,
    /// SQL expression yielding the row's KV summary. Degrades to `name` for
    /// encrypted tables so ciphertext never reaches the KV index.
    pub kv_summary_expr: Option<String>,
}

impl TableSpec {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            has_kv_sync: false,
            has_embeddings: false,
            embedding_field: None,
            is_encrypted: false,
            encrypted_fields: Vec::new(),
            kv_summary_expr: None,
        }
    }
}

// ============================================================================
// TYPED ENTITIES
// ============================================================================

/// Ontology-registry row: models, agents, tools, and the self-describing
/// table registry itself. The control columns only matter on `kind='table'`
/// rows and default off everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRow {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub kind: SchemaKind,
    /// Prompt text for agents, description otherwise.
    pub content: Option<String>,
    pub json_schema: Option<JsonValue>,
    #[serde(default)]
    pub has_kv_sync: bool,
    #[serde(default)]
    pub has_embeddings: bool,
    pub embedding_field: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub encrypted_fields: Vec<String>,
    pub kv_summary_expr: Option<String>,
}

/// Owner entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    /// Profile text; encrypted under the tenant mode.
    pub content: Option<String>,
    /// Deterministically encrypted so equality search still works.
    pub email: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub plan: PlanTier,
}

/// Isolation root; owns the DEK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub encryption_mode: EncryptionMode,
    pub status: String,
}

/// Conversation container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub agent_name: Option<String>,
    pub mode: Option<String>,
    pub total_tokens: i64,
}

/// A single tool invocation recorded on an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id tying the `tool_call` row to its `tool_response`.
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

/// Individual turn part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub session_id: SessionId,
    pub message_type: MessageType,
    /// Plaintext or ciphertext depending on `sys.encryption_level`.
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Correlation id on tool_call/tool_response rows.
    pub tool_call_id: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: Option<i64>,
    pub model: Option<String>,
    pub agent_name: Option<String>,
}

/// Temporal chunk: session summaries, uploads, dreams, reminders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub moment_type: MomentType,
    /// Encrypted under the tenant mode.
    pub summary: Option<String>,
    pub starts_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub previous_moment_keys: Vec<String>,
    pub session_id: Option<SessionId>,
}

/// Ordered document chunk, owned by a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub content: String,
    pub ordinal: i32,
    pub category: Option<String>,
    pub file_id: Option<FileId>,
}

/// Wiki-style entity with link edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub uri: Option<String>,
    pub content: Option<String>,
    pub extracted_data: Option<JsonValue>,
}

/// Raw upload plus parsed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntity {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub uri: String,
    pub size_bytes: Option<i64>,
    pub parsed_content: Option<String>,
    pub processing_status: ProcessingStatus,
}

/// Remote tool registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub server_id: Option<ServerId>,
    pub description: Option<String>,
    pub input_schema: Option<JsonValue>,
    pub output_schema: Option<JsonValue>,
}

/// Remote tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDef {
    #[serde(flatten)]
    pub sys: SystemFields,
    pub name: String,
    pub endpoint: String,
}

// ============================================================================
// SUPPORTING STORES
// ============================================================================

/// A row of the change-triggered KV index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvEntry {
    pub tenant_id: Option<String>,
    pub entity_key: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub content_summary: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    #[serde(default)]
    pub graph_edges: Vec<GraphEdge>,
    pub updated_at: Timestamp,
}

/// A row of the trigger-fed embedding queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: i64,
    pub table_name: String,
    pub entity_id: Uuid,
    pub field_name: String,
    pub status: TaskStatus,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

/// Wrapped tenant DEK and its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantKeyRecord {
    pub tenant_id: String,
    pub wrapped_dek: Vec<u8>,
    pub kms_key_id: String,
    pub algorithm: String,
    pub mode: EncryptionMode,
    /// RSA public key (PEM) for sealed mode, when registered.
    pub public_key_pem: Option<String>,
    pub rotated_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// One row of the single-table background queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub tier: TaskTier,
    pub tenant_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub payload: JsonValue,
    pub status: TaskStatus,
    pub priority: i32,
    pub scheduled_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub claimed_by: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub result: Option<JsonValue>,
    pub created_at: Timestamp,
}

/// Usage counter for one (user, resource, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub resource_type: String,
    pub period_start: Timestamp,
    pub used: i64,
    pub granted_extra: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_edges_dedups_on_target_and_relation() {
        let existing = vec![
            GraphEdge::new("alpha", "mentions"),
            GraphEdge::new("beta", "mentions"),
        ];
        let incoming = vec![
            GraphEdge::new("alpha", "mentions").with_weight(0.9),
            GraphEdge::new("alpha", "derived_from"),
        ];
        let merged = merge_edges(&existing, &incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].weight, Some(0.9));
        assert_eq!(merged[2].relation, "derived_from");
    }

    #[test]
    fn metadata_merge_is_shallow_union() {
        let a = json!({"x": 1, "nested": {"keep": true}});
        let b = json!({"y": 2, "nested": {"replaced": true}});
        let merged = shallow_merge_metadata(&a, &b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
        // shallow: nested objects are replaced wholesale
        assert_eq!(merged["nested"], json!({"replaced": true}));
    }

    #[test]
    fn entity_record_name_key_falls_back_to_id() {
        let mut rec = EntityRecord::new(Uuid::nil());
        assert_eq!(rec.name_key(), Uuid::nil().to_string());
        rec.set_field("name", json!("My Note"));
        assert_eq!(rec.name_key(), "My Note");
    }

    #[test]
    fn entity_record_serde_flattens_envelope() {
        let mut rec = EntityRecord::new(Uuid::nil());
        rec.set_field("content", json!("hello"));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["content"], "hello");
        assert!(v.get("id").is_some());
        assert!(v.get("sys").is_none());
    }
}
