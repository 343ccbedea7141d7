//! Query AST for the REM dialect

use serde::{Deserialize, Serialize};

/// A parsed REM query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemQuery {
    /// `LOOKUP "key"` — KV hit joined to the full source row.
    Lookup { key: String },

    /// `SEARCH "text" FROM table [CATEGORY c] [LIMIT n] [MIN_SIMILARITY s]`
    Search {
        text: String,
        table: String,
        category: Option<String>,
        limit: Option<i32>,
        min_similarity: Option<f32>,
    },

    /// `FUZZY "text" [LIMIT n]` — trigram match over KV keys and summaries.
    Fuzzy { text: String, limit: Option<i32> },

    /// `TRAVERSE "key" [DEPTH n] [TYPE rel] [LOAD]` — breadth-first graph
    /// walk over `graph_edges`.
    Traverse {
        key: String,
        depth: Option<u32>,
        relation: Option<String>,
        load: bool,
    },

    /// Unknown prefix: raw read-only SQL.
    Sql { query: String },
}

impl RemQuery {
    /// Mode label surfaced in responses.
    pub fn mode(&self) -> &'static str {
        match self {
            RemQuery::Lookup { .. } => "lookup",
            RemQuery::Search { .. } => "search",
            RemQuery::Fuzzy { .. } => "fuzzy",
            RemQuery::Traverse { .. } => "traverse",
            RemQuery::Sql { .. } => "sql",
        }
    }
}

/// Optional tenant/user scoping applied to every mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryScope {
    pub tenant_id: Option<String>,
    pub user_id: Option<uuid::Uuid>,
}
