//! File processing handler
//!
//! Fetches the blob, extracts text, chunks it into resources, records the
//! `content_upload` moment, and marks the file completed. Extraction itself
//! is an external collaborator behind the `TextExtractor` seam; the default
//! treats the blob as UTF-8 text.

use crate::blob::BlobStore;
use crate::handlers::TaskHandler;
use async_trait::async_trait;
use rem_core::{
    normalise_key, short_hash, EntityIdType, FileEntity, Moment, MomentId, MomentType,
    ProcessingStatus, RemError, Resource, SystemFields, Task,
};
use rem_queue::TASK_FILE_PROCESSING;
use rem_store::{record_from, record_into, rows, EntityStore, WriteOptions};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Target characters per resource chunk.
const CHUNK_CHARS: usize = 1200;

/// Text extraction seam. Parsing PDFs, audio, and the rest lives outside
/// the core.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, file_name: &str, bytes: &[u8]) -> Result<String, RemError>;
}

/// UTF-8 passthrough extractor.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, _file_name: &str, bytes: &[u8]) -> Result<String, RemError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Split text into chunks of roughly `CHUNK_CHARS`, preferring paragraph
/// boundaries and never returning empty chunks.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if !current.is_empty() && current.chars().count() + paragraph.chars().count() > chunk_chars
        {
            chunks.push(std::mem::take(&mut current));
        }
        // Oversized paragraphs split hard on the char budget.
        if paragraph.chars().count() > chunk_chars {
            let mut buf = String::new();
            for c in paragraph.chars() {
                buf.push(c);
                if buf.chars().count() >= chunk_chars {
                    chunks.push(std::mem::take(&mut buf));
                }
            }
            if !buf.is_empty() {
                current = buf;
            }
            continue;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub struct FileHandler {
    store: Arc<EntityStore>,
    blob: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
}

impl FileHandler {
    pub fn new(
        store: Arc<EntityStore>,
        blob: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            store,
            blob,
            extractor,
        }
    }
}

#[async_trait]
impl TaskHandler for FileHandler {
    fn task_type(&self) -> &str {
        TASK_FILE_PROCESSING
    }

    async fn handle(&self, task: &Task) -> Result<JsonValue, RemError> {
        let file_id = rows::parse_uuid(&task.payload, "task_queue", "file_id")
            .map_err(RemError::Store)?;
        let category = task
            .payload
            .get("category")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let record = self.store.get_required("files", file_id).await?;
        let mut file: FileEntity = record_into("files", record)?;

        file.processing_status = ProcessingStatus::Processing;
        file = record_into(
            "files",
            self.store
                .upsert("files", record_from("files", &file)?, WriteOptions::default())
                .await?,
        )?;

        let bytes = self.blob.get(&file.uri).await?;
        let text = self.extractor.extract(&file.name, &bytes)?;
        let chunks = chunk_text(&text, CHUNK_CHARS);

        let mut resource_keys = Vec::with_capacity(chunks.len());
        for (ordinal, content) in chunks.iter().enumerate() {
            let name = format!("{}-chunk-{}", file.name, ordinal);
            let id = rem_core::ResourceId::deterministic(&name, file.sys.user_id);
            let mut sys = SystemFields::new(id.as_uuid());
            sys.tenant_id = file.sys.tenant_id.clone();
            sys.user_id = file.sys.user_id;
            let resource = Resource {
                sys,
                name: name.clone(),
                content: content.clone(),
                ordinal: ordinal as i32,
                category: category.clone(),
                file_id: Some(rem_core::FileId::new(file_id)),
            };
            self.store
                .upsert(
                    "resources",
                    record_from("resources", &resource)?,
                    WriteOptions::default(),
                )
                .await?;
            resource_keys.push(normalise_key(&name));
        }

        // The upload moment anchors the file in the feed and carries the
        // resource keys for retrieval.
        let moment_name = format!(
            "upload-{}-{}",
            normalise_key(&file.name),
            short_hash(&file.uri, 6)
        );
        let moment_id = MomentId::deterministic(&moment_name, file.sys.user_id);
        let mut sys = SystemFields::new(moment_id.as_uuid());
        sys.tenant_id = file.sys.tenant_id.clone();
        sys.user_id = file.sys.user_id;
        sys.graph_edges = resource_keys
            .iter()
            .map(|k| rem_core::GraphEdge::new(k.clone(), "contains"))
            .collect();
        let summary = match resource_keys.first() {
            Some(first) => format!(
                "Resources: {} ({} chunks from {})",
                first,
                resource_keys.len(),
                file.name
            ),
            None => format!("Resources: none ({} was empty)", file.name),
        };
        let moment = Moment {
            sys,
            name: moment_name.clone(),
            moment_type: MomentType::ContentUpload,
            summary: Some(summary),
            starts_timestamp: Some(chrono::Utc::now()),
            previous_moment_keys: Vec::new(),
            session_id: None,
        };
        self.store
            .upsert("moments", record_from("moments", &moment)?, WriteOptions::default())
            .await?;

        file.parsed_content = Some(text);
        file.size_bytes = Some(bytes.len() as i64);
        file.processing_status = ProcessingStatus::Completed;
        self.store
            .upsert("files", record_from("files", &file)?, WriteOptions::default())
            .await?;

        tracing::info!(
            file_id = %file_id,
            chunks = resource_keys.len(),
            moment = %moment_name,
            "file processed"
        );
        Ok(json!({
            "resources": resource_keys.len(),
            "moment": moment_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(800), "b".repeat(800));
        let chunks = chunk_text(&text, 1200);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chars().all(|c| c == 'a'));
    }

    #[test]
    fn oversized_paragraphs_split_hard() {
        let text = "x".repeat(3000);
        let chunks = chunk_text(&text, 1200);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1200));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1200).is_empty());
        assert!(chunk_text("\n\n\n\n", 1200).is_empty());
    }

    #[test]
    fn small_paragraphs_merge_into_one_chunk() {
        let chunks = chunk_text("one\n\ntwo\n\nthree", 1200);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("one") && chunks[0].contains("three"));
    }
}
