//! Document ingestion pipeline.
//!
//! Upload validates and stores raw bytes (rejecting exact re-uploads by
//! content hash before any chunking happens); processing drives
//! parse → chunk → index with status transitions on the document record.
//! A parse or index failure aborts that document, not the surrounding job
//! batch.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::error::PipelineError;
use crate::index::Indexer;
use crate::jobs::{Job, JobHandler, JobKind, JobQueue};
use crate::models::{Document, DocumentStatus};
use crate::parse::DocumentParser;
use crate::storage::{sanitize_filename, LocalStorage};
use crate::store::{CompanyRepo, DocumentRepo};

pub struct DocumentPipeline {
    config: Config,
    storage: LocalStorage,
    parser: DocumentParser,
    indexer: Arc<Indexer>,
    companies: CompanyRepo,
    documents: DocumentRepo,
}

impl DocumentPipeline {
    pub fn new(
        config: Config,
        storage: LocalStorage,
        parser: DocumentParser,
        indexer: Arc<Indexer>,
        companies: CompanyRepo,
        documents: DocumentRepo,
    ) -> Self {
        Self {
            config,
            storage,
            parser,
            indexer,
            companies,
            documents,
        }
    }

    /// Validate and store a new document; returns the pending record.
    pub async fn upload(
        &self,
        company_id: &str,
        filename: &str,
        content: &[u8],
        document_type: Option<&str>,
        title: Option<&str>,
    ) -> Result<Document> {
        self.companies
            .get(company_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Company", company_id))?;

        let max_bytes = self.config.storage.max_upload_size_mb * 1024 * 1024;
        if content.len() as u64 > max_bytes {
            bail!(
                "file exceeds the {} MB upload limit",
                self.config.storage.max_upload_size_mb
            );
        }

        if !self.parser.is_supported(filename) {
            return Err(PipelineError::UnsupportedFormat(filename.to_string()).into());
        }

        let safe_filename = sanitize_filename(filename);

        let mut hasher = Sha256::new();
        hasher.update(content);
        let content_hash = format!("{:x}", hasher.finalize());

        if self
            .documents
            .get_by_hash(company_id, &content_hash)
            .await?
            .is_some()
        {
            bail!("this document has already been uploaded for this company");
        }

        let storage_path = self.storage.save(content, &safe_filename, company_id)?;

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            filename: safe_filename.clone(),
            title: title.map(str::to_string).unwrap_or(safe_filename),
            document_type: document_type.map(str::to_string),
            document_date: None,
            file_size: content.len() as i64,
            storage_path,
            content_hash,
            status: DocumentStatus::Pending,
            error_message: None,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.documents.create(&document).await?;
        info!(document_id = %document.id, company_id, "document stored");
        Ok(document)
    }

    /// Parse, chunk, and index a stored document. `progress` receives
    /// coarse stage percentages.
    pub async fn process(
        &self,
        document_id: &str,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Document> {
        let document = self
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Document", document_id))?;

        self.documents
            .update_status(document_id, DocumentStatus::Processing, None, None)
            .await?;
        progress(10);

        let outcome = self.parse_chunk_index(&document, progress).await;

        match outcome {
            Ok(chunk_count) => {
                self.documents
                    .update_status(document_id, DocumentStatus::Completed, None, Some(chunk_count))
                    .await?;
                progress(100);
                info!(document_id, chunk_count, "document processed");
                self.documents
                    .get(document_id)
                    .await?
                    .context("document vanished during processing")
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(document_id, error = %message, "document processing failed");
                self.documents
                    .update_status(document_id, DocumentStatus::Failed, Some(&message), None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn parse_chunk_index(
        &self,
        document: &Document,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<i64> {
        let content = self.storage.read(&document.storage_path)?;

        let parsed = self.parser.parse(&content, &document.filename)?;
        progress(30);

        let chunks = chunk_document(
            &self.config.chunking,
            &parsed,
            &document.id,
            &document.company_id,
        );
        progress(60);

        let indexed = self
            .indexer
            .upsert(&chunks, &document.company_id, &document.id)
            .await?;
        progress(90);

        Ok(indexed as i64)
    }

    /// Delete a document: index entries, stored file, and record.
    pub async fn delete(&self, document_id: &str) -> Result<()> {
        let document = self
            .documents
            .get(document_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Document", document_id))?;

        self.indexer
            .delete_by_document(&document.id, &document.company_id)
            .await?;
        if !self.storage.delete(&document.storage_path)? {
            warn!(document_id, "stored file was already missing");
        }
        self.documents.delete(document_id).await?;
        info!(document_id, "document deleted");
        Ok(())
    }
}

/// Job handler driving [`DocumentPipeline::process`].
pub struct ProcessDocumentHandler {
    pipeline: Arc<DocumentPipeline>,
}

impl ProcessDocumentHandler {
    pub fn new(pipeline: Arc<DocumentPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl JobHandler for ProcessDocumentHandler {
    fn kind(&self) -> JobKind {
        JobKind::ProcessDocument
    }

    async fn execute(&self, job: &Job, queue: &JobQueue) -> Result<()> {
        let document_id = job.payload["document_id"]
            .as_str()
            .context("process_document job missing document_id")?;

        let queue = queue.clone();
        let job_id = job.id.clone();
        self.pipeline
            .process(document_id, &move |percent| {
                queue.update_progress(&job_id, percent)
            })
            .await?;
        Ok(())
    }
}
