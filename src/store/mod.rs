//! Persistence repositories.
//!
//! The narrow contract the pipeline is allowed to use: get-by-id, create,
//! partial update, delete, and list-by-company with filters and pagination.
//! The pipeline never issues raw queries; everything goes through these
//! small structs over the shared pool.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    Analysis, Category, Company, ConfidenceLevel, Document, DocumentStatus, Evidence, Initiative,
    Insight,
};

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: {}", raw))
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

// ============ Companies ============

#[derive(Clone)]
pub struct CompanyRepo {
    pool: SqlitePool,
}

impl CompanyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, ticker: Option<&str>) -> Result<Company> {
        let company = Company {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            ticker: ticker.map(str::to_string),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO companies (id, name, ticker, created_at) VALUES (?, ?, ?, ?)")
            .bind(&company.id)
            .bind(&company.name)
            .bind(&company.ticker)
            .bind(company.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(company)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT id, name, ticker, created_at FROM companies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(company_from_row).transpose()
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Company>> {
        let row = sqlx::query("SELECT id, name, ticker, created_at FROM companies WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(company_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Company>> {
        let rows =
            sqlx::query("SELECT id, name, ticker, created_at FROM companies ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(company_from_row).collect()
    }
}

fn company_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Company> {
    Ok(Company {
        id: row.get("id"),
        name: row.get("name"),
        ticker: row.get("ticker"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

// ============ Documents ============

#[derive(Clone)]
pub struct DocumentRepo {
    pool: SqlitePool,
}

impl DocumentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, company_id, filename, title, document_type, document_date,
                 file_size, storage_path, content_hash, status, error_message,
                 chunk_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.company_id)
        .bind(&document.filename)
        .bind(&document.title)
        .bind(&document.document_type)
        .bind(document.document_date.map(|d| d.to_rfc3339()))
        .bind(document.file_size)
        .bind(&document.storage_path)
        .bind(&document.content_hash)
        .bind(document.status.as_str())
        .bind(&document.error_message)
        .bind(document.chunk_count)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(document_from_row).transpose()
    }

    /// Content-hash duplicate lookup, scoped to one company.
    pub async fn get_by_hash(&self, company_id: &str, content_hash: &str) -> Result<Option<Document>> {
        let row =
            sqlx::query("SELECT * FROM documents WHERE company_id = ? AND content_hash = ?")
                .bind(company_id)
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;
        row.map(document_from_row).transpose()
    }

    pub async fn list_by_company(
        &self,
        company_id: &str,
        status: Option<DocumentStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Document>, i64)> {
        let status_str = status.map(|s| s.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE company_id = ? AND (? IS NULL OR status = ?)",
        )
        .bind(company_id)
        .bind(&status_str)
        .bind(&status_str)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE company_id = ? AND (? IS NULL OR status = ?)
            ORDER BY created_at
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(company_id)
        .bind(&status_str)
        .bind(&status_str)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let documents: Result<Vec<Document>> = rows.into_iter().map(document_from_row).collect();
        Ok((documents?, total))
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
        chunk_count: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, error_message = ?,
                chunk_count = COALESCE(?, chunk_count),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(chunk_count)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.get("id"),
        company_id: row.get("company_id"),
        filename: row.get("filename"),
        title: row.get("title"),
        document_type: row.get("document_type"),
        document_date: parse_ts_opt(row.get("document_date"))?,
        file_size: row.get("file_size"),
        storage_path: row.get("storage_path"),
        content_hash: row.get("content_hash"),
        status: DocumentStatus::parse(&row.get::<String, _>("status")),
        error_message: row.get("error_message"),
        chunk_count: row.get("chunk_count"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

// ============ Analyses ============

#[derive(Clone)]
pub struct AnalysisRepo {
    pool: SqlitePool,
}

impl AnalysisRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        company_id: &str,
        document_ids: Option<&[String]>,
    ) -> Result<Analysis> {
        let analysis = Analysis {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            document_ids: document_ids.map(|ids| ids.to_vec()),
            status: "pending".to_string(),
            progress: 0,
            error_message: None,
            insight_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        };
        sqlx::query(
            r#"
            INSERT INTO analyses (id, company_id, document_ids_json, status, progress, insight_count, created_at)
            VALUES (?, ?, ?, 'pending', 0, 0, ?)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.company_id)
        .bind(
            analysis
                .document_ids
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(analysis.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(analysis)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Analysis>> {
        let row = sqlx::query("SELECT * FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(analysis_from_row).transpose()
    }

    pub async fn update_progress(&self, id: &str, progress: i64, status: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE analyses SET progress = ?, status = COALESCE(?, status) WHERE id = ?",
        )
        .bind(progress.clamp(0, 100))
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: &str, insight_count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analyses
            SET status = 'completed', progress = 100, insight_count = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(insight_count)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE analyses SET status = 'failed', error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn analysis_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Analysis> {
    let document_ids: Option<Vec<String>> = row
        .get::<Option<String>, _>("document_ids_json")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;
    Ok(Analysis {
        id: row.get("id"),
        company_id: row.get("company_id"),
        document_ids,
        status: row.get("status"),
        progress: row.get("progress"),
        error_message: row.get("error_message"),
        insight_count: row.get("insight_count"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        completed_at: parse_ts_opt(row.get("completed_at"))?,
    })
}

// ============ Initiatives ============

#[derive(Clone)]
pub struct InitiativeRepo {
    pool: SqlitePool,
}

impl InitiativeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, initiative: &Initiative) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO initiatives
                (id, company_id, name, description, category, first_mentioned_at,
                 last_mentioned_at, first_document_id, mention_count, document_count,
                 avg_confidence, is_active, is_completed, keywords_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&initiative.id)
        .bind(&initiative.company_id)
        .bind(&initiative.name)
        .bind(&initiative.description)
        .bind(initiative.category.as_str())
        .bind(initiative.first_mentioned_at.to_rfc3339())
        .bind(initiative.last_mentioned_at.to_rfc3339())
        .bind(&initiative.first_document_id)
        .bind(initiative.mention_count)
        .bind(initiative.document_count)
        .bind(initiative.avg_confidence)
        .bind(initiative.is_active)
        .bind(initiative.is_completed)
        .bind(serde_json::to_string(&initiative.keywords)?)
        .bind(initiative.created_at.to_rfc3339())
        .bind(initiative.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Initiative>> {
        let row = sqlx::query("SELECT * FROM initiatives WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(initiative_from_row).transpose()
    }

    pub async fn list_by_company(&self, company_id: &str) -> Result<Vec<Initiative>> {
        let rows = sqlx::query(
            "SELECT * FROM initiatives WHERE company_id = ? ORDER BY first_mentioned_at",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(initiative_from_row).collect()
    }

    /// Record one more mention: bumps `mention_count`, rolls the running
    /// average confidence, and advances `last_mentioned_at`.
    pub async fn record_mention(
        &self,
        id: &str,
        mentioned_at: DateTime<Utc>,
        confidence: f64,
        in_new_document: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE initiatives
            SET mention_count = mention_count + 1,
                document_count = document_count + ?,
                avg_confidence = (avg_confidence * mention_count + ?) / (mention_count + 1),
                last_mentioned_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(if in_new_document { 1 } else { 0 })
        .bind(confidence)
        .bind(mentioned_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Company-level purge: removes all initiatives, insights, and evidence
    /// for a company. The only path that ever deletes an initiative.
    pub async fn purge_company(&self, company_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM evidence WHERE insight_id IN (SELECT id FROM insights WHERE company_id = ?)",
        )
        .bind(company_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM insights WHERE company_id = ?")
            .bind(company_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM initiatives WHERE company_id = ?")
            .bind(company_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn initiative_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Initiative> {
    let keywords: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("keywords_json")).unwrap_or_default();
    Ok(Initiative {
        id: row.get("id"),
        company_id: row.get("company_id"),
        name: row.get("name"),
        description: row.get("description"),
        category: Category::normalize(&row.get::<String, _>("category")),
        first_mentioned_at: parse_ts(&row.get::<String, _>("first_mentioned_at"))?,
        last_mentioned_at: parse_ts(&row.get::<String, _>("last_mentioned_at"))?,
        first_document_id: row.get("first_document_id"),
        mention_count: row.get("mention_count"),
        document_count: row.get("document_count"),
        avg_confidence: row.get("avg_confidence"),
        is_active: row.get("is_active"),
        is_completed: row.get("is_completed"),
        keywords,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

// ============ Insights ============

#[derive(Clone)]
pub struct InsightRepo {
    pool: SqlitePool,
}

impl InsightRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, insight: &Insight) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO insights
                (id, company_id, analysis_id, initiative_id, title, description,
                 category, confidence_score, confidence_level,
                 is_new, is_reiterated, is_modified, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&insight.id)
        .bind(&insight.company_id)
        .bind(&insight.analysis_id)
        .bind(&insight.initiative_id)
        .bind(&insight.title)
        .bind(&insight.description)
        .bind(insight.category.as_str())
        .bind(insight.confidence_score)
        .bind(insight.confidence_level.as_str())
        .bind(insight.is_new)
        .bind(insight.is_reiterated)
        .bind(insight.is_modified)
        .bind(insight.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_by_company(
        &self,
        company_id: &str,
        category: Option<Category>,
        confidence_min: Option<f64>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Insight>, i64)> {
        let category_str = category.map(|c| c.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM insights
            WHERE company_id = ?
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR confidence_score >= ?)
            "#,
        )
        .bind(company_id)
        .bind(&category_str)
        .bind(&category_str)
        .bind(confidence_min)
        .bind(confidence_min)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM insights
            WHERE company_id = ?
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR confidence_score >= ?)
            ORDER BY created_at
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(company_id)
        .bind(&category_str)
        .bind(&category_str)
        .bind(confidence_min)
        .bind(confidence_min)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let insights: Result<Vec<Insight>> = rows.into_iter().map(insight_from_row).collect();
        Ok((insights?, total))
    }

    pub async fn list_by_initiative(&self, initiative_id: &str) -> Result<Vec<Insight>> {
        let rows =
            sqlx::query("SELECT * FROM insights WHERE initiative_id = ? ORDER BY created_at")
                .bind(initiative_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(insight_from_row).collect()
    }
}

fn insight_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Insight> {
    let confidence_score: f64 = row.get("confidence_score");
    Ok(Insight {
        id: row.get("id"),
        company_id: row.get("company_id"),
        analysis_id: row.get("analysis_id"),
        initiative_id: row.get("initiative_id"),
        title: row.get("title"),
        description: row.get("description"),
        category: Category::normalize(&row.get::<String, _>("category")),
        confidence_score,
        confidence_level: ConfidenceLevel::from_score(confidence_score),
        is_new: row.get("is_new"),
        is_reiterated: row.get("is_reiterated"),
        is_modified: row.get("is_modified"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

// ============ Evidence ============

#[derive(Clone)]
pub struct EvidenceRepo {
    pool: SqlitePool,
}

impl EvidenceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, evidence: &Evidence) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO evidence
                (id, insight_id, document_id, chunk_id, quote, page_number,
                 section, relevance_score, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&evidence.id)
        .bind(&evidence.insight_id)
        .bind(&evidence.document_id)
        .bind(&evidence.chunk_id)
        .bind(&evidence.quote)
        .bind(evidence.page_number.map(|p| p as i64))
        .bind(&evidence.section)
        .bind(evidence.relevance_score)
        .bind(evidence.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_by_insight(&self, insight_id: &str) -> Result<Vec<Evidence>> {
        let rows = sqlx::query("SELECT * FROM evidence WHERE insight_id = ? ORDER BY created_at")
            .bind(insight_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Evidence {
                    id: row.get("id"),
                    insight_id: row.get("insight_id"),
                    document_id: row.get("document_id"),
                    chunk_id: row.get("chunk_id"),
                    quote: row.get("quote"),
                    page_number: row.get::<Option<i64>, _>("page_number").map(|p| p as u32),
                    section: row.get("section"),
                    relevance_score: row.get("relevance_score"),
                    created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}
