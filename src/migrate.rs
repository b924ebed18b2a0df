use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent — safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            ticker TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            title TEXT NOT NULL,
            document_type TEXT,
            document_date TEXT,
            file_size INTEGER NOT NULL,
            storage_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (company_id) REFERENCES companies(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_company ON documents(company_id, content_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            document_ids_json TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            insight_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY (company_id) REFERENCES companies(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS initiatives (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            first_mentioned_at TEXT NOT NULL,
            last_mentioned_at TEXT NOT NULL,
            first_document_id TEXT NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 1,
            document_count INTEGER NOT NULL DEFAULT 1,
            avg_confidence REAL NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_completed INTEGER NOT NULL DEFAULT 0,
            keywords_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (company_id) REFERENCES companies(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_initiatives_company ON initiatives(company_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            analysis_id TEXT NOT NULL,
            initiative_id TEXT,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            confidence_score REAL NOT NULL DEFAULT 0,
            confidence_level TEXT NOT NULL DEFAULT 'medium',
            is_new INTEGER NOT NULL DEFAULT 1,
            is_reiterated INTEGER NOT NULL DEFAULT 0,
            is_modified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (company_id) REFERENCES companies(id),
            FOREIGN KEY (analysis_id) REFERENCES analyses(id),
            FOREIGN KEY (initiative_id) REFERENCES initiatives(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_company ON insights(company_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id TEXT PRIMARY KEY,
            insight_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_id TEXT,
            quote TEXT NOT NULL,
            page_number INTEGER,
            section TEXT,
            relevance_score REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (insight_id) REFERENCES insights(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-company index collections and their entries (chunk + embedding).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            company_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            start_char INTEGER,
            end_char INTEGER,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_scope ON index_entries(company_id, document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
