//! # Initiative Lens CLI (`ilens`)
//!
//! The `ilens` binary is the orchestrating surface for the pipeline: it
//! registers companies, uploads and indexes documents, runs analyses
//! through the in-process job queue, and reports timelines and trends.
//!
//! ## Usage
//!
//! ```bash
//! ilens --config ./config/ilens.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ilens init` | Create the SQLite database and run schema migrations |
//! | `ilens company add <name>` | Register a company |
//! | `ilens company list` | List registered companies |
//! | `ilens upload <company> <file>` | Store, parse, chunk, and index a document |
//! | `ilens documents <company>` | List a company's documents |
//! | `ilens delete-document <id>` | Delete a document and its index entries |
//! | `ilens analyze <company>` | Extract and track strategic initiatives |
//! | `ilens ask <company> "<question>"` | Answer a question with citations |
//! | `ilens timeline <company>` | Period-bucketed insight timeline |
//! | `ilens trends <company>` | Trend aggregation and most-discussed initiatives |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use initiative_lens::analysis::{AnalysisPipeline, RunAnalysisHandler};
use initiative_lens::ask::QuestionAnswerer;
use initiative_lens::config::{load_config, Config};
use initiative_lens::db;
use initiative_lens::dedup::Deduplicator;
use initiative_lens::embedding::create_embedder;
use initiative_lens::extract::InitiativeExtractor;
use initiative_lens::index::Indexer;
use initiative_lens::ingest::{DocumentPipeline, ProcessDocumentHandler};
use initiative_lens::jobs::{JobKind, JobQueue, JobStatus};
use initiative_lens::migrate;
use initiative_lens::models::Company;
use initiative_lens::parse::DocumentParser;
use initiative_lens::reasoning::create_reasoning_model;
use initiative_lens::rerank::Reranker;
use initiative_lens::retrieve::Retriever;
use initiative_lens::storage::LocalStorage;
use initiative_lens::store::{
    AnalysisRepo, CompanyRepo, DocumentRepo, EvidenceRepo, InitiativeRepo, InsightRepo,
};
use initiative_lens::temporal::{build_timeline, build_trends, PeriodGranularity};

/// Initiative Lens — extract and track strategic initiatives from
/// management disclosures.
#[derive(Parser)]
#[command(
    name = "ilens",
    about = "Initiative Lens — extract and track strategic initiatives from management disclosures",
    version,
    long_about = "Initiative Lens ingests corporate disclosure documents (PDF, DOCX, PPTX, \
    transcripts, plain text), chunks and indexes them per company, extracts strategic-initiative \
    claims with a reasoning model, deduplicates them across documents, and tracks each \
    initiative's lifecycle (new / reiterated / modified) over time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ilens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Manage companies.
    Company {
        #[command(subcommand)]
        action: CompanyAction,
    },

    /// Upload a disclosure document and index it.
    ///
    /// The file is content-hash checked against prior uploads for the same
    /// company, parsed with the format-appropriate parser, chunked, and
    /// indexed into the company's collection.
    Upload {
        /// Company name or ID.
        company: String,
        /// Path to the document file.
        file: PathBuf,
        /// Document type label (e.g. earnings_call, annual_report).
        #[arg(long)]
        document_type: Option<String>,
        /// Display title; defaults to the filename.
        #[arg(long)]
        title: Option<String>,
    },

    /// List a company's documents.
    Documents {
        /// Company name or ID.
        company: String,
    },

    /// Delete a document, its stored file, and its index entries.
    DeleteDocument {
        /// Document ID.
        id: String,
    },

    /// Run the analysis pipeline: retrieve → extract → deduplicate →
    /// persist initiatives and insights.
    Analyze {
        /// Company name or ID.
        company: String,
        /// Restrict to specific document IDs (comma-separated).
        #[arg(long, value_delimiter = ',')]
        documents: Option<Vec<String>>,
    },

    /// Ask a question about a company's disclosures.
    Ask {
        /// Company name or ID.
        company: String,
        /// The question.
        question: String,
        /// Maximum number of source chunks to use.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show the insight timeline bucketed by period.
    Timeline {
        /// Company name or ID.
        company: String,
        /// Period granularity: month, quarter, or year.
        #[arg(long, default_value = "quarter")]
        group_by: String,
    },

    /// Show trend aggregation: category distribution, new vs reiterated
    /// per quarter, and the most discussed initiatives.
    Trends {
        /// Company name or ID.
        company: String,
    },

    /// Show the mention history of one initiative.
    History {
        /// Initiative ID (see `ilens trends`).
        id: String,
    },

    /// Delete all tracked initiatives, insights, and evidence for a
    /// company. The only operation that ever deletes initiatives.
    Purge {
        /// Company name or ID.
        company: String,
        /// Required confirmation flag.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CompanyAction {
    /// Register a company.
    Add {
        name: String,
        /// Stock ticker symbol.
        #[arg(long)]
        ticker: Option<String>,
    },
    /// List registered companies.
    List,
}

/// Everything the commands need, wired once from config.
struct App {
    config: Config,
    queue: JobQueue,
    companies: CompanyRepo,
    documents: DocumentRepo,
    analyses: AnalysisRepo,
    initiatives: InitiativeRepo,
    insights: InsightRepo,
    document_pipeline: Arc<DocumentPipeline>,
    answerer: QuestionAnswerer,
}

impl App {
    async fn build(config: Config) -> Result<App> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;

        let embedder: Arc<dyn initiative_lens::embedding::Embedder> =
            Arc::from(create_embedder(&config.embedding)?);
        let reasoning: Arc<dyn initiative_lens::reasoning::ReasoningModel> =
            Arc::from(create_reasoning_model(&config.reasoning)?);

        let companies = CompanyRepo::new(pool.clone());
        let documents = DocumentRepo::new(pool.clone());
        let analyses = AnalysisRepo::new(pool.clone());
        let initiatives = InitiativeRepo::new(pool.clone());
        let insights = InsightRepo::new(pool.clone());
        let evidence = EvidenceRepo::new(pool.clone());

        let indexer = Arc::new(Indexer::new(
            pool.clone(),
            embedder.clone(),
            config.embedding.batch_size,
        ));
        let retriever = Arc::new(Retriever::new(
            indexer.clone(),
            embedder.clone(),
            Reranker::from_config(&config.rerank),
            config.retrieval.clone(),
        ));

        let document_pipeline = Arc::new(DocumentPipeline::new(
            config.clone(),
            LocalStorage::new(config.storage.upload_dir.clone()),
            DocumentParser::new(),
            indexer.clone(),
            companies.clone(),
            documents.clone(),
        ));

        let analysis_pipeline = Arc::new(AnalysisPipeline::new(
            config.analysis.clone(),
            retriever.clone(),
            InitiativeExtractor::new(reasoning.clone()),
            Deduplicator::new(reasoning.clone(), &config.dedup),
            companies.clone(),
            documents.clone(),
            analyses.clone(),
            initiatives.clone(),
            insights.clone(),
            evidence,
        ));

        let queue = JobQueue::new();
        queue.register_handler(Arc::new(ProcessDocumentHandler::new(
            document_pipeline.clone(),
        )));
        queue.register_handler(Arc::new(RunAnalysisHandler::new(analysis_pipeline)));

        let answerer = QuestionAnswerer::new(reasoning, retriever);

        Ok(App {
            config,
            queue,
            companies,
            documents,
            analyses,
            initiatives,
            insights,
            document_pipeline,
            answerer,
        })
    }

    /// Resolve a company argument by name first, then by ID.
    async fn resolve_company(&self, name_or_id: &str) -> Result<Company> {
        if let Some(company) = self.companies.get_by_name(name_or_id).await? {
            return Ok(company);
        }
        if let Some(company) = self.companies.get(name_or_id).await? {
            return Ok(company);
        }
        bail!("Company '{}' not found. Register it with: ilens company add", name_or_id)
    }

    /// Run one job to completion on the worker pool.
    async fn run_job(&self, kind: JobKind, payload: serde_json::Value) -> Result<()> {
        let workers = self.queue.start_workers(self.config.jobs.workers);
        let job = self.queue.enqueue(kind, payload);
        let done = self
            .queue
            .wait(&job.id)
            .await
            .context("job disappeared from the queue")?;
        for worker in workers {
            worker.abort();
        }
        match done.status {
            JobStatus::Completed => Ok(()),
            _ => bail!(
                "job failed: {}",
                done.error_message.unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let app = App::build(config).await?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Company { action } => match action {
            CompanyAction::Add { name, ticker } => {
                let company = app.companies.create(&name, ticker.as_deref()).await?;
                println!("Added company {} ({})", company.name, company.id);
            }
            CompanyAction::List => {
                let companies = app.companies.list().await?;
                if companies.is_empty() {
                    println!("No companies registered.");
                }
                for company in companies {
                    let ticker = company.ticker.as_deref().unwrap_or("-");
                    println!("{}  {}  {}", company.id, ticker, company.name);
                }
            }
        },
        Commands::Upload {
            company,
            file,
            document_type,
            title,
        } => {
            let company = app.resolve_company(&company).await?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .context("upload path has no filename")?;
            let content = std::fs::read(&file)
                .with_context(|| format!("Failed to read file: {}", file.display()))?;

            let document = app
                .document_pipeline
                .upload(
                    &company.id,
                    &filename,
                    &content,
                    document_type.as_deref(),
                    title.as_deref(),
                )
                .await?;

            app.run_job(
                JobKind::ProcessDocument,
                serde_json::json!({ "document_id": document.id }),
            )
            .await?;

            let processed = app
                .documents
                .get(&document.id)
                .await?
                .context("document vanished after processing")?;
            println!("upload {}", processed.filename);
            println!("  document: {}", processed.id);
            println!("  status: {}", processed.status.as_str());
            println!("  chunks indexed: {}", processed.chunk_count);
            println!("ok");
        }
        Commands::Documents { company } => {
            let company = app.resolve_company(&company).await?;
            let (documents, total) = app
                .documents
                .list_by_company(&company.id, None, 0, 100)
                .await?;
            println!("{} document(s) for {}", total, company.name);
            for document in documents {
                println!(
                    "{}  [{}]  {}  chunks={}",
                    document.id,
                    document.status.as_str(),
                    document.filename,
                    document.chunk_count
                );
            }
        }
        Commands::DeleteDocument { id } => {
            app.document_pipeline.delete(&id).await?;
            println!("Deleted document {}", id);
        }
        Commands::Analyze { company, documents } => {
            let company = app.resolve_company(&company).await?;
            let analysis = app
                .analyses
                .create(&company.id, documents.as_deref())
                .await?;

            app.run_job(
                JobKind::RunAnalysis,
                serde_json::json!({
                    "analysis_id": analysis.id,
                    "company_id": company.id,
                }),
            )
            .await?;

            let done = app
                .analyses
                .get(&analysis.id)
                .await?
                .context("analysis vanished after run")?;
            println!("analysis {}", done.id);
            println!("  status: {}", done.status);
            println!("  insights: {}", done.insight_count);
            println!("ok");
        }
        Commands::Ask {
            company,
            question,
            top_k,
        } => {
            let company = app.resolve_company(&company).await?;
            let answer = app
                .answerer
                .answer(&question, &company.id, &company.name, top_k)
                .await?;

            println!("{}", answer.answer);
            println!();
            println!("confidence: {:.2}", answer.confidence);
            for (i, citation) in answer.citations.iter().enumerate() {
                let location = match (&citation.section, citation.page_number) {
                    (Some(section), _) => section.clone(),
                    (None, Some(page)) => format!("page {}", page),
                    (None, None) => "unknown location".to_string(),
                };
                println!(
                    "[{}] \"{}\" — {} ({})",
                    i + 1,
                    citation.quote.replace('\n', " "),
                    citation.document_id.as_deref().unwrap_or("unattributed"),
                    location
                );
            }
            if !answer.related_topics.is_empty() {
                println!();
                println!("related: {}", answer.related_topics.join(", "));
            }
        }
        Commands::Timeline { company, group_by } => {
            let company = app.resolve_company(&company).await?;
            let granularity = PeriodGranularity::parse(&group_by)
                .with_context(|| format!("unknown group-by: {}", group_by))?;
            let (insights, total) = app
                .insights
                .list_by_company(&company.id, None, None, 0, 1000)
                .await?;
            let timeline = build_timeline(&insights, granularity);

            println!("{} insight(s) across {} period(s)", total, timeline.len());
            for period in timeline {
                println!(
                    "{}  ({} — {})  new={} reiterated={} modified={}",
                    period.period,
                    period.period_start,
                    period.period_end,
                    period.new_count,
                    period.reiterated_count,
                    period.modified_count
                );
                for insight in &period.insights {
                    let flag = if insight.is_new {
                        "new"
                    } else if insight.is_modified {
                        "modified"
                    } else {
                        "reiterated"
                    };
                    println!(
                        "    [{:.2}] {} ({}, {})",
                        insight.confidence_score, insight.title, insight.category, flag
                    );
                }
            }
        }
        Commands::History { id } => {
            let initiative = app
                .initiatives
                .get(&id)
                .await?
                .with_context(|| format!("Initiative '{}' not found", id))?;
            let insights = app.insights.list_by_initiative(&id).await?;

            println!("{} ({})", initiative.name, initiative.category);
            println!(
                "  first mentioned: {}  last mentioned: {}",
                initiative.first_mentioned_at.format("%Y-%m-%d"),
                initiative.last_mentioned_at.format("%Y-%m-%d")
            );
            println!(
                "  mentions: {}  documents: {}  avg confidence: {:.2}",
                initiative.mention_count, initiative.document_count, initiative.avg_confidence
            );
            for (i, insight) in insights.iter().enumerate() {
                let kind = if i == 0 {
                    "first"
                } else if insight.is_modified {
                    "modified"
                } else {
                    "reiterated"
                };
                println!(
                    "  {}  [{}]  {:.2}  {}",
                    insight.created_at.format("%Y-%m-%d"),
                    kind,
                    insight.confidence_score,
                    insight.description.chars().take(120).collect::<String>()
                );
            }
        }
        Commands::Purge { company, yes } => {
            if !yes {
                bail!("purge is irreversible; pass --yes to confirm");
            }
            let company = app.resolve_company(&company).await?;
            app.initiatives.purge_company(&company.id).await?;
            println!("Purged initiatives, insights, and evidence for {}", company.name);
        }
        Commands::Trends { company } => {
            let company = app.resolve_company(&company).await?;
            let (insights, _) = app
                .insights
                .list_by_company(&company.id, None, None, 0, 1000)
                .await?;
            let initiatives = app.initiatives.list_by_company(&company.id).await?;
            let trends = build_trends(&insights, &initiatives, 5);

            println!("categories:");
            for (category, count) in &trends.category_distribution {
                println!("  {}: {}", category, count);
            }
            println!("new initiatives by quarter:");
            for (period, count) in &trends.new_by_period {
                println!("  {}: {}", period, count);
            }
            println!("reiterated by quarter:");
            for (period, count) in &trends.reiterated_by_period {
                println!("  {}: {}", period, count);
            }
            println!("most discussed:");
            for initiative in &trends.most_discussed {
                println!(
                    "  {} ({} mentions, {} documents)",
                    initiative.name, initiative.mention_count, initiative.document_count
                );
            }
        }
    }

    Ok(())
}
