use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ragstash::{
    cli::{Cli, Command, SaveArgs, SearchArgs, StatusArgs},
    data_dir::DataDir,
    document::DateRange,
    engine::{EngineConfig, RetrievalEngine, SearchRequest, SearchResponse},
    error,
    ingest::IngestRequest,
    lexical::LexicalIndex,
    mcp,
    store::{DocumentStore, RedbStore},
    vector::{Embedder, HttpEmbedder, UnconfiguredEmbedder},
    vector_db::RedbVectorIndex,
};

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("RAGSTASH_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let engine = open_engine(&data_dir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    // The lexical index lives in memory only and is replayed from the
    // document store on every start.
    let replayed = engine.rebuild()?;
    tracing::debug!(documents = replayed, "lexical index rebuilt");

    match cli.command {
        Command::Save(args) => runtime.block_on(cmd_save(&engine, args))?,
        Command::Search(args) => runtime.block_on(cmd_search(&engine, args))?,
        Command::Remove(args) => {
            runtime.block_on(engine.remove(args.tenant, args.doc_id)).map(
                |existed| {
                    if existed {
                        println!("Removed document #{}", args.doc_id);
                    } else {
                        println!("Document #{} not found", args.doc_id);
                    }
                },
            )?;
        }
        Command::Status(args) => cmd_status(&engine, &data_dir, args)?,
        Command::Mcp => {
            drop(runtime);
            mcp::run_mcp(engine)?;
        }
    }

    Ok(())
}

fn open_engine(data_dir: &DataDir) -> error::Result<RetrievalEngine> {
    let store = RedbStore::open(&data_dir.store_db())?;
    let vectors = RedbVectorIndex::open(&data_dir.vectors_db())?;

    let embedder: Arc<dyn Embedder> = match HttpEmbedder::from_env() {
        Some(embedder) => Arc::new(embedder),
        None => {
            tracing::warn!(
                "no embedding provider configured, semantic search disabled"
            );
            Arc::new(UnconfiguredEmbedder)
        }
    };

    Ok(RetrievalEngine::new(
        Arc::new(store),
        Arc::new(LexicalIndex::new()),
        embedder,
        Arc::new(vectors),
        EngineConfig::default(),
    ))
}

async fn cmd_save(
    engine: &RetrievalEngine,
    args: SaveArgs,
) -> error::Result<()> {
    let doc_id = engine
        .ingest(IngestRequest {
            tenant_id: args.tenant,
            content_type: args.content_type,
            title: args.title,
            full_text: args.content,
            excerpt: None,
            source_url: args.url,
        })
        .await?;

    println!("Saved document #{doc_id} for user {}", args.tenant);
    Ok(())
}

async fn cmd_search(
    engine: &RetrievalEngine,
    args: SearchArgs,
) -> error::Result<()> {
    let request = SearchRequest {
        tenant_id: args.tenant,
        query: args.query,
        mode: args.mode,
        type_filter: args.content_type,
        date_range: DateRange::from_bounds(args.from, args.to),
        top_k: args.count,
    };

    let response = engine.search(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        format_human(engine, &response)?;
    }
    Ok(())
}

fn format_human(
    engine: &RetrievalEngine,
    response: &SearchResponse,
) -> error::Result<()> {
    if response.degraded {
        eprintln!("Warning: one retrieval branch was unavailable");
    }
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &response.results {
        println!(
            "#{} {:.3} [{}] {}",
            result.doc_id,
            result.fused_score,
            result.metadata_snapshot.content_type,
            result.metadata_snapshot.title
        );
        let excerpt: String =
            result.metadata_snapshot.excerpt.chars().take(200).collect();
        if !excerpt.is_empty() {
            println!("  {}", excerpt.replace('\n', " "));
        }
    }
    println!("\n{} result(s)", response.results.len());
    Ok(())
}

fn cmd_status(
    engine: &RetrievalEngine,
    data_dir: &DataDir,
    args: StatusArgs,
) -> error::Result<()> {
    let counts = engine.store().tenant_counts()?;
    let total: u64 = counts.values().sum();

    if args.json {
        let tenants: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(tenant, count)| {
                (tenant.to_string(), serde_json::json!(count))
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "dataDir": data_dir.root().display().to_string(),
                "documents": total,
                "tenants": tenants,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Documents: {total}");
        println!("Users: {}", counts.len());
        for (tenant, count) in &counts {
            println!("  user {tenant}: {count} document(s)");
        }
    }
    Ok(())
}
