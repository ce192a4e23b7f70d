use anyhow::Context;
use ragline::citations::{build_display_sources, resolve_citations, DisplaySource};
use ragline::cli::{Cli, Commands, ConfigAction};
use ragline::config::Config;
use ragline::engine::Engine;
use ragline::error::{RaglineError, Result};
use ragline::retrieval::{RequestContext, RetrievalOutcome, NO_RESULTS_NOTICE};
use ragline::storage::{import_corpus, CorpusFile, Database};
use std::path::{Path, PathBuf};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Query {
            query,
            limit,
            json,
            no_expansion,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_query(config, &query, limit, json, no_expansion)
                .with_context(|| format!("Query failed: {:?}", query))?;
        }
        Commands::Cite {
            answer,
            results,
            multi_chunk,
            max_sources,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_cite(&config, &answer, &results, multi_chunk, max_sources, json)
                .context("Citation mapping failed")?;
        }
        Commands::Import { corpus } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_import(config, &corpus)
                .with_context(|| format!("Import of {} failed", corpus.display()))?;
        }
        Commands::Stats => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(&config).context("Failed to read repository statistics")?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action).context("Config command failed")?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ragline=debug" } else { "ragline=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RaglineError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RaglineError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| RaglineError::Io {
        source: e,
        context: format!("Failed to read {}: {}", what, path.display()),
    })
}

fn cmd_query(
    config: Config,
    query: &str,
    limit: Option<usize>,
    json: bool,
    no_expansion: bool,
) -> Result<()> {
    let mut search = config.search.clone();
    if let Some(limit) = limit {
        search.match_count = limit;
    }
    if no_expansion {
        search.query_expansion_enabled = false;
    }

    let engine = Engine::open(config)?;
    let ctx = RequestContext::new();
    let outcome = runtime()?.block_on(engine.query_with(&ctx, query, &search))?;

    if json {
        println!("{}", to_json(&outcome, "retrieval outcome")?);
        return Ok(());
    }

    match &outcome {
        RetrievalOutcome::NoResults { degradation, .. } => {
            if let Some(failure) = degradation {
                println!("⚠ {} search unavailable: {}", failure.leg, failure.reason);
            }
            println!("{}", NO_RESULTS_NOTICE);
        }
        RetrievalOutcome::Found(result) => {
            if let Some(failure) = &result.degradation {
                println!("⚠ {} search unavailable: {}", failure.leg, failure.reason);
            }
            if let Some(notice) = result.low_relevance_notice() {
                println!("⚠ {}\n", notice);
            }
            print!("{}", result.context_text);
        }
    }

    Ok(())
}

fn cmd_cite(
    config: &Config,
    answer: &Path,
    results: &Path,
    multi_chunk: bool,
    max_sources: Option<usize>,
    json: bool,
) -> Result<()> {
    let answer_text = read_file(answer, "answer")?;
    let outcome: RetrievalOutcome =
        serde_json::from_str(&read_file(results, "results")?).map_err(|e| RaglineError::Json {
            source: e,
            context: format!("Failed to parse results: {}", results.display()),
        })?;

    let mut options = config.display;
    options.multi_chunk |= multi_chunk;
    if let Some(max) = max_sources {
        options.max_sources = max;
    }

    let ordered = outcome.ordered();
    let cited = resolve_citations(&answer_text, ordered);
    let sources = build_display_sources(ordered, &cited, &options);

    if json {
        println!("{}", to_json(&sources, "sources")?);
        return Ok(());
    }

    if sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    println!("Sources");
    println!("=======");
    for source in &sources {
        print_source(source);
    }

    Ok(())
}

fn print_source(source: &DisplaySource) {
    let citations = if source.citation_indices.is_empty() {
        String::new()
    } else {
        let labels: Vec<String> = source
            .citation_indices
            .iter()
            .map(|i| format!("[{}]", i))
            .collect();
        format!("{} ", labels.join(""))
    };
    let relevance = source
        .similarity
        .map(|s| format!(" ({}%)", (s * 100.0) as i32))
        .unwrap_or_default();
    let page = source
        .page_locator
        .as_deref()
        .map(|p| format!(", {}", p))
        .unwrap_or_default();

    println!("\n{}{}{}{}", citations, source.title, page, relevance);
    println!("  {}", source.source_url.as_deref().unwrap_or(&source.path));
    for passage in &source.passages {
        let marker = if passage.cited { "*" } else { "-" };
        println!("  {} {}", marker, passage.preview.replace('\n', " "));
    }
}

fn cmd_import(config: Config, corpus_path: &Path) -> Result<()> {
    let corpus = CorpusFile::load(corpus_path)?;
    tracing::info!(
        documents = corpus.documents.len(),
        missing_embeddings = corpus.missing_embeddings(),
        "Importing corpus"
    );

    let engine = Engine::open(config)?;
    let embedder = engine.embedder();
    let stats = runtime()?.block_on(import_corpus(
        engine.database(),
        &corpus,
        embedder.model_name(),
        embedder.dimension(),
        Some(embedder.provider()),
    ))?;

    println!("✓ Imported {} documents ({} chunks)", stats.documents, stats.chunks);
    println!(
        "  Embeddings: {} stored, {} computed with {}",
        stats.stored_embeddings,
        stats.computed_embeddings,
        embedder.model_name()
    );
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let path = config.database_path()?;
    if !path.exists() {
        println!("No repository at {}. Run 'ragline import' first.", path.display());
        return Ok(());
    }

    let stats = Database::new(&path)?.stats()?;

    println!("Repository: {}", path.display());
    println!("  Documents:  {}", stats.document_count);
    println!(
        "  Chunks:     {} ({} table-of-contents)",
        stats.chunk_count, stats.toc_chunk_count
    );
    println!("  Embeddings: {}", stats.embedding_count);
    for model in &stats.models {
        println!(
            "    {} ({} dims): {}",
            model.model, model.dimension, model.count
        );
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Embedding model: {}", config.embedding.provider.model_name());
            if !config.profiles.is_empty() {
                let mut names: Vec<&String> = config.profiles.keys().collect();
                names.sort();
                println!(
                    "  Profiles: {}",
                    names
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RaglineError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let mut config = Config::load_or_default(&path)?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
    }
    Ok(config)
}
