use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use psa_core::{SearchRequest, SearchResponse, SortBy, DEFAULT_LIMIT};
use psa_search::{cancel_pair, SearchConfig, SearchEngine, SourceRegistry};

#[derive(Debug, Parser)]
#[command(name = "psa-cli")]
#[command(about = "Product search aggregator command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP search boundary.
    Serve,
    /// Run one search and print the JSON response.
    Search(SearchArgs),
    /// List configured sources.
    Sources,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(default_value = "")]
    term: String,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long, default_value = "relevance")]
    sort: SortBy,
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    category: Option<String>,
    /// Restrict the search to one source table.
    #[arg(long)]
    dataset: Option<String>,
    /// Re-run the search every N seconds until interrupted.
    #[arg(long)]
    refresh_secs: Option<u64>,
}

impl From<SearchArgs> for SearchRequest {
    fn from(args: SearchArgs) -> Self {
        Self {
            search_term: args.term,
            min_price: args.min_price,
            max_price: args.max_price,
            sort_by: args.sort,
            limit: args.limit,
            offset: args.offset,
            category: args.category,
            dataset: args.dataset,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SearchConfig::from_env().context("reading configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let engine = SearchEngine::from_config(&config).await?;
            psa_web::serve(engine, config.web_port).await?;
        }
        Commands::Search(args) => {
            let refresh = args.refresh_secs;
            let engine = SearchEngine::from_config(&config).await?;
            run_search(&engine, SearchRequest::from(args), refresh).await?;
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.sources_path).await?;
            for source in &registry.sources {
                println!(
                    "{}\t{}\t{}\t{}",
                    source.table,
                    source.family,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.display_name
                );
            }
        }
    }

    Ok(())
}

/// Prints one response, or a fresh one per tick when `refresh_secs` is set. Ctrl-C cancels the
/// in-flight search quietly.
async fn run_search(engine: &SearchEngine, request: SearchRequest, refresh_secs: Option<u64>) -> Result<()> {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let Some(secs) = refresh_secs else {
        if let Some(result) = engine.search_cancellable(&request, &signal).await? {
            print_response(result.into())?;
        }
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = signal.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match engine.search_cancellable(&request, &signal).await? {
            Some(result) => print_response(result.into())?,
            None => break,
        }
    }
    tracing::info!("refresh loop stopped");
    Ok(())
}

fn print_response(response: SearchResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
