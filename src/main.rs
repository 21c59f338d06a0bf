//! vertexflow CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use vertexflow::sandbox::{ComponentSource, FileCatalogLoader};
use vertexflow::{
    Classification, ComponentIsolation, ComponentRegistry, Engine, EngineConfig, Graph,
    IsolationLevel, OutcomeStatus, SuccessPolicy,
};

/// Build workflow graphs and check component code isolation
#[derive(Parser)]
#[command(name = "vertexflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the build order of a flow
    Order {
        /// Flow description (.yml, .yaml or .json)
        flow: PathBuf,
    },

    /// Classify component source as core or custom and check it
    Classify {
        /// File holding the component source
        source: PathBuf,

        /// Declared component name
        #[arg(short, long)]
        name: Option<String>,

        /// Catalog index JSON (component index or hash history)
        #[arg(short, long)]
        index: Option<PathBuf>,

        /// Isolation level applied to custom code
        #[arg(short, long, default_value = "moderate")]
        level: IsolationLevel,
    },

    /// Build every vertex of a flow
    Run {
        /// Flow description (.yml, .yaml or .json)
        flow: PathBuf,

        /// Config file (defaults to vertexflow.yml, then ~/.vertexflow/config.yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum builds in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Directory for the vertex result cache
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Isolation level applied to custom code
        #[arg(short, long)]
        level: Option<IsolationLevel>,

        /// Save the run result to the runs directory
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Order { flow } => order(&flow),
        Commands::Classify {
            source,
            name,
            index,
            level,
        } => classify(&source, name.as_deref(), index.as_deref(), level),
        Commands::Run {
            flow,
            config,
            concurrency,
            cache_dir,
            level,
            save,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::from_file(&path)?
                    .with_env_overrides(|key| std::env::var(key).ok())?,
                None => EngineConfig::auto_load()?,
            };
            if let Some(concurrency) = concurrency {
                config.max_concurrency = concurrency;
            }
            if let Some(dir) = cache_dir {
                config.cache_dir = Some(dir);
            }
            if let Some(level) = level {
                config.isolation_level = level;
            }
            run(&flow, config, save).await
        }
    }
}

fn order(flow: &Path) -> Result<()> {
    let graph = Graph::from_file(flow, &ComponentRegistry::with_builtins())?;
    for id in graph.build_order()? {
        println!("{}", id);
    }
    Ok(())
}

fn classify(
    source: &Path,
    name: Option<&str>,
    index: Option<&Path>,
    level: IsolationLevel,
) -> Result<()> {
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source {}", source.display()))?;

    let isolation = match index {
        Some(path) => ComponentIsolation::new(FileCatalogLoader::new(path)),
        None => ComponentIsolation::without_catalog(),
    };

    let validated = isolation.validate(&ComponentSource::new(text, name), level)?;
    match validated.classification {
        Classification::Core => println!("core"),
        Classification::Custom => {
            println!("custom (allowed at {} isolation)", level);
            if !validated.modules.is_empty() {
                println!("modules: {}", validated.modules.join(", "));
            }
        }
    }
    Ok(())
}

async fn run(flow: &Path, config: EngineConfig, save: bool) -> Result<()> {
    let mut graph = Graph::from_file(flow, &ComponentRegistry::with_builtins())?;
    let engine = Engine::new(config);
    engine.isolation().preload();

    let scheduler = engine.scheduler();
    let cancel = scheduler.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let mut result = scheduler.run(&mut graph).await?;
    result.flow = Some(flow.display().to_string());

    for id in &result.order {
        let Some(outcome) = result.outcome(id) else {
            continue;
        };
        match outcome.status {
            OutcomeStatus::Built if outcome.reused_from_cache => println!("{}\tbuilt (cached)", id),
            OutcomeStatus::Built => println!("{}\tbuilt", id),
            OutcomeStatus::Failed => println!(
                "{}\tfailed: {}",
                id,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            OutcomeStatus::Cancelled => println!("{}\tcancelled", id),
        }
    }

    if save {
        let path = result.save_to(&engine.config().runs_dir)?;
        log::info!("Saved run to {}", path.display());
    }

    if !result.is_success(SuccessPolicy::AnyTerminalBuilt) {
        anyhow::bail!("No terminal vertex was built");
    }
    Ok(())
}
