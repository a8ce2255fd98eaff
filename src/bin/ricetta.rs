//! Ricetta CLI: recipe indexing service and search tools.
//!
//! Usage:
//!   ricetta run [--broker url] [--group name] [--consumer name]
//!   ricetta publish-saved <file>
//!   ricetta publish-deleted <id>
//!   ricetta search <query> [--limit n]
//!   ricetta tag <tag> | tags | show <id>

use clap::{Parser, Subcommand};
use ricetta::{CancellationToken, Config, Indexer, Language, Recipe};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ricetta", version, about = "Event-driven recipe indexer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Directory holding the default databases
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Path to the graph database
    #[arg(long, global = true)]
    graph_db: Option<PathBuf>,
    /// Path to the fulltext database
    #[arg(long, global = true)]
    index_db: Option<PathBuf>,
    /// Broker URL (sqlite:<path> or redis://host:port)
    #[arg(long, global = true)]
    broker: Option<String>,
    /// Stemming language (italian, english)
    #[arg(long, global = true)]
    language: Option<String>,
    /// Log level for this crate
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume recipe streams until interrupted
    Run {
        /// Consumer group name
        #[arg(long)]
        group: Option<String>,
        /// Consumer name within the group
        #[arg(long)]
        consumer: Option<String>,
    },
    /// Publish a saved-recipe event from a JSON file
    PublishSaved {
        /// Recipe JSON file
        file: PathBuf,
    },
    /// Publish a deleted-recipe event
    PublishDeleted {
        /// External ID of the recipe
        id: String,
    },
    /// Search recipes by text
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List recipes carrying a tag
    Tag { tag: String },
    /// List all tags
    Tags,
    /// Print a recipe as JSON
    Show { id: String },
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut config = match &cli.data_dir {
        Some(dir) => {
            let mut config = Config::from_env().map_err(|e| e.to_string())?;
            let defaults = Config::with_data_dir(dir);
            config.graph_db = defaults.graph_db;
            config.index_db = defaults.index_db;
            config.broker = defaults.broker;
            config
        }
        None => Config::from_env().map_err(|e| e.to_string())?,
    };
    if let Some(path) = &cli.graph_db {
        config.graph_db = path.clone();
    }
    if let Some(path) = &cli.index_db {
        config.index_db = path.clone();
    }
    if let Some(url) = &cli.broker {
        config.broker = url.clone();
    }
    if let Some(language) = &cli.language {
        config.language =
            Language::parse(language).ok_or_else(|| format!("unknown language '{}'", language))?;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.log_json {
        config.log_json = true;
    }
    if let Commands::Run { group, consumer } = &cli.command {
        if let Some(group) = group {
            config.group = group.clone();
        }
        if let Some(consumer) = consumer {
            config.consumer = consumer.clone();
        }
    }
    Ok(config)
}

async fn cmd_run(indexer: &Indexer) -> i32 {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight messages");
            signal_token.cancel();
        }
    });

    match indexer.run(token).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "indexer stopped");
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_publish_saved(indexer: &Indexer, file: &PathBuf) -> i32 {
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    let recipe: Recipe = match serde_json::from_str(&text) {
        Ok(recipe) => recipe,
        Err(e) => {
            eprintln!("Error: '{}' is not a recipe: {}", file.display(), e);
            return 1;
        }
    };
    match indexer.publish_saved(&recipe).await {
        Ok(id) => {
            println!("Published '{}' as {}", recipe.external_id, id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_publish_deleted(indexer: &Indexer, external_id: &str) -> i32 {
    match indexer.publish_deleted(external_id).await {
        Ok(id) => {
            println!("Published deletion of '{}' as {}", external_id, id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_search(indexer: &Indexer, query: &str, limit: Option<usize>) -> i32 {
    match indexer.api().find_recipes(query, limit) {
        Ok(recipes) if recipes.is_empty() => {
            println!("No recipes found.");
            0
        }
        Ok(recipes) => {
            println!("{:<24}  {}", "ID", "TITLE");
            println!("{}", "-".repeat(60));
            for recipe in recipes {
                println!("{:<24}  {}", recipe.external_id, recipe.title);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_tag(indexer: &Indexer, tag: &str) -> i32 {
    match indexer.api().search_by_tag(tag) {
        Ok(ids) => {
            for id in ids {
                println!("{}", id);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_tags(indexer: &Indexer) -> i32 {
    match indexer.api().all_recipe_tags() {
        Ok(tags) => {
            for tag in tags {
                println!("{}", tag);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_show(indexer: &Indexer, external_id: &str) -> i32 {
    match indexer.api().get_recipe(external_id) {
        Ok(Some(recipe)) => match serde_json::to_string_pretty(&recipe) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Ok(None) => {
            eprintln!("Error: recipe '{}' not found", external_id);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = ricetta::logging::init(&config.log_level, config.log_json) {
        eprintln!("Warning: logging not initialised: {}", e);
    }

    let indexer = match Indexer::open(config).await {
        Ok(indexer) => indexer,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Run { .. } => cmd_run(&indexer).await,
        Commands::PublishSaved { file } => cmd_publish_saved(&indexer, file).await,
        Commands::PublishDeleted { id } => cmd_publish_deleted(&indexer, id).await,
        Commands::Search { query, limit } => cmd_search(&indexer, query, *limit),
        Commands::Tag { tag } => cmd_tag(&indexer, tag),
        Commands::Tags => cmd_tags(&indexer),
        Commands::Show { id } => cmd_show(&indexer, id),
    };
    std::process::exit(code);
}
