mod config;
mod plan_cmds;
mod serve_cmd;
#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use smartplan_core::gateway::GeminiGateway;
use smartplan_db::models::ModelId;
use smartplan_db::pool;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "smartplan",
    about = "Turn a free-text goal into a dependency-ordered task plan"
)]
struct Cli {
    /// Database URL (overrides SMARTPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Model to use (overrides GENAI_MODEL env var)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a smartplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/smartplan")]
        db_url: String,
        /// PostgreSQL password
        #[arg(long)]
        db_password: Option<String>,
        /// Google Generative Language API key
        #[arg(long)]
        api_key: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the smartplan database (requires config file or env vars)
    DbInit,
    /// Generate a plan for a goal and save it
    Generate {
        /// The goal, in plain language
        goal: String,
        /// Print the saved plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent plans, newest first
    List {
        /// Maximum number of plans to show (1-100)
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Find plans whose goal contains a keyword
    Search {
        /// Keyword to look for (case-insensitive)
        keyword: String,
    },
    /// Show a plan as a dependency-ordered timeline
    Show {
        /// Plan ID to show
        plan_id: String,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a plan
    Delete {
        /// Plan ID to delete
        plan_id: String,
    },
    /// Start the web interface
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

/// Execute the `smartplan init` command: write config file.
fn cmd_init(
    db_url: &str,
    db_password: Option<String>,
    api_key: Option<String>,
    model: Option<&str>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let default_model = match model {
        Some(name) => name.parse::<ModelId>()?,
        None => ModelId::default(),
    };

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
            password: db_password,
        },
        model: config::ModelSection {
            api_key,
            default: Some(default_model.to_string()),
            endpoint: None,
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  model.default = {default_model}");
    if cfg.database.password.is_none() {
        println!("  database.password is not set; export SMARTPLAN_DATABASE_PASSWORD.");
    }
    if cfg.model.api_key.is_none() {
        println!("  model.api_key is not set; export GOOGLE_API_KEY.");
    }
    println!();
    println!("Next: run `smartplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `smartplan db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &AppConfig) -> anyhow::Result<()> {
    println!("Initializing smartplan database...");

    match pool::ensure_database_exists(&resolved.db_config).await? {
        pool::DatabaseStatus::Created => println!("Created database."),
        pool::DatabaseStatus::Existing => println!("Database already exists."),
        pool::DatabaseStatus::Unverified => {
            println!("Could not reach the maintenance database; assuming the target exists.")
        }
    }

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let result = pool::run_migrations(&db_pool).await;
    let count = smartplan_db::queries::plans::count_plans(&db_pool).await;
    db_pool.close().await;
    result?;

    println!("Database ready. plans: {} rows", count?);
    println!("smartplan db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_url = cli.database_url.as_deref();
    let model = cli.model.as_deref();

    match cli.command {
        Commands::Init {
            db_url: init_db_url,
            db_password,
            api_key,
            force,
        } => {
            cmd_init(&init_db_url, db_password, api_key, model, force)?;
        }
        Commands::DbInit => {
            let resolved = AppConfig::resolve(db_url, model)?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Generate { goal, json } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let gateway = GeminiGateway::new(resolved.gemini)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                plan_cmds::cmd_generate(&db_pool, &gateway, &goal, resolved.default_model, json)
                    .await;
            db_pool.close().await;
            result?;
        }
        Commands::List { limit } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::cmd_list(&db_pool, limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Search { keyword } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::cmd_search(&db_pool, &keyword).await;
            db_pool.close().await;
            result?;
        }
        Commands::Show { plan_id, json } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::cmd_show(&db_pool, &plan_id, json).await;
            db_pool.close().await;
            result?;
        }
        Commands::Delete { plan_id } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::cmd_delete(&db_pool, &plan_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve { bind, port } => {
            let resolved = AppConfig::resolve(db_url, model)?;
            let gateway = GeminiGateway::new(resolved.gemini)?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let state = serve_cmd::AppState {
                pool: db_pool.clone(),
                gateway: Arc::new(gateway),
                default_model: resolved.default_model,
            };
            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
