// lecture-store command line: bootstrap the database and manage media objects

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lecture_store::config::AppConfig;
use lecture_store::db::{self, PoolManager, SqlParam};
use lecture_store::logging;
use lecture_store::media::MediaResolver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lecture-store", version, about = "Lecture portal storage tooling")]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, short = 'd', global = true, env = "LECTURE_STORE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database, schema, default admin and default sections if missing
    Init,
    /// Show the T-SQL a `?`-placeholder statement becomes
    Translate {
        sql: String,
        /// Parameter values, bound in order (JSON literals; bare words are strings)
        params: Vec<String>,
    },
    /// Print the object key a stored reference resolves to
    Resolve { reference: String },
    /// Issue a signed GET URL for a stored reference
    Sign {
        reference: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
    /// Upload a lecture video under a new `videos/` key
    Upload {
        file: PathBuf,
        /// MIME type of the file
        #[arg(long, default_value = "video/mp4")]
        content_type: String,
    },
    /// Delete the object a stored reference names
    Delete { reference: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.debug)?;

    match cli.command {
        Commands::Init => run_init().await,
        Commands::Translate { sql, params } => run_translate(&sql, &params),
        Commands::Resolve { reference } => {
            let resolver = media_resolver()?;
            println!("{}", resolver.resolve(&reference)?);
            Ok(())
        }
        Commands::Sign { reference, ttl } => {
            let resolver = media_resolver()?;
            let key = resolver.resolve(&reference)?;
            let signed = resolver.sign(&key, Duration::from_secs(ttl)).await?;
            println!("{}", serde_json::to_string_pretty(&signed)?);
            Ok(())
        }
        Commands::Upload { file, content_type } => {
            let resolver = media_resolver()?;
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let original_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = resolver.upload(&original_name, &content_type, data).await?;
            println!("{}", key);
            Ok(())
        }
        Commands::Delete { reference } => {
            let resolver = media_resolver()?;
            let key = resolver.delete_reference(&reference).await?;
            println!("deleted {}", key);
            Ok(())
        }
    }
}

async fn run_init() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    // Not connected up front: the database may not exist until the bootstrap creates it
    let pool_manager = Arc::new(PoolManager::new(config.database.clone()));

    let report = db::initialize_mssql(Arc::clone(&pool_manager), &config.admin)
        .await
        .context("Database initialization failed")?;
    pool_manager.shutdown().await;

    info!(
        database = %config.database.database,
        admin_created = report.admin_created,
        sections_seeded = report.sections_seeded,
        "Bootstrap complete"
    );
    Ok(())
}

fn run_translate(sql: &str, raw_params: &[String]) -> Result<()> {
    let params: Vec<SqlParam> = raw_params
        .iter()
        .map(|raw| match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => SqlParam::from_json(&value),
            Err(_) => SqlParam::from(raw.as_str()),
        })
        .collect();

    let statement = db::translate(sql, &params)?;
    println!("{}", statement.sql);
    for binding in &statement.bindings {
        println!("  {} {} = {:?}", binding.name, binding.wire_type, binding.value);
    }
    Ok(())
}

fn media_resolver() -> Result<MediaResolver> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let media = config
        .media
        .context("Media storage is not configured (set S3_BUCKET_NAME)")?;
    Ok(MediaResolver::from_config(&media)?)
}
