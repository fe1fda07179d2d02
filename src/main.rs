use anyhow::Result;
use clap::Parser;
use sqlcoder_lite::executor::PgExecutor;
use sqlcoder_lite::generator::SqlGenerator;
use sqlcoder_lite::service::HttpFeedbackSink;
use sqlcoder_lite::{
    AppConfig, RemoteGenerator, RetryConfig, RetryController, RuleBasedGenerator, SchemaCatalog,
    SqlAssistant, SqlMemory, SqliteBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlcoder-lite")]
#[command(about = "Natural-language to validated SQL with table auto-correction")]
struct Args {
    /// The question in natural language
    question: String,

    /// Path to the schema catalog (JSON or plain text form)
    #[arg(short, long)]
    schema: Option<String>,

    /// Remote generator endpoint (default: rule engine)
    #[arg(long)]
    generator_url: Option<String>,

    /// Execute the accepted SQL against DATABASE_URL
    #[arg(long)]
    execute: bool,

    /// Attempt budget for the retry loop
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(schema) = args.schema {
        config.schema_path = schema;
    }
    if let Some(url) = args.generator_url {
        config.generator_url = Some(url);
    }
    if let Some(n) = args.max_attempts {
        config.max_attempts = n;
    }
    config.validate()?;

    let catalog = SchemaCatalog::load(&config.schema_path)?;

    let generator: Arc<dyn SqlGenerator> = match &config.generator_url {
        Some(url) => {
            info!("Using model service at {}", url);
            Arc::new(
                RemoteGenerator::new(url.as_str(), Duration::from_secs(config.generator_timeout_secs))?
                    .with_lang(config.lang.as_str()),
            )
        }
        None => {
            info!("Using rule engine");
            Arc::new(RuleBasedGenerator::new())
        }
    };

    let controller = RetryController::new(generator).with_config(RetryConfig {
        max_attempts: config.max_attempts,
        allowed_sample: 10,
    });
    let memory = Arc::new(SqlMemory::new(Box::new(SqliteBackend::open(&config.memory_path)?))?);

    if args.execute {
        let database_url = config
            .database_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--execute requires DATABASE_URL"))?;
        let executor = PgExecutor::connect(&database_url, Duration::from_secs(120)).await?;
        let mut assistant = SqlAssistant::new(controller, memory, Arc::new(executor));
        if let Some(url) = &config.feedback_url {
            assistant = assistant.with_sink(Arc::new(HttpFeedbackSink::new(url.as_str())));
        }
        let response = assistant.ask(&args.question, &catalog).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    // Generation-only mode: consult the cache, then the retry loop.
    if let Some(sql) = memory.lookup(&args.question) {
        println!("{}", sql);
        return Ok(());
    }
    let outcome = controller.run(&args.question, &catalog).await?;
    println!("{}", outcome.sql);
    info!(
        "Tables: {:?} (source: {}, attempts: {})",
        outcome.tables_used, outcome.source, outcome.attempts
    );

    Ok(())
}
