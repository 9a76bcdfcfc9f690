use anyhow::{Context, Result};
use clap::Parser;
use shared::{
    default_settings_path, save_newsletter, Credentials, GeminiGenerator, HttpPageSource,
    NewsletterResult, NewsletterService, Settings, SvgChartRenderer,
};
use std::fs::OpenOptions;
use std::io::{self as stdio, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const EXIT_COMMANDS: &[&str] = &["exit", "quit", "종료"];
const CLEAR_CACHE_COMMAND: &str = "cache clear";

#[derive(Parser)]
#[command(name = "market-newsletter")]
#[command(about = "Generate a Korean stock market newsletter from live market data")]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single query and exit instead of starting the interactive prompt
    #[arg(short, long)]
    query: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the effective settings back to the settings file and exit
    #[arg(long)]
    write_config: bool,
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("shared={level},market_newsletter={level}")))
    };

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(stdio::stderr)
                .with_filter(filter()),
        )
        .with(file_layer)
        .init();

    Ok(())
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    stdio::stdout().flush()?;

    let mut input = String::new();
    let read = stdio::stdin().read_line(&mut input)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

fn resolve_api_key() -> Result<String> {
    match Credentials::from_env() {
        Ok(credentials) => Ok(credentials.gemini_api_key),
        Err(e) => {
            tracing::debug!("{:#}", e);
            let key = prompt_line("\n🔑 Gemini API key: ")?.unwrap_or_default();
            if key.is_empty() {
                anyhow::bail!("A Gemini API key is required (set GEMINI_API_KEY or enter it at the prompt)");
            }
            Ok(key)
        }
    }
}

fn report(result: &NewsletterResult, newsletter_path: &Path) {
    if !result.success {
        println!(
            "\n❌ {}",
            result.message.as_deref().unwrap_or("Unknown error")
        );
        return;
    }

    println!("\n{}", "=".repeat(60));
    println!("✅ Newsletter generated");
    println!("{}", "=".repeat(60));
    println!("{}", result.newsletter);

    if result.cached_data {
        println!("\n💾 Served partly from cache");
    }
    if result.is_degraded() {
        println!(
            "\n⚠ Using built-in data for: {}",
            result.degraded_feeds.join(", ")
        );
    }

    match save_newsletter(result, newsletter_path) {
        Ok(path) => println!("\n✅ Newsletter saved to: {}", path.display()),
        Err(e) => {
            tracing::error!("{:#}", e);
            println!("\n⚠ Could not save newsletter: {:#}", e);
        }
    }

    if !result.images.is_empty() {
        println!("\n📊 Charts:");
        for image in &result.images {
            println!("  - {}", image.display());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_settings_path);
    // Logging depends on settings, so a bad settings file is reported after init
    let (settings, load_error) = match Settings::try_load(&config_path) {
        Ok(settings) => (settings, None),
        Err(e) => (Settings::defaults(), Some(e)),
    };

    init_logging(&args.log_level, settings.log_file().as_deref())?;

    if let Some(e) = load_error {
        tracing::warn!(
            path = %config_path.display(),
            "failed to load settings, using defaults: {:#}",
            e
        );
    }

    if args.write_config {
        settings
            .save(&config_path)
            .context("Failed to write settings file")?;
        println!("✓ Settings written to {}", config_path.display());
        return Ok(());
    }

    println!("{}", "=".repeat(60));
    println!("📈 Market Newsletter");
    println!("{}", "=".repeat(60));

    let api_key = resolve_api_key()?;
    let generator = GeminiGenerator::new(api_key, settings.gemini_model())?;
    let newsletter_path = settings.newsletter_path();

    let service = NewsletterService::new(
        settings,
        Arc::new(HttpPageSource::new()?),
        Box::new(SvgChartRenderer::default()),
        Box::new(generator),
    );

    if let Some(query) = args.query {
        println!("\n🔄 Collecting market data...");
        let result = service.run(&query).await;
        report(&result, &newsletter_path);
        return Ok(());
    }

    loop {
        println!("\n{}", "-".repeat(60));
        println!("Commands: '오늘자 국내 시장', '{}', 'exit'", CLEAR_CACHE_COMMAND);

        let input = match prompt_line("💬 Query: ")? {
            Some(input) => input,
            None => break,
        };

        let command = input.to_lowercase();
        if EXIT_COMMANDS.contains(&command.as_str()) {
            break;
        }
        if command == CLEAR_CACHE_COMMAND {
            match service.clear_cache() {
                Ok(removed) => println!("✅ Cache cleared ({} entries)", removed),
                Err(e) => {
                    tracing::error!("{:#}", e);
                    println!("⚠ Could not clear cache: {:#}", e);
                }
            }
            continue;
        }
        if input.is_empty() {
            continue;
        }

        println!("\n🔄 Collecting market data...");
        let result = service.run(&input).await;
        report(&result, &newsletter_path);
    }

    println!("👋 Bye");
    Ok(())
}
