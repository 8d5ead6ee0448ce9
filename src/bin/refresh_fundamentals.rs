/// Fundamentals Refresh CLI
///
/// Fetches (or refreshes) cached fundamentals for one or more symbols,
/// running the same compute-and-cache flow the service layer uses. Useful
/// for warming the cache and for spot-checking provider merges.

use anyhow::Result;
use clap::Parser;

use fundsap::{Config, Engine, Market};

#[derive(Parser)]
#[command(
    name = "refresh-fundamentals",
    about = "Fetch and cache company fundamentals",
    long_about = "Computes fundamentals for the given symbols through the provider merge pipeline (SEC EDGAR + Yahoo for US, Screener.in for IN) and caches them in SQLite."
)]
struct Cli {
    /// Symbols to refresh, e.g. AAPL MSFT or RELIANCE.NS
    #[arg(required = true)]
    symbols: Vec<String>,

    /// Market the symbols trade in: US or IN
    #[arg(long, short, default_value = "US")]
    market: String,

    /// Bypass the TTL cache and hit the providers
    #[arg(long, short)]
    force: bool,

    /// Print responses as JSON instead of a summary line
    #[arg(long, short)]
    json: bool,

    /// Show detailed progress information
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fundsap=debug".into()),
            )
            .init();
    }

    let market: Market = cli
        .market
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let config = Config::from_env();
    println!("📊 Fundamentals refresh ({} market)", market.as_str());
    println!("💾 {}", config.database_path);
    println!("══════════════════════════════════════");

    let engine = Engine::new(config).await?;

    let mut failures = 0usize;
    for symbol in &cli.symbols {
        match engine.fundamentals(market, symbol, cli.force).await {
            Ok(response) => {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                } else {
                    println!(
                        "✅ {:<12} source={:<8} mcap={} pe={} updated={}",
                        response.symbol,
                        response.source.as_deref().unwrap_or("-"),
                        fmt_opt(response.market_cap),
                        fmt_opt(response.ratios.pe),
                        response.updated_at,
                    );
                }
            }
            Err(e) => {
                failures += 1;
                println!("❌ {:<12} {}", symbol.to_uppercase(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} symbols failed", cli.symbols.len());
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}"),
        None => "-".to_string(),
    }
}
