use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "statsgate-cli")]
#[command(about = "Management CLI for the statsgate admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "STATSGATE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway version, transport and uptime
    Status,
    /// Run a health check now
    Health,
    /// Show the circuit breaker
    Breaker,
    /// Force the circuit breaker closed
    ResetBreaker,
    /// Show an identifier's block, if any
    Block { identifier: String },
    /// Block an identifier
    AddBlock {
        identifier: String,
        #[arg(long, default_value_t = 900)]
        duration_secs: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Lift a block
    Unblock { identifier: String },
    /// Show window usage for an identifier
    Limit {
        identifier: String,
        #[arg(long, default_value = "default")]
        rule: String,
    },
    /// Clear an identifier's rate limit counters
    ResetLimit { identifier: String },
    /// Drop cached data for a player
    Invalidate { player_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Health => client.get(format!("{}/admin/health", base)),
        Commands::Breaker => client.get(format!("{}/admin/breaker", base)),
        Commands::ResetBreaker => client.post(format!("{}/admin/breaker/reset", base)),
        Commands::Block { identifier } => client.get(format!("{}/admin/blocks/{}", base, identifier)),
        Commands::AddBlock {
            identifier,
            duration_secs,
            reason,
        } => client.post(format!("{}/admin/blocks", base)).json(&json!({
            "identifier": identifier,
            "duration_secs": duration_secs,
            "reason": reason,
        })),
        Commands::Unblock { identifier } => client.delete(format!("{}/admin/blocks/{}", base, identifier)),
        Commands::Limit { identifier, rule } => client
            .get(format!("{}/admin/limits/{}", base, identifier))
            .query(&[("rule", rule)]),
        Commands::ResetLimit { identifier } => client.delete(format!("{}/admin/limits/{}", base, identifier)),
        Commands::Invalidate { player_id } => client.delete(format!("{}/admin/cache/players/{}", base, player_id)),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
