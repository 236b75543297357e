use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "marquee-cli")]
#[command(about = "Operations CLI for a running Marquee server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:4000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server availability and version
    Health,
    /// Show request counters
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let path = match cli.command {
        Commands::Health => "/v1/healthcheck",
        Commands::Metrics => "/debug/vars",
    };

    let res = client.get(format!("{base}{path}")).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
