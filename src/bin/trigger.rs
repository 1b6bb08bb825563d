//! Scan trigger client
//!
//! Stands in for a badge reader: posts a scan request to a running
//! entry-guard and optionally waits for the verdict.
//!
//! Usage:
//!   cargo run --bin trigger                          # POST /scan on localhost
//!   cargo run --bin trigger -- --wait                # ...and print the verdict
//!   cargo run --bin trigger -- --url http://door-3:5055 --wait --timeout-secs 10

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "trigger")]
#[command(about = "Send a scan trigger to entry-guard")]
struct Args {
    /// Base URL of the entry-guard control endpoint
    #[arg(long, default_value = "http://127.0.0.1:5055")]
    url: String,

    /// Poll /status until the triggered scan closes
    #[arg(long)]
    wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    /// Status poll interval in milliseconds
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,
}

#[derive(Debug, Deserialize)]
struct LastResult {
    timestamp: u64,
    time: String,
    status: String,
    clip_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    scanning: bool,
    scans_completed: u64,
    last_result: Option<LastResult>,
}

async fn fetch_status(client: &reqwest::Client, base: &str) -> anyhow::Result<Status> {
    let status = client
        .get(format!("{base}/status"))
        .send()
        .await
        .context("GET /status failed")?
        .error_for_status()?
        .json::<Status>()
        .await
        .context("invalid /status body")?;
    Ok(status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let base = args.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    let before = if args.wait { Some(fetch_status(&client, &base).await?) } else { None };

    let response = client
        .post(format!("{base}/scan"))
        .send()
        .await
        .with_context(|| format!("POST {base}/scan failed"))?
        .error_for_status()?;
    println!("{}", response.text().await?);

    let Some(before) = before else {
        return Ok(());
    };
    if before.scanning {
        println!("note: a scan was already running; this trigger will be ignored");
    }

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    loop {
        tokio::time::sleep(Duration::from_millis(args.poll_ms)).await;
        let status = fetch_status(&client, &base).await?;

        if status.scans_completed > before.scans_completed && !status.scanning {
            if let Some(result) = status.last_result {
                println!(
                    "{} {} ({}){}",
                    result.status,
                    result.time,
                    result.timestamp,
                    result.clip_key.map(|c| format!(" clip={c}")).unwrap_or_default()
                );
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            bail!("no verdict within {}s", args.timeout_secs);
        }
    }
}
