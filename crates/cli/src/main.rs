//! kilnctl - command-line interface for the Kiln job engine

mod rpc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rpc::call_rpc;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9640";

#[derive(Parser)]
#[command(name = "kilnctl")]
#[command(about = "Kiln job engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "KILN_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job
    Create {
        /// Workflow name (e.g., face_swap, comfyui_portrait)
        workflow: String,

        /// Input as JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// URL notified when the job finishes
        #[arg(short, long)]
        callback_url: Option<String>,
    },

    /// Show a job
    Get {
        /// Job ID
        job_id: String,

        /// Poll until the job is COMPLETED or FAILED
        #[arg(short, long)]
        wait: bool,
    },

    /// Show queue statistics
    Status,
}

#[derive(Deserialize, Tabled)]
struct CreatedRow {
    job_id: String,
    status: String,
    workflow: String,
}

#[derive(Deserialize, Tabled)]
struct JobRow {
    job_id: String,
    workflow: String,
    status: String,
    attempts: i64,
    #[tabled(display_with = "display_opt")]
    created_at: Option<String>,
    #[tabled(display_with = "display_opt")]
    finished_at: Option<String>,
}

fn display_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "COMPLETED" | "FAILED")
}

fn print_job(job: &serde_json::Value) -> Result<()> {
    let row: JobRow = serde_json::from_value(job.clone()).context("Unexpected job shape")?;
    let status = row.status.clone();
    println!("{}", Table::new(vec![row]));

    match status.as_str() {
        "COMPLETED" => {
            println!("{}", "✓ Completed".green().bold());
            if let Some(urls) = job["output"]["urls"].as_array() {
                for url in urls {
                    println!("  {} {}", "•".bold(), url.as_str().unwrap_or_default());
                }
            }
        }
        "FAILED" => {
            let error = &job["error"];
            println!(
                "{} {} {}",
                "✗ Failed:".red().bold(),
                error["kind"].as_str().unwrap_or("?"),
                error["code"]
                    .as_str()
                    .map(|c| format!("({})", c))
                    .unwrap_or_default()
            );
            println!("  {}", error["message"].as_str().unwrap_or_default());
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            workflow,
            input,
            callback_url,
        } => {
            let input_json: serde_json::Value =
                serde_json::from_str(&input).context("Invalid JSON input")?;

            let params = json!({
                "workflow": workflow,
                "input": input_json,
                "callback_url": callback_url,
            });

            let result = call_rpc(&cli.rpc_url, "job.create.v1", params).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let created: CreatedRow = serde_json::from_value(result)?;
            println!("{}", "✓ Job created".green().bold());
            println!();
            println!("{}", Table::new(vec![created]));
        }

        Commands::Get { job_id, wait } => {
            let params = json!({ "job_id": job_id });
            let mut job = call_rpc(&cli.rpc_url, "job.get.v1", params.clone()).await?;

            while wait && !is_terminal(job["status"].as_str().unwrap_or_default()) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                job = call_rpc(&cli.rpc_url, "job.get.v1", params.clone()).await?;
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job)?;
            }
        }

        Commands::Status => match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
            Ok(stats) if cli.json => println!("{}", serde_json::to_string_pretty(&stats)?),
            Ok(stats) => {
                println!("{}", "Kiln Status".cyan().bold());
                println!();
                println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                println!("  {} {}", "Status:".bold(), "ONLINE".green());
                println!("  {} {}", "Version:".bold(), stats["version"].as_str().unwrap_or("?"));
                println!();
                println!("  {} {}", "Total Jobs:".bold(), stats["total"]);
                println!("  {} {}", "Pending:".bold(), stats["pending"]);
                println!("  {} {}", "Claimed:".bold(), stats["claimed"]);
                println!("  {} {}", "Processing:".bold(), stats["processing"]);
                println!("  {} {}", "Completed:".bold(), stats["completed"]);
                println!("  {} {}", "Failed:".bold(), stats["failed"]);
                println!();
                println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
            }
            Err(e) => {
                println!("  {} {}", "Status:".bold(), "ERROR".red());
                println!("  {} {}", "Error:".bold(), e);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_create() {
        let cli = Cli::try_parse_from([
            "kilnctl",
            "create",
            "face_swap",
            "--input",
            r#"{"source_url":"https://a/s.jpg"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Create { workflow, input, callback_url } => {
                assert_eq!(workflow, "face_swap");
                assert!(input.contains("source_url"));
                assert!(callback_url.is_none());
            }
            _ => panic!("expected create"),
        }
        assert_eq!(cli.rpc_url, DEFAULT_RPC_URL);
    }

    #[test]
    fn test_job_row_from_rpc_shape() {
        let job = json!({
            "job_id": "j1", "workflow": "face_swap", "status": "FAILED", "attempts": 1,
            "input": {}, "created_at": "2024-01-01T00:00:00.000Z", "finished_at": null,
            "error": {"kind": "ProcessorError", "code": "engine_rejected", "message": "no face"}
        });
        let row: JobRow = serde_json::from_value(job).unwrap();
        assert_eq!(display_opt(&row.finished_at), "-");
        assert!(is_terminal(&row.status));
    }
}
