use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use repofeed::app::Service;
use repofeed::config::Config;
use repofeed::intake::{IntakeError, IntakeStatus, Receipt};

/// Default config location (~/.config/repofeed/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("repofeed")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(name = "repofeed", about = "Publish packages into reconciled Atom feeds")]
struct Args {
    /// Config file (defaults to ~/.config/repofeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a package file into a feed
    Put {
        #[arg(long)]
        feed: String,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Download a package by URL and add it to a feed
    Add {
        #[arg(long)]
        feed: String,
        #[arg(long, value_name = "URL")]
        location: String,
    },
    /// Drop dead links and unreachable entries from a feed
    Validate {
        #[arg(long)]
        feed: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let service = Service::from_config(&config).context("Failed to start service")?;
    let pipeline = &service.pipeline;

    let status = match args.command {
        Command::Put { feed, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let result = pipeline.upload(&feed, &bytes).await;
            report(&result);
            IntakeStatus::of(&result)
        }
        Command::Add { feed, location } => {
            let result = pipeline.add_from_url(&feed, &location).await;
            report(&result);
            IntakeStatus::of(&result)
        }
        Command::Validate { feed } => {
            let result = pipeline.validate(&feed).await;
            match &result {
                Ok(validated) => {
                    for name in &validated.dropped {
                        println!("dropped {name}");
                    }
                    println!("kept {} entries in '{}'", validated.kept, validated.feed);
                }
                Err(e) => eprintln!("Error: {e}"),
            }
            IntakeStatus::of(&result)
        }
    };

    println!("{}", status.status_code());
    Ok(match status {
        IntakeStatus::Success => ExitCode::SUCCESS,
        IntakeStatus::ClientError => ExitCode::from(2),
        IntakeStatus::Failed => ExitCode::from(1),
    })
}

fn report(result: &Result<Receipt, IntakeError>) {
    match result {
        Ok(receipt) => {
            println!("{} -> {}", receipt.package, receipt.location);
            for name in &receipt.reconcile.migrated {
                println!("archived {name}");
            }
        }
        Err(e) => eprintln!("Error: {e}"),
    }
}
