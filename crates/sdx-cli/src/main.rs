//! 🚀 sdx-cli: the front door of swapdex.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, runs one ingestion cycle, and prints what
//! happened to the alias. The real work lives in the `sdx` crate. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use sdx::RunSummary;
use sdx::progress::{format_duration, format_number};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🔀 Fill a fresh index generation from an NDJSON file and swap an alias onto it.
#[derive(Debug, Parser)]
#[command(name = "sdx", version, about)]
struct Cli {
    /// 📜 TOML config file. `SDX_*` environment variables are merged underneath.
    #[arg(default_value = "sdx.toml")]
    config: PathBuf,
}

/// 🍽️ The after-party table.
fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("🔀 swapdex"), Cell::new("")]);

    let list = |names: &[String]| {
        if names.is_empty() {
            "-".to_string()
        } else {
            names.join("\n")
        }
    };

    table.add_row(vec![Cell::new("alias"), Cell::new(&summary.alias)]);
    table.add_row(vec![Cell::new("generation"), Cell::new(&summary.generation)]);
    table.add_row(vec![
        Cell::new("documents read"),
        Cell::new(format_number(summary.documents_read)),
    ]);
    table.add_row(vec![
        Cell::new("indexed"),
        Cell::new(format_number(summary.writer.indexed)),
    ]);
    table.add_row(vec![
        Cell::new("failed"),
        Cell::new(format_number(summary.writer.failed)),
    ]);
    table.add_row(vec![
        Cell::new("bulk requests"),
        Cell::new(format_number(summary.writer.requests)),
    ]);
    table.add_row(vec![Cell::new("unbound"), Cell::new(list(&summary.unbound))]);
    table.add_row(vec![Cell::new("deleted"), Cell::new(list(&summary.deleted))]);
    if !summary.failure_samples.is_empty() {
        table.add_row(vec![
            Cell::new("first failures"),
            Cell::new(list(&summary.failure_samples)),
        ]);
    }
    table.add_row(vec![
        Cell::new("elapsed"),
        Cell::new(format_duration(summary.elapsed)),
    ]);
    table
}

/// 🕵️ Does anything in the chain smell like "the cluster isn't there"?
fn looks_like_connection_trouble(err: &anyhow::Error) -> bool {
    err.chain().skip(1).any(|cause| {
        let cause = cause.to_string();
        cause.contains("error sending request")
            || cause.contains("connection refused")
            || cause.contains("Connection refused")
            || cause.contains("tcp connect error")
            || cause.contains("dns error")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 a missing file means env-only config, not an error; figment decides if that's enough
    let config_file = cli.config.as_path();
    let config_file_which_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Could not check whether '{}' exists. If it's a relative path, try an absolute one.",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = sdx::app_config::load_config(config_file_which_exists)
        .context("💀 In sdx-cli, main, we couldn't load the config. Make sure the TOML has [backend], [source] and [generation].")?;

    match sdx::run(app_config).await {
        Ok(summary) => {
            println!("{}", summary_table(&summary));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            if looks_like_connection_trouble(&err) {
                error!(
                    "🔧 hint: looks like Elasticsearch isn't reachable. \
                    Check the [backend.Elasticsearch] url, and that the cluster is actually up. \
                    If you're using Docker, `docker ps` is your friend. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}
