//! Carbide CLI
//!
//! Command-line front end for the query engine: resolve namespace
//! patterns and evaluate targets against the backends defined in a
//! configuration file.

use anyhow::{bail, Context as _};
use carbide::functions::{parse_time_offset, FunctionRegistry};
use carbide::query::{evaluate_targets, paths_from_target, RequestContext};
use carbide::{EngineConfig, Node};
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "carbide", version, about = "Time-series query engine")]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a namespace pattern to branch and leaf nodes
    Find {
        /// Pattern like `servers.*.cpu`
        pattern: String,
    },
    /// Show the path expressions a target references
    Paths {
        /// A query-language target string
        target: String,
    },
    /// Evaluate one or more targets and print the resulting series
    Eval {
        /// Query-language target strings
        #[arg(required = true)]
        targets: Vec<String>,

        /// Window start: `now`, a relative offset like `-1h`, or an
        /// epoch timestamp
        #[arg(long, default_value = "-1h")]
        from: String,

        /// Window end
        #[arg(long, default_value = "now")]
        until: String,

        /// Template binding overrides, as `name=value`
        #[arg(long = "template", value_name = "NAME=VALUE")]
        template: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_path);
    let config = if config_path.exists() {
        EngineConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else if cli.config.is_some() {
        bail!("configuration file {} not found", config_path.display());
    } else {
        EngineConfig::default()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(config.build_store()?);
    let functions = Arc::new(FunctionRegistry::with_builtins());

    match cli.command {
        Command::Find { pattern } => {
            for node in store.find(&pattern, None, None).await? {
                match node {
                    Node::Branch(branch) => println!("{} (branch)", branch.path),
                    Node::Leaf(leaf) => println!("{} (leaf)", leaf.path),
                }
            }
        }
        Command::Paths { target } => {
            let now = Utc::now();
            let ctx = RequestContext::new(store, functions, now - Duration::hours(1), now);
            for path in paths_from_target(&ctx, &target)? {
                println!("{}", path);
            }
        }
        Command::Eval {
            targets,
            from,
            until,
            template,
        } => {
            let now = Utc::now();
            let start = parse_time(&from, now)?;
            let end = parse_time(&until, now)?;
            if start >= end {
                bail!("window start must precede its end");
            }

            let ctx = RequestContext::new(store, functions, start, end)
                .with_now(now)
                .with_template(parse_template_overrides(&template)?);

            let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
            let series_list = evaluate_targets(&ctx, &target_refs).await?;

            tracing::info!(
                targets = targets.len(),
                series = series_list.len(),
                "evaluation complete"
            );
            for series in series_list {
                println!(
                    "{} [start={} end={} step={}]",
                    series.name, series.start, series.end, series.step
                );
                let rendered: Vec<String> = series
                    .values
                    .iter()
                    .map(|v| match v {
                        Some(v) => format!("{}", v),
                        None => "null".to_string(),
                    })
                    .collect();
                println!("  {}", rendered.join(" "));
            }
        }
    }

    Ok(())
}

/// `now`, a relative offset like `-1h`, or an epoch timestamp.
fn parse_time(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if input == "now" {
        return Ok(now);
    }
    if let Ok(epoch) = input.parse::<i64>() {
        if input.starts_with('-') || input.starts_with('+') {
            return Ok(now + Duration::seconds(epoch));
        }
        return Utc
            .timestamp_opt(epoch, 0)
            .single()
            .with_context(|| format!("invalid epoch timestamp '{}'", input));
    }
    let offset = parse_time_offset(input)?;
    Ok(now + Duration::seconds(offset))
}

fn parse_template_overrides(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                overrides.insert(name.to_string(), value.to_string());
            }
            _ => bail!("template override '{}' is not of the form NAME=VALUE", pair),
        }
    }
    Ok(overrides)
}
