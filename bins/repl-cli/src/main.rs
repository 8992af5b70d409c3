//! Command-line entry point: streams the tables of `source_db` into
//! `target_db`, picking up host/credential configuration from an optional
//! config file and `REPL_`-prefixed environment variables.
//!
//! ```bash
//! repl-cli Orders orders_analytics
//! repl-cli Orders orders_analytics Customers,Invoices
//! repl-cli Orders orders_analytics Customers,Invoices 500000 stg_
//! RUST_LOG=debug repl-cli Orders orders_analytics -- false CustomerId
//! ```

use std::process::ExitCode;

use clap::Parser;
use repl_core::ReplConfig;
use repl_source::{SourceAdapter, SqlServerSource};
use repl_target::{ClickHouseTarget, TargetAdapter};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "repl-cli")]
#[command(about = "Non-invasive incremental replication: SQL Server to ClickHouse")]
struct Args {
    /// Source database name, overriding configuration.
    source_db: String,
    /// Target database name, overriding configuration.
    target_db: String,
    /// Comma-separated list of tables to replicate; all tables if omitted.
    tables: Option<String>,
    /// Either `max_rows_per_table` (if it parses as an integer) or
    /// `target_table_prefix` (otherwise).
    max_rows_or_prefix: Option<String>,
    /// `target_table_prefix`, only meaningful when the prior argument was a
    /// row limit.
    prefix_if_prior_was_number: Option<String>,
    /// Overrides `incremental` (`true`/`false`).
    incremental_bool: Option<String>,
    /// Overrides `preferred_identity_column`.
    identity_column: Option<String>,

    /// Optional config file (TOML/YAML/JSON, resolved by the `config` crate).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let overrides = build_overrides(&args)?;
    let config = ReplConfig::load(args.config.as_deref(), overrides)?;

    let source_handle = SqlServerSource::open(&config.source).await?;
    let mut source = SqlServerSource::new(source_handle);
    let target_handle = ClickHouseTarget::open(&config.target).await?;
    let target = ClickHouseTarget::new(target_handle);

    let cancel = CancellationToken::new();
    let c_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, finishing the current chunk then stopping");
        c_signal.cancel();
    });

    let summary = repl_engine::run(&mut source, &target, &config, &cancel).await?;
    signal_task.abort();

    for result in &summary.results {
        match result {
            repl_engine::TableResult::Ok { table, rows, columns, strategy, degraded, .. } => {
                tracing::info!(%table, rows, columns, strategy, degraded, "OK");
            }
            repl_engine::TableResult::Err { table, reason } => {
                tracing::warn!(%table, reason, "ERROR");
            }
        }
    }
    tracing::info!(
        tables_ok = summary.tables_ok,
        tables_failed = summary.tables_failed,
        rows_total = summary.rows_total,
        duration = ?summary.duration,
        "run summary"
    );

    Ok(if summary.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Waits for Ctrl-C or, on unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

/// Resolve the ambiguous 4th/5th positional pair: if the 4th parses as an
/// integer it's `max_rows_per_table` and the 5th (if present) is the table
/// prefix; otherwise the 4th itself is the prefix and there is no 5th.
fn build_overrides(args: &Args) -> anyhow::Result<config::Config> {
    let mut builder = config::Config::builder()
        .set_override("source_database", args.source_db.clone())?
        .set_override("target_database", args.target_db.clone())?;

    if let Some(tables) = &args.tables {
        let list: Vec<String> = tables.split(',').map(|s| s.trim().to_string()).collect();
        builder = builder.set_override("tables_filter", list)?;
    }

    if let Some(raw) = &args.max_rows_or_prefix {
        if let Ok(max_rows) = raw.parse::<u64>() {
            builder = builder.set_override("max_rows_per_table", max_rows)?;
            if let Some(prefix) = &args.prefix_if_prior_was_number {
                builder = builder.set_override("target_table_prefix", prefix.clone())?;
            }
        } else {
            builder = builder.set_override("target_table_prefix", raw.clone())?;
        }
    }

    if let Some(flag) = &args.incremental_bool {
        let parsed: bool = flag.parse().unwrap_or(true);
        builder = builder.set_override("incremental", parsed)?;
    }

    if let Some(identity) = &args.identity_column {
        builder = builder.set_override("preferred_identity_column", identity.clone())?;
    }

    Ok(builder.build()?)
}
