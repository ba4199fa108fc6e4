//! wpfleet: run a WordPress fleet backend, or manage its sites.

mod cli;
mod commands;
mod error;
mod output;

use std::time::Duration;

use clap::{CommandFactory, Parser};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use wpfleet_config as config;
use wpfleet_core::SyncClient;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(error::exit_code::GENERAL);
        }
    };

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Install the subscriber. Logs go to stderr; `serve --log-dir` adds a
/// daily-rotated JSON file whose writer must outlive `main`.
fn init_tracing(cli: &Cli) -> Result<Option<WorkerGuard>, CliError> {
    let (serving, log_format, log_dir) = match &cli.command {
        Command::Serve(args) => (true, args.log_format, args.log_dir.clone()),
        _ => (false, LogFormat::Text, None),
    };

    let base: u8 = u8::from(serving);
    let level = match base.saturating_add(cli.global.verbose) {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "wpfleet={level},wpfleet_core={level},wpfleet_api={level},\
                 wpfleet_server={level},tower_http={level}"
            ))
        })
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    layers.push(match log_format {
        LogFormat::Text => stderr.with_filter(filter()).boxed(),
        LogFormat::Json => stderr.json().with_filter(filter()).boxed(),
    });

    let mut guard = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "wpfleet.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter())
                .boxed(),
        );
        guard = Some(worker);
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(guard)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "wpfleet", &mut std::io::stdout());
            Ok(())
        }

        Command::Config(args) => commands::config_cmd::handle(&args, &global),

        Command::Serve(args) => {
            let cfg = config::load_config(global.config.as_deref())?;
            commands::serve::handle(cfg, &args, &global).await
        }

        Command::Sites(args) => {
            let cfg = config::load_config(global.config.as_deref())?;
            let sync = cfg.sync_config(
                global.api_url.as_deref(),
                global.timeout.map(Duration::from_secs),
            )?;
            let client = SyncClient::new(sync)?;
            let result = commands::sites::handle(&client, args, &global).await;
            client.shutdown().await;
            result
        }
    }
}
