// SPDX-License-Identifier: Apache-2.0

use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use tailstream::init::agent::Agent;
use tailstream::init::args::AgentRun;
use tailstream::init::wait;
use tailstream::listener::Listener;

/// Upper bound on the whole shutdown; the agent applies tighter limits itself
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "tailstream", version, about = "Stream log files to network clients")]
struct Cli {
    /// Log format
    #[arg(
        value_enum,
        long,
        global = true,
        env = "TAILSTREAM_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tail files and serve them to clients
    Start(Box<AgentRun>),

    /// Print the version
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let args = match cli.command {
        Command::Version => {
            println!("{}", version());
            return ExitCode::SUCCESS;
        }
        Command::Start(args) => args,
    };

    // A busy endpoint is reported before any logging is set up
    let listener = match Listener::listen_std(args.endpoint) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(1);
        }
    };

    let _guard = match init_logging(cli.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to set up logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(args, listener) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "tailstream exited with an error");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(args: Box<AgentRun>, listener: Listener) -> Result<(), BoxError> {
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    tasks.spawn(Agent::new(args, listener).run(cancel.clone()));

    select! {
        res = shutdown_signal() => {
            res?;
            info!("Shutdown signal received");
            cancel.cancel();
        },
        res = wait::wait_for_any_task(&mut tasks) => {
            res?;
            warn!("Agent exited before a shutdown signal");
        },
    }

    wait::wait_for_tasks_with_timeout(&mut tasks, SHUTDOWN_TIMEOUT).await
}

fn init_logging(format: LogFormat) -> Result<WorkerGuard, BoxError> {
    LogTracer::init()?;

    let (writer, guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("notify=warn".parse()?);

    match format {
        LogFormat::Json => {
            let name = format!("{}-{}", env!("CARGO_PKG_NAME"), version());
            let subscriber = Registry::default()
                .with(filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new(name, writer));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_ansi(std::io::stdout().is_terminal())
                .compact();
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
    }
    Ok(guard)
}

fn version() -> String {
    // BUILD_SHORT_SHA is set by release builds
    let build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");
    format!("{}-{}", env!("CARGO_PKG_VERSION"), build)
}

async fn shutdown_signal() -> Result<(), BoxError> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    select! {
        _ = term.recv() => {},
        _ = int.recv() => {},
    }
    Ok(())
}
