use btle_exporter::app::{self, Options, RealScanner, RunError};
use btle_exporter::metrics::{self, Metrics};
use btle_exporter::pidfile::PidFile;
use clap::Parser;
use log::{error, info};
use std::panic::{self, PanicHookInfo};
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

async fn run(options: Options) -> Result<(), RunError> {
    // Removed on every return path, including signal shutdown.
    let _pidfile = options.pidfile.as_deref().map(PidFile::create).transpose()?;

    let metrics = Metrics::new()?;
    let responder = if options.no_metrics {
        None
    } else {
        let listener = metrics::bind(options.metrics_listen).await?;
        let metrics = metrics.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = metrics::serve(listener, metrics).await {
                error!("{e}");
            }
        }))
    };

    let result = tokio::select! {
        result = app::run(&options, &RealScanner, metrics) => result,
        signal = shutdown_signal() => {
            info!("received {}, shutting down", signal?);
            Ok(())
        }
    };

    if let Some(responder) = responder {
        responder.abort();
    }
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.debug);
    info!(
        "{} version {} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let code = match run(options).await {
        Ok(()) => EXIT_SUCCESS,
        Err(why) => {
            error!("error: {}", why);
            EXIT_ERROR
        }
    };
    info!("quit");
    std::process::exit(code);
}
