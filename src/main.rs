use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};
use modbus_poller::prelude::*;

/// Periodically reads holding registers from a Modbus TCP device
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Settings file holding the connection, poller and register sections
    #[clap(long, short)]
    config: PathBuf,

    /// Overrides the device host from the settings file
    #[clap(long)]
    host: Option<String>,

    /// Overrides the device port from the settings file
    #[clap(long)]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Print results as JSON lines instead of text
    #[clap(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &args.log_level),
    );

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let mut settings = Settings::load(&args.config)?;
    if let Some(host) = args.host {
        settings.connection.host = host;
    }
    if let Some(port) = args.port {
        settings.connection.port = port;
    }

    let client = Collector::connect(settings.connection).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal.cancel();
            }
            Err(err) => warn!("Unable to listen for interrupts: {err}"),
        }
    });

    let format = if args.json {
        LineFormat::Json
    } else {
        LineFormat::Text
    };
    let mut sink = LineSink::with_format(io::stdout(), format);

    let mut poller = Poller::new(client, settings.catalog, settings.poller);
    poller.run(&mut sink, &shutdown).await;

    info!("Stopped");
    Ok(())
}
