//! `loramote` command line.
//!
//! # Usage
//!
//! ```bash
//! loramote adr -r 0 -t 10 --confirmed
//! loramote ddr -t 30 --lat 50.878512 --lon 4.700123
//! loramote gateway
//! loramote config
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use loramote::config::{self, Config};
use loramote::gateway;
use loramote::logger::LogFacade;
use loramote::mac::{MacDevice, Rn2483};
use loramote::modes::{run_test, Mode, TestRun};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Field-trial harness for LoRaWAN end devices
#[derive(Parser, Debug)]
#[command(name = "loramote", version, about, long_about = None)]
struct Cli {
    /// Configuration file (default ~/.loramote/config.json)
    #[arg(long, env = "LORAMOTE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Test the network's ADR algorithm
    Adr(AdrArgs),
    /// Test device-driven data rate negotiation
    Ddr(DdrArgs),
    /// Listen for raw LoRa packets on one channel
    Gateway,
    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Initial data rate (0 = SF12 .. 5 = SF7)
    #[arg(short = 'r', long = "datarate", default_value_t = 0)]
    data_rate: u8,

    /// Run length in minutes
    #[arg(short, long, default_value_t = 10)]
    timeout: u32,
}

#[derive(Args, Debug)]
struct AdrArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Use confirmed uplinks
    #[arg(short, long)]
    confirmed: bool,
}

#[derive(Args, Debug)]
struct DdrArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Device latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    /// Device longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::default_config_path().unwrap_or_else(|e| exit_with(e)),
    };
    let config = Config::load(&path).unwrap_or_else(|e| exit_with(e));

    match cli.command {
        Command::Adr(args) => {
            let mode = Mode::Adr {
                confirmed: args.confirmed,
            };
            run_mode(&config, mode, &args.run).await;
        }
        Command::Ddr(args) => {
            let location = config::location(args.lat, args.lon).unwrap_or_else(|e| exit_with(e));
            run_mode(&config, Mode::Ddr { location }, &args.run).await;
        }
        Command::Gateway => listen(&config).await,
        Command::Config => match config.to_redacted_json() {
            Ok(json) => println!("{}", json),
            Err(e) => exit_with(e),
        },
    }
}

async fn run_mode(config: &Config, mode: Mode, args: &RunArgs) {
    let data_rate = config::data_rate(args.data_rate).unwrap_or_else(|e| exit_with(e));
    let bootstrap = config.bootstrap(data_rate).unwrap_or_else(|e| exit_with(e));
    let mote = open_mote(config);

    let run = TestRun::new(mode, data_rate, args.timeout);
    match run_test(mote, bootstrap, &run, LogFacade::shared("loramote")).await {
        Ok(summary) => info!(
            "run finished frames={} failed={} downlinks={}",
            summary.frames_sent, summary.failed_uplinks, summary.downlinks
        ),
        Err(e) => exit_with(e),
    }
}

async fn listen(config: &Config) {
    config
        .gateway
        .validate()
        .unwrap_or_else(|e| exit_with(e));

    let mut mote = open_mote(config);
    if let Err(e) = mote.connect() {
        exit_with(e);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping");
            on_signal.cancel();
        }
    });

    info!(
        "Listening (Ctrl+C to exit, the current receive window ends within {} ms)...",
        gateway::RECEIVE_WATCHDOG_MS
    );
    if let Err(e) = gateway::listen(
        mote,
        &config.gateway,
        LogFacade::shared("loramote::gateway"),
        cancel,
    )
    .await
    {
        exit_with(e);
    }
}

fn open_mote(config: &Config) -> Rn2483<Box<dyn serialport::SerialPort>> {
    let port = config.serial_port().unwrap_or_else(|e| exit_with(e));
    info!("Using serial port {} at {} baud", port, config.mote.baud);
    Rn2483::open(
        &port,
        config.mote.baud,
        config.read_timeout(),
        LogFacade::shared("loramote::rn2483"),
    )
    .unwrap_or_else(|e| exit_with(format_args!("cannot open {}: {}", port, e)))
}

fn exit_with(reason: impl fmt::Display) -> ! {
    error!("{}", reason);
    std::process::exit(1);
}
