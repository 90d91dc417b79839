//! rfxfer - File and sensor transfer over a narrowband radio link
//!
//! Moves a file, or a stream of accelerometer samples, between two nodes in
//! fixed 32-byte frames.

mod config;
mod protocol;
mod radio;
mod session;
mod stream;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Config, Invocation};
use protocol::TransferMode;
use radio::{LinkConfig, PipeAddresses, Radio, SimulatedLink, UdpRadio};
use session::{
    CancelReason, CancellationToken, RateMonitor, ReceiveOutcome, ReceiverSession, Role,
    SessionResult, TimerTick, TransmitOutcome, TransmitterSession,
};
use stream::{CsvSink, DataSource, FileSink, FileSource, FrameSink, SensorSource, SyntheticSensor};

/// Period of the transmitter's sequence_second clock
const SECOND: Duration = Duration::from_secs(1);

/// How long a simulation waits for the link to drain
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// rfxfer - Radio file transfer
#[derive(Parser)]
#[command(name = "rfxfer")]
#[command(version = "0.1.0")]
#[command(about = "Send a file or sensor samples over a point-to-point radio link", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show per-frame debug output
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    /// Hide everything but warnings
    #[arg(short = 'n', long, global = true, conflicts_with = "debug")]
    quiet: bool,

    /// Transmit this file
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Receive into this file
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Measure data reception rate (receiver only)
    #[arg(short, long)]
    measure: bool,

    #[command(flatten)]
    sensor: SensorArgs,

    /// Local UDP address of the link
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// UDP address of the other node
    #[arg(long)]
    peer: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Clone, Copy)]
struct SensorArgs {
    /// Transfer accelerometer samples instead of file bytes
    #[arg(long)]
    sensor: bool,

    /// Stop after this many samples
    #[arg(long, requires = "sensor")]
    samples: Option<u64>,
}

impl SensorArgs {
    /// `--sensor` wins over the configured mode
    fn mode(&self, configured: TransferMode) -> TransferMode {
        if self.sensor {
            TransferMode::Sensor
        } else {
            configured
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run both ends in-process over a simulated lossy link
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// File to transmit (file mode)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Where the receiver writes; discarded if not set
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Probability a send is lost
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Probability a delivered frame has a flipped bit
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,

    /// Link RNG seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Report reception rate
    #[arg(short, long)]
    measure: bool,

    #[command(flatten)]
    sensor: SensorArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Some(Commands::Config { generate, output }) => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Some(Commands::Simulate(args)) => {
            run_simulation(&config, args).await?;
        }
        None => {
            // Role errors are reported before any socket is bound
            let invocation = Invocation::resolve(cli.source, cli.dest, cli.measure)?;

            if let Some(bind) = cli.bind {
                config.radio.bind = bind;
            }
            if let Some(peer) = cli.peer {
                config.radio.peer = peer;
            }

            match invocation {
                Invocation::Transmit { source } => {
                    run_transmitter(&config, source, cli.sensor).await?;
                }
                Invocation::Receive { dest, measure } => {
                    run_receiver(&config, dest, measure, cli.sensor).await?;
                }
            }
        }
    }

    Ok(())
}

/// Run the transmitting node
async fn run_transmitter(
    config: &Config,
    source: PathBuf,
    sensor: SensorArgs,
) -> anyhow::Result<()> {
    let pipes = config.pipes.for_role(Role::Transmitter)?;
    let radio = open_udp_radio(config)?;

    let cancel = CancellationToken::new();
    let listener = spawn_interrupt_listener(
        vec![cancel.clone()],
        "Ctrl-c pressed! Ending transmission.",
    );

    let outcome = match sensor.mode(config.transfer.mode) {
        TransferMode::Sensor => {
            tracing::debug!("Sensor mode, not reading {}", source.display());
            let driver = SyntheticSensor::new(config.sensor.seed);
            let limit = sensor.samples.or(config.sensor.sample_limit);
            let source = SensorSource::new(driver, limit);
            transmit(config, radio, pipes, source, cancel.clone()).await
        }
        TransferMode::File => {
            let reader = BufReader::new(File::open(&source)?);
            tracing::info!("Sending {}", source.display());
            let source = FileSource::new(reader);
            transmit(config, radio, pipes, source, cancel.clone()).await
        }
    };

    cancel.cancel(CancelReason::Teardown);
    listener.await?;

    report_transmit(&outcome?);
    Ok(())
}

/// Run the receiving node
async fn run_receiver(
    config: &Config,
    dest: PathBuf,
    measure: bool,
    sensor: SensorArgs,
) -> anyhow::Result<()> {
    let pipes = config.pipes.for_role(Role::Receiver)?;
    let radio = open_udp_radio(config)?;
    let writer = BufWriter::new(File::create(&dest)?);

    let cancel = CancellationToken::new();
    let listener = spawn_interrupt_listener(
        vec![cancel.clone()],
        "Ctrl-c pressed! Ending transmission and truncating file.",
    );

    let mode = sensor.mode(config.transfer.mode);
    let outcome = match mode {
        TransferMode::Sensor => {
            let sink = CsvSink::new(writer);
            receive(config, radio, pipes, mode, sink, measure, cancel.clone()).await
        }
        TransferMode::File => {
            let sink = FileSink::new(writer);
            receive(config, radio, pipes, mode, sink, measure, cancel.clone()).await
        }
    };

    cancel.cancel(CancelReason::Teardown);
    listener.await?;

    report_receive(&outcome?);
    Ok(())
}

fn open_udp_radio(config: &Config) -> anyhow::Result<UdpRadio> {
    let radio = UdpRadio::bind(config.radio.bind, config.radio.peer, config.radio.channel)?
        .with_auto_ack(config.radio.auto_ack());
    tracing::info!("Radio listening on {}", radio.local_addr()?);
    radio.print_details();
    Ok(radio)
}

/// Drive a transmitter session on a blocking thread
async fn transmit<R, S>(
    config: &Config,
    radio: R,
    pipes: PipeAddresses,
    source: S,
    cancel: CancellationToken,
) -> anyhow::Result<TransmitOutcome>
where
    R: Radio + Send + 'static,
    S: DataSource + Send + 'static,
{
    let second_tick = TimerTick::new();
    let mut session =
        TransmitterSession::new(radio, pipes, source, cancel.clone(), second_tick.clone())?
            .with_retry(config.transfer.retry_policy())
            .with_handshake_idle(config.transfer.poll_idle());

    let ticker = spawn_ticker(second_tick, SECOND, cancel.clone());
    let outcome = run_blocking(move || session.run()).await;
    ticker.abort();
    outcome
}

/// Drive a receiver session on a blocking thread
async fn receive<R, K>(
    config: &Config,
    radio: R,
    pipes: PipeAddresses,
    mode: TransferMode,
    sink: K,
    measure: bool,
    cancel: CancellationToken,
) -> anyhow::Result<ReceiveOutcome>
where
    R: Radio + Send + 'static,
    K: FrameSink + Send + 'static,
{
    let mut session = ReceiverSession::new(radio, pipes, mode, sink, cancel.clone())?
        .with_poll_idle(config.transfer.poll_idle());

    let ticker = if measure {
        let monitor = RateMonitor::new(config.transfer.measure_seconds);
        let period = Duration::from_secs(u64::from(monitor.interval_seconds()));
        let tick = TimerTick::new();
        session = session.with_rate_monitor(monitor, tick.clone());
        Some(spawn_ticker(tick, period, cancel.clone()))
    } else {
        None
    };

    let outcome = run_blocking(move || session.run()).await;
    if let Some(ticker) = ticker {
        ticker.abort();
    }
    outcome
}

async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> SessionResult<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

/// Cancel every token on Ctrl-C; exits quietly once the first token is set
fn spawn_interrupt_listener(
    tokens: Vec<CancellationToken>,
    notice: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(first) = tokens.first().cloned() else {
            return;
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        tracing::warn!("{}", notice);
                        for token in &tokens {
                            token.cancel(CancelReason::User);
                        }
                    }
                    Err(e) => tracing::error!("Failed to listen for Ctrl-c: {}", e),
                }
            }
            _ = first.cancelled() => {}
        }
    })
}

/// Fire `tick` every `period` until `cancel` is set
fn spawn_ticker(tick: TimerTick, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = interval.tick() => tick.fire(),
                _ = cancel.cancelled() => break,
            }
        }
    })
}

/// Run both ends over a simulated link
async fn run_simulation(config: &Config, args: SimulateArgs) -> anyhow::Result<()> {
    let link = SimulatedLink::new(LinkConfig {
        loss_rate: args.loss,
        corrupt_rate: args.corrupt,
        seed: args.seed,
    });
    let tx_pipes = config.pipes.for_role(Role::Transmitter)?;
    let rx_pipes = config.pipes.for_role(Role::Receiver)?;

    let writer: Box<dyn Write + Send> = match &args.dest {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::sink()),
    };

    let sim = Simulation {
        config,
        link: &link,
        tx_pipes,
        rx_pipes,
        measure: args.measure,
    };

    let (tx, rx) = match args.sensor.mode(config.transfer.mode) {
        TransferMode::Sensor => {
            let driver = SyntheticSensor::new(config.sensor.seed);
            let limit = args.sensor.samples.or(config.sensor.sample_limit).unwrap_or(1000);
            sim.run(SensorSource::new(driver, Some(limit)), CsvSink::new(writer)).await?
        }
        TransferMode::File => {
            let Some(source) = &args.source else {
                anyhow::bail!("simulate needs --source <file> unless --sensor is given");
            };
            let reader = BufReader::new(File::open(source)?);
            sim.run(FileSource::new(reader), FileSink::new(writer)).await?
        }
    };

    let stats = link.stats();
    println!("\n========================================");
    println!("  Simulation Summary");
    println!("========================================");
    println!(
        "  Link: {} sent, {} lost, {} corrupted, {} delivered",
        stats.sent, stats.lost, stats.corrupted, stats.delivered
    );
    println!("========================================");
    report_transmit(&tx);
    report_receive(&rx);

    Ok(())
}

struct Simulation<'a> {
    config: &'a Config,
    link: &'a SimulatedLink,
    tx_pipes: PipeAddresses,
    rx_pipes: PipeAddresses,
    measure: bool,
}

impl Simulation<'_> {
    async fn run<S, K>(&self, source: S, sink: K) -> anyhow::Result<(TransmitOutcome, ReceiveOutcome)>
    where
        S: DataSource + Send + 'static,
        K: FrameSink + Send + 'static,
    {
        let tx_cancel = CancellationToken::new();
        let rx_cancel = CancellationToken::new();
        let listener = spawn_interrupt_listener(
            vec![rx_cancel.clone(), tx_cancel.clone()],
            "Ctrl-c pressed! Ending simulation.",
        );

        let receiver = {
            let config = self.config.clone();
            let radio = self.link.endpoint();
            let pipes = self.rx_pipes;
            let mode = source.mode();
            let measure = self.measure;
            let cancel = rx_cancel.clone();
            tokio::spawn(async move {
                receive(&config, radio, pipes, mode, sink, measure, cancel).await
            })
        };

        let radio = self.link.endpoint();
        let tx = transmit(self.config, radio, self.tx_pipes, source, tx_cancel.clone()).await;

        // Let the receiver drain what is still queued, then tear it down
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while self.link.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        rx_cancel.cancel(CancelReason::Teardown);
        tx_cancel.cancel(CancelReason::Teardown);

        let rx = receiver.await?;
        listener.await?;
        Ok((tx?, rx?))
    }
}

fn report_transmit(outcome: &TransmitOutcome) {
    match outcome {
        TransmitOutcome::Complete(stats) | TransmitOutcome::Cancelled(stats) => {
            let verdict = if matches!(outcome, TransmitOutcome::Complete(_)) {
                "complete"
            } else {
                "cancelled"
            };
            println!(
                "Transmitter {}: {} frames ({} bytes) sent, {} retries, {} dropped",
                verdict, stats.frames_sent, stats.bytes_sent, stats.retries, stats.frames_dropped
            );
        }
        TransmitOutcome::HandshakeCancelled => {
            println!("Transmitter cancelled before a connection was established");
        }
    }
}

fn report_receive(outcome: &ReceiveOutcome) {
    match outcome {
        ReceiveOutcome::Complete(stats) | ReceiveOutcome::Truncated(stats) => {
            let verdict = if matches!(outcome, ReceiveOutcome::Complete(_)) {
                "complete"
            } else {
                "truncated by user"
            };
            println!(
                "Receiver {}: {} frames accepted, {} rejected, {} bytes written",
                verdict, stats.frames_accepted, stats.frames_rejected, stats.bytes_written
            );
        }
        ReceiveOutcome::HandshakeCancelled => {
            println!("Receiver cancelled before the transfer began");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_receiver_flags() {
        let cli = Cli::try_parse_from(["rfxfer", "-d", "out.bin", "-m", "-n"]).unwrap();
        assert_eq!(cli.dest, Some(PathBuf::from("out.bin")));
        assert!(cli.measure);
        assert!(cli.quiet);
        assert!(cli.command.is_none());
        assert_eq!(cli.sensor.mode(TransferMode::File), TransferMode::File);
        assert_eq!(cli.sensor.mode(TransferMode::Sensor), TransferMode::Sensor);
    }

    #[test]
    fn test_parse_sensor_and_peer() {
        let cli = Cli::try_parse_from([
            "rfxfer", "-s", "x", "--sensor", "--samples", "10", "--peer", "10.0.0.2:9000",
        ])
        .unwrap();
        assert_eq!(cli.sensor.mode(TransferMode::File), TransferMode::Sensor);
        assert_eq!(cli.sensor.samples, Some(10));
        assert_eq!(cli.peer, Some("10.0.0.2:9000".parse().unwrap()));
    }

    #[test]
    fn test_quiet_conflicts_with_debug() {
        assert!(Cli::try_parse_from(["rfxfer", "-d", "o", "-n", "-D"]).is_err());
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "rfxfer", "simulate", "--sensor", "--loss", "0.1", "--seed", "7",
        ])
        .unwrap();
        let Some(Commands::Simulate(args)) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.loss, 0.1);
        assert_eq!(args.seed, 7);
        assert!(args.sensor.sensor);
    }

    #[tokio::test]
    async fn test_simulated_file_transfer() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(&data).unwrap();
        let dest = tempfile::NamedTempFile::new().unwrap();

        let mut config = Config::default();
        config.transfer.poll_idle_us = 0;
        let link = SimulatedLink::new(LinkConfig::perfect(1));
        let sim = Simulation {
            config: &config,
            link: &link,
            tx_pipes: config.pipes.for_role(Role::Transmitter).unwrap(),
            rx_pipes: config.pipes.for_role(Role::Receiver).unwrap(),
            measure: false,
        };

        let reader = BufReader::new(File::open(source.path()).unwrap());
        let writer = File::create(dest.path()).unwrap();
        let (tx, rx) = sim
            .run(FileSource::new(reader), FileSink::new(writer))
            .await
            .unwrap();

        assert!(matches!(tx, TransmitOutcome::Complete(s) if s.bytes_sent == 1000));
        assert!(matches!(rx, ReceiveOutcome::Complete(s) if s.bytes_written == 1000));
        assert_eq!(std::fs::read(dest.path()).unwrap(), data);
        assert_eq!(link.stats().lost, 0);
    }
}
