//! ivaldi - field telemetry client.
//!
//! Subcommands:
//!   ivaldi monitor 26               # sample the rain gauge on GPIO 26, print to terminal
//!   ivaldi send 26 --frequency 0.5  # sample and transmit frames over the serial link
//!   ivaldi receive --log            # decode frames from the serial link and print them
//!
//! Every subcommand stops cleanly on SIGINT, SIGTERM or SIGHUP.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ivaldi::cancel::{CancellationToken, install_signal_handler};
use ivaldi::codec::FrameReader;
use ivaldi::counter::{Anemometer, CounterProfile, EdgeCounter, RainGauge};
use ivaldi::gpio::{DEFAULT_POLL_INTERVAL, SysfsPin, spawn_edge_watcher};
use ivaldi::link::{
    DEFAULT_BAUD_RATE, DEFAULT_RECEIVE_DEVICE, DEFAULT_SEND_DEVICE, LinkReceiver,
    SerialSettings, send_record,
};
use ivaldi::output::{CsvSink, DisplayMode, Printer};
use ivaldi::record::Record;
use ivaldi::schedule::ScheduleSpec;
use ivaldi::scheduler::Scheduler;
use ivaldi::schema::{BUILTIN, Schema};
use ivaldi::station::Station;

/// Timestamp retention for edge counters; longer than any window queried.
const COUNTER_HISTORY: Duration = Duration::from_secs(3600);

/// Lightweight client for monitoring field sensors.
#[derive(Parser)]
#[command(name = "ivaldi", about = "Field telemetry client", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Sample the sensors and print to the terminal.
    Monitor(SampleArgs),
    /// Sample the sensors and transmit frames over the serial link.
    Send {
        #[command(flatten)]
        sample: SampleArgs,

        #[command(flatten)]
        serial: SerialArgs,
    },
    /// Receive frames from the serial link and print them.
    Receive {
        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        serial: SerialArgs,

        /// Wire schema to decode (final, station, rain).
        #[arg(long, default_value = "final", value_parser = parse_schema)]
        schema: &'static Schema,
    },
}

#[derive(Args)]
struct SampleArgs {
    /// GPIO pin of the rain gauge, in BCM numbering.
    pin: u32,

    /// GPIO pin of the anemometer, in BCM numbering.
    #[arg(long, value_name = "PIN")]
    wind_pin: Option<u32>,

    /// ADC channel (0-3) of the wind direction vane.
    #[arg(long, value_name = "CHANNEL")]
    channel_wind: Option<u8>,

    /// ADC channel (0-3) of the soil moisture probe.
    #[arg(long, value_name = "CHANNEL")]
    channel_soil: Option<u8>,

    /// Average the rain rate over this trailing window instead of the whole run.
    #[arg(long, value_name = "SECONDS")]
    rain_window_s: Option<f64>,

    /// Wire schema to sample (final, station, rain).
    #[arg(long, default_value = "final", value_parser = parse_schema)]
    schema: &'static Schema,

    #[command(flatten)]
    cadence: CadenceArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct CadenceArgs {
    /// Sampling period in seconds (default: 1).
    #[arg(long, value_name = "SECONDS", conflicts_with = "frequency")]
    period_s: Option<f64>,

    /// Sampling frequency in Hz; 0 samples as fast as the sleep floor allows.
    #[arg(long, value_name = "HZ")]
    frequency: Option<f64>,
}

#[derive(Args)]
struct OutputArgs {
    /// Print every sample on a new line instead of updating one line.
    #[arg(long)]
    log: bool,

    /// Print every sample as a JSON object on its own line.
    #[arg(long, conflicts_with = "log")]
    json: bool,

    /// Append samples to this CSV file.
    #[arg(long, value_name = "PATH")]
    output_path: Option<String>,
}

#[derive(Args)]
struct SerialArgs {
    /// Serial device (default: /dev/ttyAMA0 for send, /dev/ttyAMA1 for receive).
    #[arg(long, value_name = "PATH", env = "IVALDI_SERIAL_DEVICE")]
    serial_device: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud_rate: u32,

    /// Serial read timeout in milliseconds.
    #[arg(long, default_value = "1000")]
    read_timeout_ms: u64,
}

impl SerialArgs {
    fn settings(&self, default_device: &str) -> SerialSettings {
        let device = self.serial_device.as_deref().unwrap_or(default_device);
        SerialSettings::new(device)
            .with_baud_rate(self.baud_rate)
            .with_timeout(Duration::from_millis(self.read_timeout_ms))
    }
}

fn parse_schema(name: &str) -> Result<&'static Schema, String> {
    Schema::by_name(name).ok_or_else(|| {
        let known: Vec<&str> = BUILTIN.iter().map(|s| s.name).collect();
        format!("unknown schema '{}' (expected one of: {})", name, known.join(", "))
    })
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so they do not mix with the sample line on stdout.
fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("ivaldi={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Terminal and CSV destinations for decoded or sampled records.
struct Outputs<W: Write = Stdout> {
    printer: Option<Printer<W>>,
    csv: Option<CsvSink<std::fs::File>>,
}

impl Outputs {
    fn open(args: &OutputArgs, print: bool) -> Result<Self> {
        let mode = if args.json {
            DisplayMode::Json
        } else if args.log {
            DisplayMode::Log
        } else {
            DisplayMode::Status
        };
        let csv = match &args.output_path {
            Some(path) => {
                info!("Appending samples to {}", path);
                Some(
                    CsvSink::append(path)
                        .with_context(|| format!("failed to open output file {}", path))?,
                )
            }
            None => None,
        };
        Ok(Self {
            printer: print.then(|| Printer::new(io::stdout(), mode)),
            csv,
        })
    }

}

impl<W: Write> Outputs<W> {
    fn emit(&mut self, record: &Record) {
        if let Some(printer) = self.printer.as_mut()
            && let Err(e) = printer.print(record)
        {
            debug!("Failed to print sample: {}", e);
        }
        if let Some(csv) = self.csv.as_mut()
            && let Err(e) = csv.write_record(record)
        {
            error!("Failed to write CSV row: {}", e);
        }
    }

    fn finish(&mut self) {
        if let Some(printer) = self.printer.as_mut()
            && let Err(e) = printer.finish()
        {
            debug!("Failed to finish terminal output: {}", e);
        }
    }
}

fn setup_cancellation() -> CancellationToken {
    let cancel = CancellationToken::new();
    if let Err(e) = install_signal_handler(cancel.clone()) {
        warn!("Failed to set signal handler: {}", e);
    }
    cancel
}

/// Wires counters to their GPIO pins and builds the station.
fn setup_station(args: &SampleArgs, cancel: &CancellationToken) -> Result<Station> {
    let rain_counter = Arc::new(
        EdgeCounter::monotonic(CounterProfile::RAIN_GAUGE).with_history_horizon(COUNTER_HISTORY),
    );
    spawn_edge_watcher(
        SysfsPin::new(args.pin),
        rain_counter.clone(),
        true,
        DEFAULT_POLL_INTERVAL,
        cancel.clone(),
    )
    .context("failed to start rain gauge watcher")?;
    info!("Rain gauge: GPIO {}", args.pin);

    let mut station = Station::new(args.schema, RainGauge::new(rain_counter));

    if let Some(pin) = args.wind_pin {
        let wind_counter = Arc::new(
            EdgeCounter::monotonic(CounterProfile::ANEMOMETER)
                .with_history_horizon(COUNTER_HISTORY),
        );
        spawn_edge_watcher(
            SysfsPin::new(pin),
            wind_counter.clone(),
            true,
            DEFAULT_POLL_INTERVAL,
            cancel.clone(),
        )
        .context("failed to start anemometer watcher")?;
        info!("Anemometer: GPIO {}", pin);
        station = station.with_wind(Anemometer::new(wind_counter));
    }

    if args.channel_wind.is_some() || args.channel_soil.is_some() {
        warn!(
            "ADC channels configured (wind={:?}, soil={:?}) but no ADC driver is available; \
             analog fields are reported as NaN",
            args.channel_wind, args.channel_soil
        );
    }

    if let Some(window) = args.rain_window_s {
        if !window.is_finite() || window <= 0.0 {
            bail!("--rain-window-s must be a positive number of seconds");
        }
        station = station.with_rain_rate_window(window);
    }

    Ok(station)
}

fn cadence(args: &CadenceArgs) -> Result<ScheduleSpec> {
    ScheduleSpec::from_options(args.period_s, args.frequency).context("invalid sampling cadence")
}

fn monitor(args: SampleArgs) -> Result<()> {
    let cancel = setup_cancellation();
    let spec = cadence(&args.cadence)?;
    let mut station = setup_station(&args, &cancel)?;
    let mut outputs = Outputs::open(&args.output, true)?;

    info!(
        "Monitoring with schema '{}', period {:?}",
        args.schema.name,
        spec.period()
    );

    Scheduler::new(spec).run(
        || match station.sample() {
            Ok(record) => outputs.emit(&record),
            Err(e) => warn!("Sensor read failed: {}", e),
        },
        &cancel,
    );

    outputs.finish();
    Ok(())
}

fn send(args: SampleArgs, serial: SerialArgs) -> Result<()> {
    let cancel = setup_cancellation();
    let spec = cadence(&args.cadence)?;
    let settings = serial.settings(DEFAULT_SEND_DEVICE);
    let mut port = settings.open()?;
    let mut station = setup_station(&args, &cancel)?;

    let print = args.output.log || args.output.json;
    let mut outputs = Outputs::open(&args.output, print)?;

    info!(
        "Sending schema '{}' ({} bytes/frame) to {} at {} baud",
        args.schema.name,
        args.schema.frame_size(),
        settings.device,
        settings.baud_rate
    );

    let mut sent_frames: u64 = 0;
    Scheduler::new(spec).run(
        || {
            let record = match station.sample() {
                Ok(record) => record,
                Err(e) => {
                    warn!("Sensor read failed: {}", e);
                    return;
                }
            };
            match send_record(port.as_mut(), &record) {
                Ok(n) => {
                    sent_frames += 1;
                    debug!("Frame #{} sent ({} bytes)", sent_frames, n);
                }
                Err(e) => warn!("Failed to send frame: {}", e),
            }
            outputs.emit(&record);
        },
        &cancel,
    );

    outputs.finish();
    info!("Sent {} frames", sent_frames);
    Ok(())
}

fn receive(output: OutputArgs, serial: SerialArgs, schema: &'static Schema) -> Result<()> {
    let cancel = setup_cancellation();
    let settings = serial.settings(DEFAULT_RECEIVE_DEVICE);
    let port = settings.open()?;
    let mut receiver = LinkReceiver::new(FrameReader::new(port, schema));
    let mut outputs = Outputs::open(&output, true)?;

    info!(
        "Receiving schema '{}' from {} at {} baud",
        schema.name, settings.device, settings.baud_rate
    );

    // Paced by the read timeout; the scheduler only adds the minimum floor.
    let mut received: u64 = 0;
    Scheduler::new(ScheduleSpec::Frequency(0.0)).run(
        || {
            if let Some(record) = receiver.poll(&cancel) {
                received += 1;
                outputs.emit(&record);
            }
        },
        &cancel,
    );

    outputs.finish();
    info!("Received {} frames", received);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;

    info!("ivaldi {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Monitor(args) => monitor(args),
        Command::Send { sample, serial } => send(sample, serial),
        Command::Receive {
            output,
            serial,
            schema,
        } => receive(output, serial, schema),
    }?;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn period_and_frequency_conflict() {
        let result = Cli::try_parse_from([
            "ivaldi",
            "monitor",
            "26",
            "--period-s",
            "2",
            "--frequency",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn receive_parses_schema_and_device() {
        let cli = Cli::try_parse_from([
            "ivaldi",
            "receive",
            "--schema",
            "station",
            "--serial-device",
            "/dev/ttyUSB0",
            "--log",
        ])
        .unwrap();
        match cli.command {
            Command::Receive {
                output,
                serial,
                schema,
            } => {
                assert_eq!(schema.name, "station");
                assert!(output.log);
                assert_eq!(serial.settings(DEFAULT_RECEIVE_DEVICE).device, "/dev/ttyUSB0");
            }
            _ => panic!("expected receive"),
        }
    }

    /// Terminal that has gone away.
    struct ClosedTerminal;

    impl Write for ClosedTerminal {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn closed_terminal_does_not_stop_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let mut outputs = Outputs {
            printer: Some(Printer::new(ClosedTerminal, DisplayMode::Status)),
            csv: Some(CsvSink::append(&path).unwrap()),
        };

        let record = Record::from_fn(&ivaldi::schema::RAIN, |field| match field.name {
            "tip_count" => 2.0,
            _ => 0.5,
        });
        outputs.emit(&record);
        outputs.finish();
        drop(outputs);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn unknown_schema_rejected() {
        let result = Cli::try_parse_from(["ivaldi", "monitor", "26", "--schema", "v0"]);
        assert!(result.is_err());
    }
}
