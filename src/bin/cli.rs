//! routeb CLI - read a low-voltage smart electric energy meter
//!
//! Connects through a Wi-SUN Route-B dongle (or the built-in simulator),
//! runs one meter query and prints the result as text or JSON.

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use routeb_core::cli::{
    describe_packet, describe_value, error_code, io_error_code, kwh, print_exit_codes, render, ExitCodes, OutputFormat,
};
use routeb_core::config::{AppConfig, ConfigError, LogOutput};
use routeb_core::core::meter::{Direction, LOG2_TIME_FORMAT, MAX_LOG1_DAY, MAX_LOG2_SEGMENTS};
use routeb_core::{
    list_ports, Adapter, DongleSimulator, EchonetObject, PacketRequest, RecordFormat, Session, SessionEvent,
    SimulatorConfig, TrafficLogger,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

const SIM_PORT: &str = "/dev/routeb-sim";
const SIM_ID: &str = "00000000000000000000000000000000";
const SIM_PASSWORD: &str = "SIMULATOR";

/// Log format for stderr and the rolling file
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    /// Human readable
    Text,
    /// One JSON object per event
    Json,
}

/// routeb CLI
#[derive(Parser, Debug)]
#[command(
    name = "routeb-cli",
    version,
    about = "Read a low-voltage smart electric energy meter over Wi-SUN Route-B",
    long_about = None
)]
struct Cli {
    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port of the dongle (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, global = true, env = "ROUTEB_PORT")]
    port: Option<String>,

    /// Baud rate
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Route-B authentication ID (32 hex digits)
    #[arg(long, global = true, env = "ROUTEB_ID", hide_env_values = true)]
    id: Option<String>,

    /// Route-B password
    #[arg(long, global = true, env = "ROUTEB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Talk to the built-in dongle simulator instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Directory for daily rolling log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Connect and print the dongle version and network information
    Connect,

    /// Instantaneous power (W)
    Power,

    /// Instantaneous current per phase (A)
    Current,

    /// Cumulative energy (kWh)
    Energy {
        /// Reverse direction (sold)
        #[arg(long)]
        reverse: bool,
    },

    /// Half-hourly energy of one day (history 1)
    Log1 {
        /// Days before today (0-99)
        #[arg(short, long, default_value = "0")]
        day: u8,

        /// Reverse direction (sold)
        #[arg(long)]
        reverse: bool,
    },

    /// Half-hourly energy in both directions (history 2)
    Log2 {
        /// Newest segment, YYYY-MM-DDTHH:MM with minute 00 or 30 (default: now)
        #[arg(long, value_parser = parse_log2_time)]
        at: Option<NaiveDateTime>,

        /// Number of segments (1-12)
        #[arg(short, long, default_value = "1")]
        segments: u8,
    },

    /// Meter identification
    Info,

    /// Get raw properties
    Get {
        /// Property codes (hex)
        #[arg(short, long, required = true, num_args = 1.., value_parser = parse_epc)]
        epc: Vec<u8>,

        /// Destination object (hex)
        #[arg(long, default_value = "028801", value_parser = parse_object)]
        deoj: EchonetObject,
    },

    /// Set one property (SetC)
    Set {
        /// Property code (hex)
        #[arg(short, long, value_parser = parse_epc)]
        epc: u8,

        /// Property data (hex)
        #[arg(long)]
        edt: String,

        /// Destination object (hex)
        #[arg(long, default_value = "028801", value_parser = parse_object)]
        deoj: EchonetObject,
    },

    /// Print dongle traffic and meter packets until Ctrl+C
    Monitor {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Poll instantaneous power every N seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Record traffic to a file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Record file format
        #[arg(long, value_enum, default_value_t = RecordFormat::Text)]
        record_format: RecordFormat,
    },

    /// Print the exit code table
    ExitCodes,
}

fn parse_epc(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| format!("invalid property code {s}: {e}"))
}

fn parse_object(s: &str) -> Result<EchonetObject, String> {
    s.parse().map_err(|e: routeb_core::CodecError| e.to_string())
}

fn parse_log2_time(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, LOG2_TIME_FORMAT).map_err(|e| format!("expected YYYY-MM-DDTHH:MM: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app = match load_config(&cli) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    let _log_guard = init_logging(&cli, &app);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::INTERNAL_ERROR);
        }
    };

    match runtime.block_on(run(&cli, &app)) {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<routeb_core::Error>() {
        error_code(e)
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ExitCodes::CONFIG_ERROR
    } else if let Some(e) = err.downcast_ref::<std::io::Error>() {
        io_error_code(e)
    } else {
        ExitCodes::ERROR
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => match AppConfig::load() {
            Err(ConfigError::NoConfigDir) => Ok(AppConfig::default()),
            other => other,
        },
    }
}

fn init_logging(cli: &Cli, app: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => app.logging.level.clone(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    };
    let filter = if cli.verbose > 0 || cli.quiet {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let json = match cli.log_format {
        Some(LogFormat::Json) => true,
        Some(LogFormat::Text) => false,
        None => app.logging.format == LogOutput::Json,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
    layers.push(if json { stderr.json().boxed() } else { stderr.boxed() });

    let mut guard = None;
    if let Some(dir) = cli.log_dir.as_ref().or(app.logging.directory.as_ref()) {
        let appender = tracing_appender::rolling::daily(dir, "routeb-cli.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        let file = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(if json { file.json().boxed() } else { file.boxed() });
        guard = Some(worker);
    }

    tracing_subscriber::registry().with(layers).with(filter).init();
    guard
}

fn build_session(cli: &Cli, app: &AppConfig) -> anyhow::Result<Session> {
    let (port, id, password) = if cli.simulate {
        (
            cli.port.as_deref().or(Some(SIM_PORT)),
            cli.id.as_deref().or(app.adapter.id.as_deref()).or(Some(SIM_ID)),
            cli.password.as_deref().or(app.adapter.password.as_deref()).or(Some(SIM_PASSWORD)),
        )
    } else {
        (cli.port.as_deref(), cli.id.as_deref(), cli.password.as_deref())
    };
    let config = app
        .adapter_config(port, id, password, cli.baud)
        .context("Incomplete adapter settings (use --port/--id/--password or the config file)")?;

    let adapter = if cli.simulate {
        tracing::info!("Using the built-in dongle simulator");
        Adapter::new(config, Box::new(DongleSimulator::new(SimulatorConfig::default())))
    } else {
        Adapter::serial(config)
    };
    Ok(Session::new(adapter))
}

fn status(cli: &Cli, message: &str) {
    if !cli.quiet && cli.format == OutputFormat::Text {
        eprintln!("{message}");
    }
}

async fn run(cli: &Cli, app: &AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::ListPorts => return show_ports(cli),
        Commands::ExitCodes => {
            print_exit_codes();
            return Ok(());
        }
        Commands::Monitor {
            duration,
            interval,
            record,
            record_format,
        } => {
            let session = build_session(cli, app)?;
            let outcome = monitor(cli, &session, *duration, *interval, record.as_ref(), *record_format).await;
            if let Err(e) = session.disconnect().await {
                tracing::warn!(error = %e, "Disconnect failed");
            }
            return outcome;
        }
        _ => {}
    }
    let session = build_session(cli, app)?;
    status(cli, "Connecting to the smart meter...");
    let outcome = match session.connect().await {
        Ok(_) => query(cli, &session).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = session.disconnect().await {
        tracing::warn!(error = %e, "Disconnect failed");
    }
    outcome
}

fn show_ports(cli: &Cli) -> anyhow::Result<()> {
    let ports = list_ports()?;
    let names: Vec<serde_json::Value> = ports
        .iter()
        .map(|p| serde_json::json!({ "name": p.port_name, "type": format!("{:?}", p.port_type) }))
        .collect();
    println!(
        "{}",
        render(cli.format, &names, || {
            if ports.is_empty() {
                return "No serial ports found.".to_string();
            }
            ports
                .iter()
                .map(|p| format!("  {} [{:?}]", p.port_name, p.port_type))
                .collect::<Vec<_>>()
                .join("\n")
        })
    );
    Ok(())
}

fn direction(reverse: bool) -> Direction {
    if reverse {
        Direction::Reverse
    } else {
        Direction::Normal
    }
}

async fn query(cli: &Cli, session: &Session) -> anyhow::Result<()> {
    let format = cli.format;
    let output = match &cli.command {
        Commands::Connect => {
            let info = session.network_info().context("Connected without network information")?;
            let version = session.adapter().version().unwrap_or_default();
            let value = serde_json::json!({ "version": version, "network": info });
            render(format, &value, || {
                format!(
                    "Version:  {version}\nDongle:   {} ({})\nMeter:    {} ({})\nChannel:  {} page {}\nPAN ID:   {:04X}",
                    info.source_link_local_addr,
                    info.source_mac,
                    info.dest_link_local_addr,
                    info.dest_mac,
                    info.channel,
                    info.channel_page,
                    info.pan_id
                )
            })
        }
        Commands::Power => {
            let power = session.instantaneous_power().await?;
            render(format, &serde_json::json!({ "power": power }), || {
                power.map_or_else(|| "-".to_string(), |w| format!("{w} W"))
            })
        }
        Commands::Current => {
            let currents = session.instantaneous_current().await?;
            render(format, &currents, || {
                let amps = |a: Option<f64>| a.map_or_else(|| "-".to_string(), |a| format!("{a:.1} A"));
                format!("R: {}  T: {}", amps(currents.r_phase), amps(currents.t_phase))
            })
        }
        Commands::Energy { reverse } => {
            let energy = session.cumulative_energy(direction(*reverse)).await?;
            render(format, &serde_json::json!({ "energy": energy }), || kwh(energy))
        }
        Commands::Log1 { day, reverse } => {
            if *day > MAX_LOG1_DAY {
                anyhow::bail!(routeb_core::Error::InvalidArgument(format!("day must be 0-{MAX_LOG1_DAY}")));
            }
            let log = session.energy_log1(direction(*reverse), *day).await?;
            render(format, &log, || {
                log.energy
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{:02}:{:02}  {}", i / 2, (i % 2) * 30, kwh(*e)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Log2 { at, segments } => {
            if !(1..=MAX_LOG2_SEGMENTS).contains(segments) {
                anyhow::bail!(routeb_core::Error::InvalidArgument(format!(
                    "segments must be 1-{MAX_LOG2_SEGMENTS}"
                )));
            }
            let history = session.energy_log2(*at, *segments).await?;
            render(format, &history, || {
                history
                    .entries
                    .iter()
                    .map(|e| format!("{}  +{}  -{}", e.date_time, kwh(e.normal), kwh(e.reverse)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Info => {
            let info = session.device_info().await?;
            render(format, &info, || {
                let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
                format!(
                    "ID:           {}\nProtocol:     {}\nMeter ID:     {}\nManufacturer: {}\nProduct code: {}\nSerial:       {}",
                    field(&info.id),
                    field(&info.protocol),
                    field(&info.meter_id),
                    field(&info.manufacturer),
                    field(&info.product_code),
                    field(&info.serial_number)
                )
            })
        }
        Commands::Get { epc, deoj } => {
            let packet = session
                .exchange(&PacketRequest::get(epc).with_deoj(deoj.to_string()))
                .await?;
            render(format, &packet, || {
                packet
                    .properties
                    .iter()
                    .map(|p| match &p.value {
                        Some(value) => format!("{:02X}  {}  {}", p.epc, hex::encode_upper(&p.edt), describe_value(value)),
                        None => format!("{:02X}  {}", p.epc, hex::encode_upper(&p.edt)),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Set { epc, edt, deoj } => {
            let data = hex::decode(edt)
                .map_err(|e| routeb_core::Error::InvalidArgument(format!("invalid property data {edt}: {e}")))?;
            session.set_property(*deoj, *epc, data).await?;
            render(format, &serde_json::json!({ "epc": format!("{epc:02X}"), "accepted": true }), || {
                format!("{epc:02X} accepted")
            })
        }
        Commands::ListPorts | Commands::ExitCodes | Commands::Monitor { .. } => return Ok(()),
    };
    println!("{output}");
    Ok(())
}

async fn monitor(
    cli: &Cli,
    session: &Session,
    duration: Option<u64>,
    interval: Option<u64>,
    record: Option<&PathBuf>,
    record_format: RecordFormat,
) -> anyhow::Result<()> {
    let stop = Arc::new(Notify::new());
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.notify_one())?;

    let mut recorder = match record {
        Some(path) => Some(
            TrafficLogger::create(path, record_format)
                .with_context(|| format!("Cannot record to {}", path.display()))?,
        ),
        None => None,
    };

    let mut events = session.subscribe();
    status(cli, "Connecting to the smart meter...");
    session.connect().await?;
    status(cli, "Connected, press Ctrl+C to stop");

    let deadline = tokio::time::sleep(duration.map_or(Duration::MAX / 4, Duration::from_secs));
    tokio::pin!(deadline);
    let mut poll = interval.map(|s| tokio::time::interval(Duration::from_secs(s.max(1))));

    loop {
        tokio::select! {
            () = stop.notified() => break,
            () = &mut deadline => break,
            _ = async {
                match poll.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                match session.instantaneous_power().await {
                    Ok(power) => tracing::info!(power = ?power, "Instantaneous power"),
                    Err(e) => tracing::warn!(error = %e, "Power poll failed"),
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Monitor lagged behind");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Some(recorder) = recorder.as_mut() {
                    recorder.record(&event)?;
                }
                print_event(cli.format, &event);
                if let SessionEvent::StateChanged(state) = event {
                    if !state.is_connected() && state != routeb_core::ConnectionState::Connecting {
                        status(cli, "Connection lost");
                        break;
                    }
                }
            }
        }
    }

    if let Some(recorder) = recorder.as_mut() {
        recorder.flush()?;
        status(cli, &format!("Recorded {} entries to {}", recorder.entries(), recorder.path().display()));
    }
    Ok(())
}

fn print_event(format: OutputFormat, event: &SessionEvent) {
    match (format, event) {
        (OutputFormat::Text, SessionEvent::LineReceived(line)) => println!("RX {line}"),
        (OutputFormat::Text, SessionEvent::PacketSent { packet, .. }) => println!("TX {}", describe_packet(packet)),
        (OutputFormat::Text, SessionEvent::PacketReceived { sender, packet }) => {
            println!("<< {sender} {}", describe_packet(packet));
        }
        (OutputFormat::Text, SessionEvent::StateChanged(state)) => println!("## {state}"),
        (OutputFormat::Json, SessionEvent::PacketReceived { sender, packet }) => {
            println!("{}", serde_json::json!({ "sender": sender, "packet": packet }));
        }
        (OutputFormat::Json, SessionEvent::PacketSent { packet, .. }) => {
            println!("{}", serde_json::json!({ "sent": packet }));
        }
        (OutputFormat::Json, SessionEvent::LineReceived(line)) => println!("{}", serde_json::json!({ "line": line })),
        (OutputFormat::Json, SessionEvent::StateChanged(state)) => {
            println!("{}", serde_json::json!({ "state": state.to_string() }));
        }
    }
}
