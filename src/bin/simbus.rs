use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use simbus::{CanFrame, Federation, InProcessRegistry, LogLevel, Session, SimbusConfig, TimeMaster};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DEFAULT_LOG_LEVEL: &str = "info";
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const DEMO_TIMEOUT: Duration = Duration::from_secs(2);

fn build_cli() -> App<'static, 'static> {
    App::new("simbus")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Simulation Systems Engineering Team")
        .about("🚗 Virtual bus federation - time-synchronized CAN, Ethernet, FlexRay and LIN co-simulation")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Registry port (overrides the configuration file)")
                .takes_value(true)
                .global(true)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("LEVEL")
                .help("Log level")
                .takes_value(true)
                .possible_values(&["trace", "debug", "info", "warn", "error", "critical", "off"])
                .default_value(DEFAULT_LOG_LEVEL)
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("federation")
                .about("🚀 Launch registry, system controller and time master")
                .long_about(
                    "Starts the registry tools and the time master, then runs until Ctrl-C.\n\
                     The time master publishes over the in-process registry only: participants in \
                     other processes do not receive its beacons.",
                )
                .arg(
                    Arg::with_name("participants")
                        .help("Participant names the system controller waits for")
                        .multiple(true),
                )
                .arg(
                    Arg::with_name("monitor")
                        .short("m")
                        .long("monitor")
                        .help("Also launch the system monitor"),
                )
                .arg(
                    Arg::with_name("log-dir")
                        .long("log-dir")
                        .value_name("DIR")
                        .help("Directory for the registry and system controller logs")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("no-launch")
                        .long("no-launch")
                        .help("Only start the time master; the registry is already running"),
                ),
        )
        .subcommand(
            SubCommand::with_name("demo")
                .about("🔁 Run an in-process CAN exchange between two participants")
                .arg(
                    Arg::with_name("beacon-ms")
                        .long("beacon-ms")
                        .value_name("MS")
                        .help("Time beacon interval in milliseconds")
                        .takes_value(true)
                        .validator(|v| match v.parse::<u64>() {
                            Ok(ms) if ms > 0 => Ok(()),
                            _ => Err("Beacon interval must be a positive number".into()),
                        }),
                ),
        )
        .subcommand(SubCommand::with_name("config").about("📄 Print the effective configuration as JSON"))
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = build_cli().get_matches();

    let level: LogLevel = matches.value_of("log").unwrap_or(DEFAULT_LOG_LEVEL).parse()?;
    init_logging(level);
    let config = load_config(&matches, level)?;

    match matches.subcommand() {
        ("federation", Some(sub_matches)) => handle_federation(sub_matches, config).await?,
        ("demo", Some(sub_matches)) => handle_demo(sub_matches, config).await?,
        ("config", _) => println!("{}", config.to_json_pretty()?),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Run the in-process CAN demo", "simbus demo".bright_cyan());
            println!("  {} Launch a federation for two participants", "simbus federation Test1 Test2".bright_cyan());
            println!("  {} Show the effective configuration", "simbus config".bright_cyan());
        }
    }

    Ok(())
}

fn init_logging(level: LogLevel) {
    let filter = level.to_tracing().map_or(LevelFilter::OFF, LevelFilter::from_level);
    tracing_subscriber::fmt().with_max_level(filter).with_target(false).init();
}

fn load_config(matches: &ArgMatches, level: LogLevel) -> CliResult<SimbusConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => SimbusConfig::from_file(path)?,
        None => SimbusConfig::default(),
    };
    if let Some(port) = matches.value_of("port") {
        config = config.with_port(port.parse()?);
    }
    if matches.occurrences_of("log") > 0 {
        config.federation.log_level = level;
    }
    Ok(config)
}

async fn handle_federation(matches: &ArgMatches<'_>, mut config: SimbusConfig) -> CliResult<()> {
    let participants: Vec<String> = matches
        .values_of("participants")
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default();
    if matches.is_present("monitor") {
        config.federation.launch_monitor = true;
    }
    if let Some(dir) = matches.value_of("log-dir") {
        config.federation.log_dir = PathBuf::from(dir);
    }
    if matches.is_present("no-launch") {
        config.federation.launch_processes = false;
    }

    println!("{} {}", "Registry:".bright_blue().bold(), config.registry_uri);
    let mut federation = tokio::task::spawn_blocking(move || -> simbus::Result<Federation> {
        let transport = Arc::new(InProcessRegistry::new(config.registry_uri.clone())?);
        let names: Vec<&str> = participants.iter().map(String::as_str).collect();
        Federation::start(transport, config, &names)
    })
    .await??;
    println!("{} {}", "Using transport".bright_green(), federation.version().to_string().bold());
    println!(
        "{}",
        "Time beacons stay in this process; external participants are not synchronized.".yellow()
    );
    println!("{}", "Federation running. Press Ctrl-C to stop.".dimmed());

    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = health.tick() => {
                if let Err(e) = federation.check_health() {
                    error!(error = %e, "federation component failed");
                    println!("{} {}", "❌".red(), e.to_string().red());
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || federation.shutdown()).await?;
    println!("{}", "Federation stopped.".bright_green());
    Ok(())
}

async fn handle_demo(matches: &ArgMatches<'_>, mut config: SimbusConfig) -> CliResult<()> {
    if let Some(ms) = matches.value_of("beacon-ms") {
        config.time_sync.beacon_interval_ms = ms.parse()?;
    }
    tokio::task::spawn_blocking(move || run_demo(config)).await?
}

fn run_demo(config: SimbusConfig) -> CliResult<()> {
    let registry = Arc::new(InProcessRegistry::new(config.registry_uri.clone())?);
    let session = Session::new(registry, config);
    let _master = TimeMaster::start(&session)?;
    println!("{} {}", "Using transport".bright_green(), session.version().to_string().bold());

    let mut sender = session.create_participant(Some("Test1"))?;
    sender.add_can_controller(Some("Test1_CAN"), None)?;
    let mut receiver = session.create_participant(Some("Test2"))?;
    receiver.add_can_controller(Some("Test2_CAN"), None)?;

    let tx = sender.can(0)?;
    let rx = receiver.can(0)?;
    tx.start()?;
    rx.start()?;

    for (id, last) in [(0x700, 8), (0x701, 9), (0x702, 10), (0x703, 11)] {
        let frame = CanFrame::new(id, &[1, 2, 3, 4, 5, 6, 7, last])?;
        println!("{frame}");
        let sent = tx.send(&frame)?;
        let ack = tx.wait_for_ack(&sent, DEMO_TIMEOUT)?;
        println!("{} {ack}", "SENT".bright_cyan());
        let received = rx.recv_timeout(DEMO_TIMEOUT)?;
        println!("{} {received}", "RECV".bright_magenta());
    }

    tx.sleep()?;
    tx.reset()?;
    tx.stop()?;
    let stats = tx.stats();
    println!(
        "{} transmitted={} failed={} dropped={}",
        "Stats:".bold(),
        stats.transmitted,
        stats.failed,
        stats.dropped
    );
    Ok(())
}
