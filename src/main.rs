//! Binary entrypoint for the meshtrack CLI.
//!
//! Commands:
//! - `start [--port <path>] [--baud <n>] [--replay <file>] [--no-http] [--table]` - run the tracker
//! - `init` - create a starter `config.toml` and the data directories
//! - `ports` - list serial ports
//! - `simulate --id <id> [--count <n>]` - write a synthetic `Emu_<id>` track
//! - `export --id <id> [--out <file>]` - copy a node's route file
//! - `parse <file>` - decode a captured console log and print events as JSON lines
//!
//! See the library crate docs for module-level details: `meshtrack::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

use meshtrack::api::{self, ApiState};
use meshtrack::config::Config;
use meshtrack::meshtastic::node_table::NodeTableReader;
use meshtrack::meshtastic::{self, LineRead, LineSource, ReplayLineSource};
use meshtrack::storage::TrackStore;
use meshtrack::tracker::{ingest, table, SessionAssembler, Tracker};

#[derive(Parser)]
#[command(name = "meshtrack")]
#[command(about = "Position tracker for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tracker
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (overrides config)
        #[arg(short = 'b', long)]
        baud: Option<u32>,

        /// Replay a captured console log instead of opening a serial port
        #[arg(long, conflicts_with = "port")]
        replay: Option<String>,

        /// Do not start the HTTP API
        #[arg(long)]
        no_http: bool,

        /// Print the node table to the terminal on every update
        #[arg(long)]
        table: bool,
    },
    /// Write a default configuration file and create the data directories
    Init,
    /// List serial ports
    Ports,
    /// Extend a node's track with synthetic points
    Simulate {
        #[arg(long)]
        id: String,
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Export a node's route file
    Export {
        #[arg(long)]
        id: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<String>,
    },
    /// Decode a captured console log and print position events as JSON lines
    Parse {
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init => None,
        _ => match Config::load(&cli.config).await {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                // Logging is not up yet
                eprintln!("{}; using defaults", e);
                None
            }
        },
    };
    init_logging(&config, cli.verbose);
    let config = config.unwrap_or_default();

    match cli.command {
        Commands::Start {
            port,
            baud,
            replay,
            no_http,
            table,
        } => {
            info!("Starting meshtrack v{}", env!("CARGO_PKG_VERSION"));
            start(config, port, baud, replay, no_http, table).await?;
        }
        Commands::Init => {
            info!("Initializing new meshtrack configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let cfg = Config::default();
            let store = TrackStore::from_config(&cfg.storage, &cfg.simulation)?;
            info!(
                "Data directories ready: {} and {}",
                store.tracks_dir().display(),
                store.routes_dir().display()
            );
        }
        Commands::Ports => {
            let ports = meshtastic::list_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for p in ports {
                println!("{}", p);
            }
        }
        Commands::Simulate { id, count } => {
            let store = TrackStore::from_config(&config.storage, &config.simulation)?;
            let count = count
                .unwrap_or(config.simulation.default_count)
                .min(config.simulation.max_count);
            let track = store.simulate_extend(&id, count)?;
            println!("{}", serde_json::to_string_pretty(&track)?);
        }
        Commands::Export { id, out } => {
            let store = TrackStore::from_config(&config.storage, &config.simulation)?;
            let bytes = store.export_route(&id)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, &bytes).await?;
                    info!("Route of {} written to {}", id, path);
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&bytes)?;
                }
            }
        }
        Commands::Parse { file } => {
            let mut source = ReplayLineSource::open(&file)?;
            let mut assembler =
                SessionAssembler::with_timeout(config.tracker.accumulator_timeout());
            let mut events = 0usize;
            loop {
                match source.read_line()? {
                    LineRead::Line(line) => {
                        if let Ok(Some(event)) = assembler.push_line(&line, Instant::now()) {
                            println!("{}", serde_json::to_string(&event)?);
                            events += 1;
                        }
                    }
                    LineRead::Idle => {}
                    LineRead::Closed => break,
                }
            }
            info!("{}: {} position events", file, events);
        }
    }

    Ok(())
}

async fn start(
    config: Config,
    port: Option<String>,
    baud: Option<u32>,
    replay: Option<String>,
    no_http: bool,
    show_table: bool,
) -> Result<()> {
    let store = TrackStore::from_config(&config.storage, &config.simulation)?;
    let tracker = Tracker::new(store, config.tracker.feed_capacity);

    let (line_tx, line_rx) = tokio::sync::mpsc::unbounded_channel();
    let assembler = SessionAssembler::with_timeout(config.tracker.accumulator_timeout());
    tokio::spawn(ingest::run_line_ingest(line_rx, tracker.clone(), assembler));

    if config.node_table.enabled {
        let reader = NodeTableReader::new(&config.node_table.path);
        tokio::spawn(ingest::run_node_table_poller(
            reader,
            std::time::Duration::from_secs(config.node_table.poll_interval_secs),
            tracker.clone(),
        ));
    }

    let state = Arc::new(ApiState::new(
        tracker.clone(),
        line_tx,
        config.meshtastic.clone(),
        config.simulation.clone(),
    ));

    if let Some(path) = replay {
        let source = ReplayLineSource::open(&path)?;
        state.attach_source(Box::new(source))?;
    } else {
        let chosen = port.or_else(|| {
            Some(config.meshtastic.port.clone()).filter(|p| !p.is_empty())
        });
        match chosen {
            Some(p) => {
                if let Err(e) = state.connect(Some(p), baud).await {
                    warn!("Serial console not connected: {}", e);
                }
            }
            None => info!(
                "No --port specified and no configured device port set; starting without device."
            ),
        }
    }

    if show_table {
        let mut feed = tracker.subscribe();
        let nodes = tracker.nodes().clone();
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match feed.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        println!("\n{}", table::render(&nodes.snapshot()));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    if config.http.enabled && !no_http {
        let listener = tokio::net::TcpListener::bind(&config.http.bind)
            .await
            .map_err(|e| anyhow!("Failed to bind HTTP API on {}: {}", config.http.bind, e))?;
        tokio::select! {
            res = api::serve(listener, state.clone()) => res?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted; shutting down"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Interrupted; shutting down");
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Echo to the console only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
