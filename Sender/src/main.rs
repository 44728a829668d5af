// main.rs

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use shared_utils::wire::DEFAULT_PORT;
use tokio::runtime;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, Layer};

mod session;

use session::{send, MeshArg, Session};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2, // Designates informational messages.
    Warn = 3, // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Sends a patient record and organ meshes to an organ receiver")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Patient and analysis JSON; without it an empty header is sent
    #[arg(long)]
    patient: Option<PathBuf>,
    /// Organ mesh as LABEL=PATH, may be repeated
    #[arg(short, long = "mesh", value_name = "LABEL=PATH")]
    meshes: Vec<MeshArg>,
    /// Seconds allowed for connecting and, separately, for sending
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
    /// Pause after every mesh
    #[arg(long, default_value_t = 100)]
    mesh_delay_ms: u64,
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(match args.log_level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        });

    // Initialize console tracing if enabled
    #[cfg(feature = "console-tracing")]
    let subscriber = {
        let console_layer = console_subscriber::ConsoleLayer::builder()
            .retention(std::time::Duration::from_secs(60))
            .server_addr(([127, 0, 0, 1], 5557))
            .spawn();
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
    };

    #[cfg(not(feature = "console-tracing"))]
    let subscriber = {
        tracing_subscriber::registry()
            .with(fmt_layer)
    };

    tracing::subscriber::set_global_default(subscriber)?;

    info!("{:?}", args);

    let runtime = runtime::Builder::new_current_thread()
        .thread_name("SEND_R")
        .enable_all()
        .build()?;

    let addr = format!("{}:{}", args.host, args.port);
    let limit = Duration::from_secs(args.timeout);
    let mesh_delay = Duration::from_millis(args.mesh_delay_ms);

    let session = runtime.block_on(Session::load(args.patient.as_deref(), &args.meshes))?;
    info!("Sending {} meshes to {}", session.meshes.len(), addr);

    if let Err(e) = runtime.block_on(send(&addr, &session, limit, mesh_delay)) {
        error!("Session to {} failed: {}", addr, e);
        return Err(e.into());
    }
    info!("Session delivered");
    Ok(())
}
