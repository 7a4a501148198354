use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wirecloak::{BackendError, BackendEvent, Config, TunnelStatus, VpnBackend};

#[derive(Parser)]
#[command(name = "wirecloak")]
#[command(about = "Manage WireGuard VPN configurations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./wirecloak.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a profile from a path or file:// URI
    ///
    /// DNS assignments are stripped from the profile before it is installed.
    Import {
        /// Source profile, named <name>.conf
        source: String,
    },
    /// List installed profiles
    List {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Remove an installed profile
    Remove {
        /// Profile name, e.g. wg0.conf
        name: String,
    },
    /// Bring a tunnel up
    Up {
        /// Profile or interface name
        name: String,
    },
    /// Bring a tunnel down
    Down {
        /// Profile or interface name
        name: String,
    },
    /// Show tunnel state and traffic
    Status {
        /// Profile or interface name
        name: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Refresh every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Generate default config file
    Init {
        /// Where to write the config (defaults to the user config dir)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Init { path } = &cli.command {
        let path = match path.clone().or_else(Config::user_config_path) {
            Some(path) => path,
            None => {
                error!("Could not determine a config directory, pass a path");
                std::process::exit(1);
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Config::default().save(&path)?;
        println!("Created default config: {}", path.display());
        return Ok(());
    }

    let config = Config::discover(cli.config.as_deref())?;
    let backend = VpnBackend::from_config(&config);
    let mut events = backend.subscribe();

    let result = run(&backend, cli.command).await;
    log_events(&mut events);

    // Failures were already reported as OperationError events
    if result.is_err() {
        std::process::exit(1);
    }

    Ok(())
}

async fn run(backend: &VpnBackend, command: Commands) -> Result<(), BackendError> {
    match command {
        Commands::Import { source } => {
            let outcome = backend.import_profile(&source).await?;
            if outcome.persist_ok {
                println!("Imported {}", source);
            } else {
                println!("Imported {} (not persisted, reboot may be required)", source);
            }
        }
        Commands::List { json } => {
            let profiles = backend.list_profiles().await?;
            if json {
                println!("{}", to_json(&profiles));
            } else if profiles.is_empty() {
                println!("No profiles installed");
            } else {
                for profile in profiles {
                    println!("{}", profile);
                }
            }
        }
        Commands::Remove { name } => {
            backend.remove_profile(&name).await?;
            println!("Removed {}", name);
        }
        Commands::Up { name } => {
            backend.toggle_tunnel(&name, true).await?;
            println!("Tunnel {} is up", name);
        }
        Commands::Down { name } => {
            backend.toggle_tunnel(&name, false).await?;
            println!("Tunnel {} is down", name);
        }
        Commands::Status { name, json, watch } => match watch {
            Some(secs) => {
                let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
                loop {
                    ticker.tick().await;
                    print_status(&name, &backend.tunnel_status(&name).await?, json);
                }
            }
            None => print_status(&name, &backend.tunnel_status(&name).await?, json),
        },
        Commands::Init { .. } => unreachable!("handled before the backend is built"),
    }

    Ok(())
}

fn print_status(name: &str, status: &TunnelStatus, json: bool) {
    if json {
        println!("{}", to_json(status));
        return;
    }

    if !status.active {
        println!("{}: inactive", name);
        return;
    }

    println!("{}: active", name);
    if status.handshake > 0 {
        println!("  Latest handshake: {} (epoch seconds)", status.handshake);
    } else {
        println!("  Latest handshake: never");
    }
    println!("  Received: {} bytes", status.rx);
    println!("  Sent: {} bytes", status.tx);
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

fn log_events(events: &mut broadcast::Receiver<BackendEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            BackendEvent::ProfileImported => info!("Profile list changed"),
            BackendEvent::TunnelStateChanged => info!("Tunnel state changed"),
            BackendEvent::OperationError(message) => warn!("{}", message),
        }
    }
}
