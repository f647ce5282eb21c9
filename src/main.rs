use clap::Parser;
use clap::Subcommand;
use confwatch::ConfWatchConfig;
use confwatch::ConfigClient;
use confwatch::Error;
use confwatch::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Read and watch files of a Polaris-compatible config service.
///
/// Settings come from `CONFIG_PATH` and `CONFWATCH__*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "confwatch", version)]
struct Cli {
    /// Extra configuration file applied over `CONFIG_PATH`
    #[arg(long, env = "CONFWATCH_CONFIG")]
    config: Option<String>,

    /// Override `server.addresses`
    #[arg(long, value_delimiter = ',')]
    addresses: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the content of a file
    Get {
        namespace: String,
        group: String,
        file_name: String,
    },
    /// List the files of a group
    List { namespace: String, group: String },
    /// Print change events of files until interrupted
    Watch {
        namespace: String,
        group: String,
        #[arg(required = true)]
        file_names: Vec<String>,
    },
    /// Print key values on every change of a key set until interrupted
    WatchPrefix {
        prefix: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();
    let cli = Cli::parse();

    let mut config = ConfWatchConfig::new()?;
    if let Some(path) = &cli.config {
        config = config.with_override_config(path)?;
    }

    let mut builder = ConfigClient::builder(config);
    if !cli.addresses.is_empty() {
        builder = builder.addresses(cli.addresses.clone());
    }
    let client = builder.build().await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = graceful_shutdown(shutdown).await {
                error!("Failed to listen for shutdown signals: {:?}", e);
            }
        });
    }

    let result = run(&client, cli.command, &shutdown).await;
    client.shutdown();
    result
}

async fn run(
    client: &ConfigClient,
    command: Command,
    shutdown: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Get {
            namespace,
            group,
            file_name,
        } => match client.get_config_content(&namespace, &group, &file_name).await? {
            Some(content) => println!("{content}"),
            None => eprintln!("{namespace}/{group}/{file_name} not found"),
        },
        Command::List { namespace, group } => {
            for file in client.list_config_files(&namespace, &group).await? {
                println!("{}\t{}", file.file_name, file.version);
            }
        }
        Command::Watch {
            namespace,
            group,
            file_names,
        } => {
            let watcher = client.watch_config_files(&namespace, &group, &file_names).await?;
            let mut events = watcher.add_change_channel();
            info!("watching {} file(s), press Ctrl+C to stop", file_names.len());

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = watcher.finished() => {
                        error!("watcher stopped");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => println!(
                            "{} {} version={}\n{}",
                            event.change_type, event.file, event.version, event.new_value
                        ),
                        None => break,
                    },
                }
            }
        }
        Command::WatchPrefix { prefix, keys } => {
            let coordinator = client.coordinator();
            let mut revision = 0;

            loop {
                revision = match coordinator.watch_prefix(&prefix, &keys, revision, shutdown).await {
                    Ok(revision) => revision,
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => return Err(e),
                };
                println!("revision {revision}");
                for (key, value) in coordinator.get_values(&prefix, &keys).await? {
                    println!("{key}\n{value}");
                }
            }
        }
    }
    Ok(())
}

async fn graceful_shutdown(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    shutdown.cancel();
    Ok(())
}

fn init_observability() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
