//! Hutch - command line queue client
//!
//! Publishes messages to and consumes messages from an AMQP broker using the
//! connection details in a TOML config file.

use clap::{Parser, Subcommand, ValueEnum};
use hutch::config::{QueueConfig, DEFAULT_ENVIRONMENT};
use hutch::filters::{Base64Filter, JsonFilter, SharedSecretFilter};
use hutch::observability::init_default_logging;
use hutch::{
    AmqpAdapter, Connection, ConnectionOptions, MessageFilterPipeline, NullAdapter,
    PublishOptions, Queue, QueueError, SubscribeOptions,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["hutch.toml", "config/hutch.toml"];

/// Publish to and consume from AMQP queues
#[derive(Parser)]
#[command(name = "hutch")]
#[command(about = "Publish to and consume from AMQP queues")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Config environment to use
    #[arg(short, long, env = "HUTCH_ENV", default_value = DEFAULT_ENVIRONMENT)]
    environment: String,

    /// Adapter to drive
    #[arg(long, value_enum, default_value_t = AdapterKind::Amqp)]
    adapter: AdapterKind,

    /// Sign and verify messages with a shared secret
    #[arg(long, env = "HUTCH_SHARED_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Base64-encode message bodies on the wire
    #[arg(long)]
    base64: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AdapterKind {
    Amqp,
    Null,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a message; the payload is parsed as JSON, or sent as a string
    Publish {
        queue: String,
        payload: String,
        /// Message header, repeatable
        #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        priority: Option<u8>,
        /// Send the message this many times over one connection
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print each message on a queue as a JSON line until interrupted
    Subscribe {
        queue: String,
        #[arg(long, default_value_t = 1)]
        prefetch: u16,
        /// Include delivery metadata with each message
        #[arg(long)]
        metadata: bool,
    },
    /// Validate configuration
    Config {
        /// Show the selected environment's options
        #[arg(long)]
        show: bool,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let options = match load_options(&cli) {
        Ok(options) => options,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config { show } => handle_config_command(&cli.environment, options, show),
        Commands::Publish {
            ref queue,
            ref payload,
            ref headers,
            ref content_type,
            priority,
            count,
        } => {
            let mut publish_options = PublishOptions {
                content_type: content_type.clone(),
                priority,
                ..Default::default()
            };
            for (key, value) in headers {
                publish_options = publish_options.with_header(key.as_str(), value.as_str());
            }
            match build_queue(&cli, options) {
                Ok(mut hutch) => {
                    publish(&mut hutch, queue, parse_payload(payload), publish_options, count)
                        .await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Subscribe {
            ref queue,
            prefetch,
            metadata,
        } => match build_queue(&cli, options) {
            Ok(mut hutch) => subscribe(&mut hutch, queue, prefetch, metadata).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_options(cli: &Cli) -> Result<ConnectionOptions, Box<dyn std::error::Error>> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => DEFAULT_CONFIG_PATHS
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            let config = QueueConfig::load_from_file(&path)?;
            Ok(config.environment(&cli.environment)?.clone())
        }
        None => {
            warn!("No configuration file found, using built-in defaults");
            Ok(ConnectionOptions::default())
        }
    }
}

fn filters(cli: &Cli) -> MessageFilterPipeline {
    let mut pipeline = MessageFilterPipeline::empty();
    if let Some(secret) = &cli.secret {
        pipeline = pipeline.with_filter(SharedSecretFilter::new(secret.clone()));
    }
    pipeline = pipeline.with_filter(JsonFilter);
    if cli.base64 {
        pipeline = pipeline.with_filter(Base64Filter);
    }
    pipeline
}

fn build_queue(cli: &Cli, options: ConnectionOptions) -> Result<Queue, QueueError> {
    let mut queue = match cli.adapter {
        AdapterKind::Amqp => Queue::with_adapter(AmqpAdapter::new().with_filters(filters(cli))),
        AdapterKind::Null => Queue::with_adapter(NullAdapter::new()),
    };
    queue.set_connection(options)?;
    Ok(queue)
}

fn parse_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn publish(
    queue: &mut Queue,
    queue_name: &str,
    payload: Value,
    options: PublishOptions,
    count: usize,
) -> Result<(), QueueError> {
    let queue_name = queue_name.to_string();
    let sent = queue
        .stay_connected(move |queue| {
            Box::pin(async move {
                for _ in 0..count {
                    queue.publish_with(&queue_name, &payload, &options).await?;
                }
                Ok::<usize, QueueError>(count)
            })
        })
        .await?;

    info!(sent, "Published");
    Ok(())
}

async fn subscribe(
    queue: &mut Queue,
    queue_name: &str,
    prefetch: u16,
    with_metadata: bool,
) -> Result<(), QueueError> {
    let options = SubscribeOptions {
        prefetch,
        ..Default::default()
    };
    let subscription = queue.subscribe(queue_name).options(options);
    let subscription = if with_metadata {
        subscription.on_message_with_metadata(|_queue, payload, metadata| {
            Box::pin(async move {
                println!("{}", json!({ "payload": payload, "metadata": metadata }));
                Ok::<(), QueueError>(())
            })
        })
    } else {
        subscription.on_message(|_queue, payload| {
            Box::pin(async move {
                println!("{payload}");
                Ok::<(), QueueError>(())
            })
        })
    };

    info!(queue = queue_name, "Waiting for messages");
    let outcome = tokio::select! {
        result = subscription.run() => result,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
            Ok(())
        }
    };

    queue.reset().await?;
    outcome
}

fn handle_config_command(
    environment: &str,
    mut options: ConnectionOptions,
    show: bool,
) -> Result<(), QueueError> {
    Connection::validate(&options, &AmqpAdapter::new())?;

    if show {
        if options.pass.is_some() {
            options.pass = Some("***".to_string());
        }
        println!("[{environment}]");
        match toml::to_string_pretty(&options) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => warn!("Cannot render configuration: {}", e),
        }
    }

    info!("Configuration validation complete");
    Ok(())
}
