use std::{path::PathBuf, time::Duration};

use clap::Parser;
use docintel_cache::{
    cache::{CacheKeys, Map, StoreClient, Value},
    config::AppConfig,
    observability,
};

/// CLI arguments for the cache client
#[derive(Parser, Debug)]
#[command(version, about = "Inspect and operate the document intelligence cache", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (the in-memory store is used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Write a starter configuration file
    Init {
        /// Path to create the config file
        #[arg(short, long, default_value = "docintel-cache.toml")]
        output: PathBuf,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Check that the store answers
    Ping,
    /// Print server statistics
    Info,
    /// Read a cached value
    Get { key: String },
    /// Cache a value (parsed as JSON, stored as a plain string otherwise)
    Set {
        key: String,
        value: String,
        /// Lifetime in seconds (defaults to cache.default_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete keys
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Delete every key matching a glob pattern
    Purge { pattern: String },
    /// Count a request against a fixed-window limit
    RateLimit {
        identifier: String,
        #[arg(long, default_value = "100")]
        limit: u32,
        /// Window length in seconds
        #[arg(long, default_value = "60")]
        window: u64,
    },
    /// Show the number of pending items in a queue
    QueueLength { name: String },
    /// Create a session with a random id
    CreateSession {
        user_id: String,
        /// Session data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Show a session
    Session { session_id: String },
    /// Show the processing status of a document
    DocStatus { document_id: String },
    /// Show enabled compile-time features
    Features,
}

fn default_config_toml() -> &'static str {
    r#"# Document intelligence cache configuration

[store]
type = "redis"
url = "redis://localhost:6379/0"
# password = "${REDIS_PASSWORD}"
key_prefix = ""
connect_timeout_secs = 5

[client]
operation_timeout_ms = 2000
payload_encoding = "binary"

[client.retry]
max_retries = 2
initial_delay_ms = 25
max_delay_ms = 500

[cache]
default_ttl_secs = 3600

[session]
ttl_secs = 3600

[documents]
result_ttl_secs = 3600

[observability.logging]
level = "info"
format = "compact"
"#
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Init { output, force } => run_init(output, force),
        Command::Features => run_features(),
        command => {
            let config = load_config(args.config.as_ref());
            if let Err(e) = observability::init_tracing(&config.observability.logging) {
                eprintln!("{}", e);
                std::process::exit(1);
            }
            run_command(&config, command).await;
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> AppConfig {
    let Some(path) = path else {
        return AppConfig::default();
    };
    match AppConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run_init(output: PathBuf, force: bool) {
    if output.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output.display());
}

fn run_features() {
    println!("cli:   {}", cfg!(feature = "cli"));
    println!("redis: {}", cfg!(feature = "redis"));
}

async fn run_command(config: &AppConfig, command: Command) {
    let client = StoreClient::from_config(config);
    if let Err(e) = client.connect().await {
        eprintln!("Failed to connect to {} store: {}", config.store.backend_name(), e);
        std::process::exit(1);
    }

    let output = match execute(&client, command).await {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{}", e);
            client.disconnect().await;
            std::process::exit(1);
        }
    };
    client.disconnect().await;

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Failed to render output: {}", e);
            std::process::exit(1);
        }
    }
}

async fn execute(
    client: &StoreClient,
    command: Command,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    use serde_json::json;

    let output = match command {
        Command::Ping => json!({ "pong": client.ping().await }),
        Command::Info => serde_json::to_value(client.server_info().await?)?,
        Command::Get { key } => client
            .cache_get(&key)
            .await?
            .map_or(serde_json::Value::Null, |v| render(&v)),
        Command::Set { key, value, ttl } => {
            let value = parse_value(&value);
            let stored = client
                .cache_set(&key, &value, ttl.map(Duration::from_secs))
                .await?;
            json!({ "stored": stored })
        }
        Command::Delete { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            json!({ "deleted": client.delete(&keys).await? })
        }
        Command::Purge { pattern } => json!({ "deleted": client.cache_delete(&pattern).await? }),
        Command::RateLimit {
            identifier,
            limit,
            window,
        } => serde_json::to_value(
            client
                .rate_limit_check(&identifier, limit, Duration::from_secs(window))
                .await,
        )?,
        Command::QueueLength { name } => json!({ "length": client.queue_length(&name).await? }),
        Command::CreateSession { user_id, data } => {
            let data = match data.as_deref().map(parse_value) {
                None => Map::new(),
                Some(Value::Map(map)) => map,
                Some(_) => return Err("session data must be a JSON object".into()),
            };
            let session_id = uuid::Uuid::new_v4().to_string();
            let created = client.create_session(&session_id, &user_id, data, None).await?;
            json!({ "session_id": session_id, "created": created })
        }
        Command::Session { session_id } => client
            .get_session(&session_id)
            .await?
            .map_or(serde_json::Value::Null, |s| render(&s.into())),
        Command::DocStatus { document_id } => {
            let status = client.document_status(&document_id).await?;
            json!({
                "key": CacheKeys::doc_status(&document_id),
                "status": serde_json::to_value(status)?,
            })
        }
        Command::Init { .. } | Command::Features => serde_json::Value::Null,
    };
    Ok(output)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// JSON rendering for display; byte strings are shown as hex.
fn render(value: &Value) -> serde_json::Value {
    match value {
        Value::Bytes(bytes) => serde_json::Value::String(hex::encode(bytes)),
        Value::List(items) => items.iter().map(render).collect(),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), render(v))).collect(),
        ),
        other => other
            .to_json()
            .unwrap_or_else(|| serde_json::Value::String(format!("{:?}", other))),
    }
}
