use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use defaultable_api::{CacheKeyDeriver, Config, DefaultResolver, Field, RawValue, RequestContext, Submission};
use defaultable_core::META_DEFAULT_LAST;
use defaultable_persist::SqliteStore;
use defaultable_registry::{HandlerRegistry, KindCatalog};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "defaultctl", version, about = "Inspect and manage remembered field values")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// SQLite database holding remembered values
    #[arg(long = "db", global = true, env = "DEFAULTABLE_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Identifies one field of one resource (or action) for one principal.
#[derive(Args, Debug, Clone)]
struct Target {
    /// Principal the value belongs to
    #[arg(long = "principal")]
    principal: Option<String>,
    /// Resource identity, e.g. "posts"
    #[arg(long = "resource")]
    resource: String,
    /// Field type identity, e.g. "belongs_to"
    #[arg(long = "type", default_value = "text")]
    type_identity: String,
    /// Field attribute name
    #[arg(long = "attribute")]
    attribute: String,
    /// Action identity for action forms
    #[arg(long = "action")]
    action: Option<String>,
}

impl Target {
    fn context(&self) -> RequestContext {
        RequestContext {
            principal_id: self.principal.clone(),
            resource: self.resource.clone(),
            create_like: true,
            action: self.action.clone(),
        }
    }

    fn field(&self) -> Field { Field::new(self.type_identity.clone(), self.attribute.clone()) }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the cache key and canonical string for a field
    Key {
        #[command(flatten)]
        target: Target,
    },
    /// Remember a submitted value as if a create form was posted
    Remember {
        #[command(flatten)]
        target: Target,
        /// Value as JSON; bare words are taken as strings
        value: String,
        /// Store a polymorphic (id, type) pair with this type reference
        #[arg(long = "morph-type")]
        morph_type: Option<String>,
    },
    /// Show the metadata a create form would get from the remembered value
    Recall {
        #[command(flatten)]
        target: Target,
        /// Known kind aliases, e.g. "App\\Models\\Article=articles"
        #[arg(long = "alias")]
        aliases: Vec<String>,
    },
    /// Drop expired values
    Purge,
}

fn init_tracing() {
    let env = std::env::var("DEFAULTABLE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DEFAULTABLE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DEFAULTABLE_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_value(raw: &str) -> RawValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => RawValue::scalar(v),
        Err(_) => RawValue::scalar(raw),
    }
}

fn parse_alias(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((alias, key)) if !alias.is_empty() && !key.is_empty() => Ok((alias.to_string(), key.to_string())),
        _ => Err(anyhow!("invalid alias {:?} (expect Alias=stable_key)", s)),
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteStore> {
    match db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let registry = Arc::new(HandlerRegistry::new());

    match cli.command {
        Commands::Key { target } => {
            let ctx = target.context();
            let field = target.field();
            let key = config.key_deriver().derive(&ctx, &field);
            let canonical = CacheKeyDeriver::canonical(&ctx, &field);
            match cli.output {
                Output::Human => println!("{}  ({})", key, canonical),
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "key": key, "canonical": canonical }))?),
            }
        }
        Commands::Remember { target, value, morph_type } => {
            let store = open_store(cli.db.as_deref())?;
            let resolver = DefaultResolver::new(registry, Arc::new(KindCatalog::new()), store, &config);
            let ctx = target.context();
            let field = target.field().with_meta(META_DEFAULT_LAST, true);
            let value = match morph_type {
                Some(t) => RawValue::pair(parse_value(&value), t),
                None => parse_value(&value),
            };
            info!(resource = %ctx.resource, attribute = %field.attribute, "remember invoked");
            let submission = Submission::new().set(field.attribute.clone(), value);
            let written = resolver.recorder(&config).record(&ctx, [&field], &submission);
            if written == 0 {
                warn!("value was not stored");
            }
            match cli.output {
                Output::Human => println!("stored {} value(s), ttl {}s", written, config.ttl.as_secs()),
                Output::Json => println!("{}", serde_json::json!({ "written": written, "ttl_secs": config.ttl.as_secs() })),
            }
        }
        Commands::Recall { target, aliases } => {
            let mut kinds = KindCatalog::new();
            for a in &aliases {
                let (alias, key) = parse_alias(a)?;
                kinds = kinds.alias(alias, key);
            }
            let store = open_store(cli.db.as_deref())?;
            let resolver = DefaultResolver::new(registry, Arc::new(kinds), store, &config);
            let field = resolver.apply_last_value(&target.context(), target.field(), None)?;
            match cli.output {
                Output::Human => {
                    for (k, v) in &field.meta {
                        println!("{:<12} {}", k, v);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&field.meta)?),
            }
        }
        Commands::Purge => {
            let store = open_store(cli.db.as_deref())?;
            let n = store.purge_expired()?;
            match cli.output {
                Output::Human => println!("purged {} expired value(s)", n),
                Output::Json => println!("{}", serde_json::json!({ "purged": n })),
            }
        }
    }
    Ok(())
}
