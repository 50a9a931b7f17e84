use clap::{Args, Parser, Subcommand};
use g2p_id_mapper::application::mapper::IdMapper;
use g2p_id_mapper::application::registry::CompletionRegistry;
use g2p_id_mapper::application::saga::register_saga_handlers;
use g2p_id_mapper::config::{AuthorityConfig, KeyPrefixes, MapperConfig};
use g2p_id_mapper::domain::mapping::{Action, MappingValue, Namespace};
use g2p_id_mapper::domain::ports::TransactionStoreBox;
use g2p_id_mapper::infrastructure::http::HttpAuthorityClient;
use g2p_id_mapper::infrastructure::in_memory::InMemoryTransactionStore;
use g2p_id_mapper::interfaces::csv::mapping_reader::MappingReader;
use g2p_id_mapper::interfaces::http::callback;
use g2p_id_mapper::logging;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about = "G2P Connect ID mapper gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the callback endpoints until interrupted
    Serve,
    /// Resolve the ids/financial addresses in a CSV file
    Resolve(Batch),
    /// Link the id/financial address pairs in a CSV file
    Link(Batch),
    /// Update the id/financial address pairs in a CSV file
    Update(Batch),
    /// Update ids that already have a financial address, link the others
    UpdateOrLink(Batch),
}

#[derive(Args)]
struct Batch {
    /// Input mappings CSV file with `id` and `fa` columns
    input: PathBuf,

    /// Seconds between polls of the transaction status
    #[arg(long, default_value_t = 1)]
    poll_interval_secs: u64,

    /// Number of polls before giving up
    #[arg(long, default_value_t = 10)]
    max_retries: u32,
}

#[derive(Args)]
struct Settings {
    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_RESOLVE_URL", default_value = "", global = true)]
    mapper_resolve_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_LINK_URL", default_value = "", global = true)]
    mapper_link_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_UPDATE_URL", default_value = "", global = true)]
    mapper_update_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_API_TIMEOUT_SECS", default_value_t = 10, global = true)]
    mapper_api_timeout_secs: u64,

    #[arg(
        long,
        env = "G2PCONNECT_ID_FA_MAPPER_COMMON_SENDER_ID",
        default_value = "dev.openg2p.net",
        global = true
    )]
    mapper_common_sender_id: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_RESOLVE_SENDER_URL", default_value = "", global = true)]
    mapper_resolve_sender_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_LINK_SENDER_URL", default_value = "", global = true)]
    mapper_link_sender_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_MAPPER_UPDATE_SENDER_URL", default_value = "", global = true)]
    mapper_update_sender_url: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_QUEUE_RESOLVE_NAME", default_value = "resolve:", global = true)]
    queue_resolve_name: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_QUEUE_LINK_NAME", default_value = "link:", global = true)]
    queue_link_name: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_QUEUE_UPDATE_NAME", default_value = "update:", global = true)]
    queue_update_name: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_QUEUE_COMBINED_NAME", default_value = "combined:", global = true)]
    queue_combined_name: String,

    /// Route prefix of the callback endpoints
    #[arg(long, env = "G2PCONNECT_ID_FA_CALLBACK_API_COMMON_PREFIX", default_value = "/callback", global = true)]
    callback_api_common_prefix: String,

    /// Address the callback endpoints listen on
    #[arg(long, env = "G2PCONNECT_ID_FA_BIND", default_value = "0.0.0.0:8000", global = true)]
    bind: String,

    #[arg(long, env = "G2PCONNECT_ID_FA_LOGGING_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "G2PCONNECT_ID_FA_DB_PATH", global = true)]
    db_path: Option<PathBuf>,
}

impl Settings {
    fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            authority: AuthorityConfig {
                resolve_url: self.mapper_resolve_url.clone(),
                link_url: self.mapper_link_url.clone(),
                update_url: self.mapper_update_url.clone(),
                timeout: Duration::from_secs(self.mapper_api_timeout_secs),
                sender_id: self.mapper_common_sender_id.clone(),
                resolve_sender_uri: self.mapper_resolve_sender_url.clone(),
                link_sender_uri: self.mapper_link_sender_url.clone(),
                update_sender_uri: self.mapper_update_sender_url.clone(),
            },
            prefixes: KeyPrefixes {
                resolve: self.queue_resolve_name.clone(),
                link: self.queue_link_name.clone(),
                update: self.queue_update_name.clone(),
                combined: self.queue_combined_name.clone(),
            },
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    fn store(&self) -> Result<TransactionStoreBox> {
        use g2p_id_mapper::infrastructure::rocksdb::RocksDBStore;

        if let Some(db_path) = &self.db_path {
            // Use persistent storage (RocksDB)
            return Ok(Box::new(RocksDBStore::open(db_path)?));
        }
        Ok(Box::new(InMemoryTransactionStore::new()))
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn store(&self) -> Result<TransactionStoreBox> {
        if self.db_path.is_some() {
            tracing::warn!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
        Ok(Box::new(InMemoryTransactionStore::new()))
    }
}

fn read_mappings(path: &Path) -> Result<Vec<MappingValue>> {
    let file = File::open(path).into_diagnostic()?;
    let mut mappings = Vec::new();
    for mapping in MappingReader::new(file).mappings() {
        match mapping {
            Ok(mapping) => mappings.push(mapping),
            Err(e) => error!(error = %e, "Error reading mapping"),
        }
    }
    Ok(mappings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;
    logging::init(&settings.log_level);

    let config = settings.mapper_config();
    let store = settings.store()?;
    let client = Box::new(HttpAuthorityClient::new(config.authority.clone())?);
    let registry = register_saga_handlers(CompletionRegistry::builder())?.build();
    let mapper = IdMapper::new(store, client, registry, config);

    let listener = TcpListener::bind(&settings.bind).await.into_diagnostic()?;
    info!(address = %listener.local_addr().into_diagnostic()?, "Callback endpoints listening");
    let prefix = settings.callback_api_common_prefix.clone();

    let (action, batch) = match cli.command {
        Command::Serve => {
            callback::serve(listener, mapper, prefix).await.into_diagnostic()?;
            return Ok(());
        }
        Command::Resolve(batch) => (Some(Action::Resolve), batch),
        Command::Link(batch) => (Some(Action::Link), batch),
        Command::Update(batch) => (Some(Action::Update), batch),
        Command::UpdateOrLink(batch) => (None, batch),
    };

    // Callbacks must be reachable while we wait on the outcome
    let server = tokio::spawn(callback::serve(listener, Arc::clone(&mapper), prefix));
    let mappings = read_mappings(&batch.input)?;
    let poll_interval = Duration::from_secs(batch.poll_interval_secs);

    let status = match action {
        Some(action) => {
            mapper
                .request_and_wait(action, &mappings, None, poll_interval, batch.max_retries)
                .await?
        }
        None => {
            let started = mapper.update_or_link(&mappings, None, None).await?;
            mapper
                .wait_for_terminal(
                    Namespace::Combined,
                    &started.txn_id,
                    poll_interval,
                    batch.max_retries,
                )
                .await?
        }
    };
    server.abort();

    // Output final state
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &status).into_diagnostic()?;
    writeln!(out).into_diagnostic()?;

    Ok(())
}
