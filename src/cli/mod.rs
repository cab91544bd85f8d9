use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod encode;
pub mod init_config;
pub mod restore;
pub mod supplier_status;

use config::{default_config_path, CustodiaConfig};

#[derive(Parser)]
#[command(name = "custodia")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Custodia backup engine", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.local/share/custodia/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a commented default configuration file
    InitConfig {
        /// Data directory to record in the new config
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Split a file into erasure coded fragments in the local store
    Encode {
        /// File to encode
        #[arg(long)]
        input: PathBuf,

        /// Backup path id (e.g. 0/0/1)
        #[arg(long)]
        path_id: String,

        /// Backup version (e.g. F20240101)
        #[arg(long)]
        version: String,

        /// Erasure scheme
        #[arg(long, default_value = "ecc/4x4")]
        scheme: String,

        /// Payload bytes per block
        #[arg(long, default_value_t = encode::DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },

    /// Restore a backup from the local fragment store only
    Restore {
        /// Backup path id
        #[arg(long)]
        path_id: String,

        /// Backup version
        #[arg(long)]
        version: String,

        /// Erasure scheme the backup was written with
        #[arg(long, default_value = "ecc/4x4")]
        scheme: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,

        /// Give up when the local fragments do not finish the restore in time
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },

    /// Show the persisted connectivity label of suppliers
    SupplierStatus {
        /// Customer id
        #[arg(long)]
        customer: String,

        /// Supplier ids
        #[arg(required = true)]
        suppliers: Vec<String>,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::InitConfig { data_dir, force } => {
            init_config::execute(&config_path, data_dir, force)
        }
        Commands::Encode {
            input,
            path_id,
            version,
            scheme,
            block_size,
        } => {
            let config = load(&config_path)?;
            encode::execute(&config, &input, path_id, version, &scheme, block_size).await
        }
        Commands::Restore {
            path_id,
            version,
            scheme,
            output,
            timeout,
        } => {
            let config = load(&config_path)?;
            restore::execute(&config, path_id, version, scheme, &output, timeout).await
        }
        Commands::SupplierStatus {
            customer,
            suppliers,
        } => {
            let config = load(&config_path)?;
            supplier_status::execute(&config, &customer, &suppliers)
        }
    }
}

/// Load (or create) the config and install the log subscriber.
fn load(path: &Path) -> Result<CustodiaConfig, Box<dyn std::error::Error>> {
    let config = CustodiaConfig::load_or_create(path)?;
    init_logging(&config.logging.level);
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // a second install (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
