use anyhow::{Context, Result};
use clap::Parser;
use ota_core::partition::PartitionTable;
use ota_core::session::{SessionConfig, UpdateSession};
use ota_core::storage::FileFlash;
use ota_core::transport::ReaderTransport;
use ota_core::upgrader::FlashUpgrader;
use ota_core::verify::Sha256Verifier;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Slot-based firmware upgrade tool", long_about = None)]
struct Args {
    /// Path to the flash image file
    #[arg(long)]
    flash: String,

    /// Path to the partition table (TOML)
    #[arg(long)]
    table: String,

    /// Packaged firmware transfer to apply
    #[arg(long)]
    image: String,

    /// Slot the device is currently running from
    #[arg(long, default_value_t = 0)]
    running_slot: u8,

    /// Erase block size of the flash image
    #[arg(long, default_value_t = 4096)]
    block_size: u32,

    /// Transport chunk size in bytes
    #[arg(long, default_value_t = 512)]
    chunk_size: usize,

    /// Hex-encoded key for encrypted transfers
    #[arg(long)]
    xor_key: Option<String>,

    /// Decode and verify but leave the boot pointer unchanged
    #[arg(long)]
    no_commit: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args) -> Result<u8> {
    let table_text = std::fs::read_to_string(&args.table)
        .with_context(|| format!("reading partition table {}", args.table))?;
    let table = PartitionTable::from_toml(&table_text)?;

    let flash = FileFlash::open(&args.flash, args.block_size)
        .with_context(|| format!("opening flash image {}", args.flash))?;

    let upgrader = FlashUpgrader::new(flash, table, args.running_slot)?
        .with_verifier(Box::new(Sha256Verifier::new()));

    let config = SessionConfig {
        chunk_size: args.chunk_size,
        commit: !args.no_commit,
        xor_key: args.xor_key.clone(),
    };

    let image = std::fs::File::open(&args.image)
        .with_context(|| format!("opening firmware image {}", args.image))?;
    let mut transport = ReaderTransport::new(image, config.chunk_size);

    let mut session = UpdateSession::new(config, upgrader);
    session.run(&mut transport)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(&args) {
        Ok(slot) => {
            info!(slot, "Upgrade applied");
            println!("{slot}");
        }
        Err(e) => {
            error!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
