//! A small CLI exercising [`pprfvault::Volume`] end to end against a plain
//! file standing in for a block device. Not the out-of-scope production CLI
//! described in `registry.rs` — just enough surface to create a volume,
//! look up and forget keys, and trigger both rotations by hand.

use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use tracing_subscriber::EnvFilter;

use pprfvault::anchor::FileAnchor;
use pprfvault::config::VolumeConfig;
use pprfvault::device::Volume;
use pprfvault::error::Error;
use pprfvault::io::StatIo;
use pprfvault::secret::Secret;

#[derive(Parser)]
#[command(name = "pprfvault-demo", about = "Drive a pprfvault volume from the command line")]
struct Cli {
    /// Backing file standing in for the block device.
    #[arg(long, default_value = "vault.img")]
    device: PathBuf,

    /// File standing in for the sealed root-of-trust anchor.
    #[arg(long, default_value = "vault.anchor")]
    anchor: PathBuf,

    /// Optional TOML file of `VolumeConfig` overrides.
    #[arg(long)]
    config: Option<String>,

    /// Owner-authentication bytes gating the anchor slot.
    #[arg(long, default_value = "demo-owner")]
    owner_auth: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Formats a fresh volume of the given size.
    Init {
        #[arg(long, default_value_t = 1 << 16)]
        sectors: u64,
    },
    /// Resolves an inode's content key, reporting whether it came from the
    /// map cache or the key table.
    Lookup { inode: u64 },
    /// Replaces an inode's key in place without forgetting the old tag.
    Rekey { inode: u64 },
    /// Forgets an inode's key for good: rekeys it, then punctures its tag.
    Unlink { inode: u64 },
    /// Forces a PPRF rotation regardless of the refresh-interval policy.
    RotatePprf,
    /// Forces a master-key rotation.
    RotateMaster,
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => VolumeConfig::load(path)?,
        None => VolumeConfig::default(),
    };
    let owner_auth = Secret::new(cli.owner_auth.into_bytes());
    let mut rng = OsRng;

    if let Command::Init { sectors } = cli.command {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&cli.device)?;
        file.set_len(sectors * pprfvault::io::SECTOR_SIZE as u64)?;
        let anchor = FileAnchor::open(&cli.anchor)?;
        let volume = Volume::create(StatIo::new(file), sectors, &cfg, &owner_auth, 0, anchor, &mut rng)?;
        tracing::info!(sectors, "volume created");
        volume.close();
        return Ok(());
    }

    let file = OpenOptions::new().read(true).write(true).open(&cli.device)?;
    let anchor = FileAnchor::open(&cli.anchor)?;
    let volume = Volume::open(StatIo::new(file), &owner_auth, 0, anchor, &cfg)?;

    match cli.command {
        Command::Init { .. } => unreachable!(),
        Command::Lookup { inode } => {
            let (key, iv) = volume.lookup(inode)?;
            println!("inode {inode}: key={} iv={}", hex::encode(key), hex::encode(iv));
        }
        Command::Rekey { inode } => {
            volume.rekey(inode, &mut rng)?;
            tracing::info!(inode, "rekeyed");
        }
        Command::Unlink { inode } => {
            volume.unlink(inode, &mut rng)?;
            tracing::info!(inode, "unlinked");
        }
        Command::RotatePprf => {
            volume.rotate_pprf(&mut rng)?;
            tracing::info!("pprf rotated");
        }
        Command::RotateMaster => {
            volume.rotate_master(&mut rng)?;
            tracing::info!("master key rotated");
        }
    }

    volume.close();
    Ok(())
}
