//! Thin CLI wiring. All real logic lives in the library; this module only
//! parses arguments and calls into `bundler`/`restore`/`store`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::crypto::{Crypter, GpgAgentKeyProvider};
use crate::error::Result;
use crate::lsn::Lsn;

#[derive(Parser, Debug)]
#[command(name = "basewardenctl", about = "Continuous archiving and PITR for WAL-based databases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bundle a data directory into a new full or incremental backup.
    BackupPush {
        data_dir: PathBuf,
        #[arg(long)]
        store_dir: PathBuf,
        #[arg(long)]
        backup_name: String,
        #[arg(long)]
        start_lsn: u64,
        #[arg(long)]
        finish_lsn: u64,
        #[arg(long)]
        incremental_from: Option<String>,
    },
    /// Fetch and restore a backup (or `LATEST`) into a target directory.
    BackupFetch {
        name: String,
        #[arg(long)]
        store_dir: PathBuf,
        #[arg(long)]
        target_dir: PathBuf,
    },
    /// List known backups by scanning for sentinel objects.
    BackupList {
        #[arg(long)]
        store_dir: PathBuf,
    },
}

pub fn run() -> Cli {
    Cli::parse()
}

pub fn run_cli_app(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let key_provider: Option<Box<dyn crate::crypto::KeyProvider>> = config
        .encryption_enabled()
        .then(|| Box::new(GpgAgentKeyProvider::new()) as Box<_>);
    let crypter = config
        .gpg_key_id
        .clone()
        .zip(key_provider)
        .map(|(key_id, provider)| Crypter::new(key_id, provider));

    match cli.command {
        Command::BackupPush {
            data_dir,
            store_dir,
            backup_name,
            start_lsn,
            finish_lsn,
            incremental_from,
        } => {
            use crate::bundler::{Bundler, ParentBackup};
            use crate::store::local_fs::LocalFsStore;

            let store = LocalFsStore::new(&store_dir);
            let bundler = Bundler::new(&config, crypter.as_ref(), &store);

            let parent_sentinel;
            let parent = match incremental_from {
                Some(parent_name) => {
                    let key = crate::sentinel::sentinel_key(&parent_name);
                    let mut reader = {
                        use crate::store::Store;
                        store.read_object(&key)?
                    };
                    let mut bytes = Vec::new();
                    std::io::Read::read_to_end(&mut reader, &mut bytes)?;
                    parent_sentinel = crate::sentinel::Sentinel::from_json(&bytes)?;
                    Some(ParentBackup {
                        name: &parent_name,
                        sentinel: &parent_sentinel,
                    })
                }
                None => None,
            };

            bundler.bundle(
                &data_dir,
                &backup_name,
                Lsn(start_lsn),
                Lsn(finish_lsn),
                parent,
                &[],
            )?;
            println!("backup {backup_name} complete");
        }
        Command::BackupFetch {
            name,
            store_dir,
            target_dir,
        } => {
            use crate::restore::RestoreDriver;
            use crate::store::local_fs::LocalFsStore;

            let store = LocalFsStore::new(&store_dir);
            let driver = RestoreDriver::new(&config, crypter.as_ref(), &store);
            driver.restore(&name, &target_dir)?;
            println!("restored into {}", target_dir.display());
        }
        Command::BackupList { store_dir } => {
            use crate::sentinel::backup_name_from_sentinel_key;
            use crate::store::local_fs::LocalFsStore;
            use crate::store::Store;

            let store = LocalFsStore::new(&store_dir);
            let (objects, _) = store.list_folder()?;
            for key in objects {
                if let Some(name) = backup_name_from_sentinel_key(&key) {
                    println!("{name}");
                }
            }
        }
    }

    Ok(())
}
