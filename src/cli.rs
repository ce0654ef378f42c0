use std::{ffi::OsStr, path::PathBuf};

use clap::{Parser, Subcommand};
use clap_complete::{
    engine::{ArgValueCompleter, CompletionCandidate},
    Shell,
};

use crate::{config::Config, entry::ServerEntry, launcher::Action, store::EntryStore};

#[derive(Parser)]
#[command(name = "sshhop", version)]
#[command(about = "Connect to saved servers over SSH/SCP, optionally through a jump host", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a server (pick one interactively when no entry is given)
    #[command(visible_alias = "c")]
    Connect {
        /// Entry name
        #[arg(add = ArgValueCompleter::new(complete_entry_names))]
        entry: Option<String>,
        /// Route through the jump server named by JUMP_SERVER_ENTRY
        #[arg(short, long)]
        jump: bool,
        /// Port override for the destination
        #[arg(short, long)]
        port: Option<u16>,
        /// Upload a file, then open a shell
        #[arg(short, long, num_args = 2, value_names = ["LOCAL", "REMOTE"], conflicts_with = "download")]
        upload: Option<Vec<String>>,
        /// Download a file; no shell is opened afterwards
        #[arg(short, long, num_args = 2, value_names = ["REMOTE", "LOCAL"])]
        download: Option<Vec<String>>,
    },
    /// Add a new server entry
    Add {
        /// Entry name
        entry: Option<String>,
        /// IP address or hostname
        #[arg(long)]
        host: Option<String>,
        /// SSH username
        #[arg(long)]
        user: Option<String>,
        /// Vault item holding the login
        #[arg(long)]
        vault_item: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// List server entries, optionally filtered by name
    #[command(visible_alias = "ls")]
    List { filter: Option<String> },
    /// Edit a server entry field by field
    Edit {
        #[arg(add = ArgValueCompleter::new(complete_entry_names))]
        entry: String,
    },
    /// Remove a server entry
    #[command(visible_alias = "rm")]
    Remove {
        #[arg(add = ArgValueCompleter::new(complete_entry_names))]
        entry: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Import hosts from an OpenSSH client config
    Import {
        /// Config file to read instead of ~/.ssh/config
        #[arg(long)]
        ssh_config: Option<PathBuf>,
    },
    /// Print a shell completion script
    ///
    /// Entry names complete dynamically after `source <(COMPLETE=bash sshhop)`.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Entry names from the configured store, for shell completion. Any error
/// just means no candidates.
fn complete_entry_names(current: &OsStr) -> Vec<CompletionCandidate> {
    let Some(prefix) = current.to_str() else {
        return Vec::new();
    };
    let Ok(config) = Config::load() else {
        return Vec::new();
    };
    let Ok(store) = EntryStore::open(&config.store_path) else {
        return Vec::new();
    };

    names_starting_with(&store, prefix)
        .into_iter()
        .map(CompletionCandidate::new)
        .collect()
}

fn names_starting_with(entries: &[ServerEntry], prefix: &str) -> Vec<String> {
    let prefix = prefix.to_lowercase();
    entries
        .iter()
        .filter(|entry| entry.name.to_lowercase().starts_with(&prefix))
        .map(|entry| entry.name.clone())
        .collect()
}

/// Turn the upload/download pairs into a launcher action.
pub fn transfer_action(upload: Option<Vec<String>>, download: Option<Vec<String>>) -> Action {
    let pair = |mut values: Vec<String>| {
        let second = values.pop().unwrap_or_default();
        let first = values.pop().unwrap_or_default();
        (first, second)
    };

    match (upload, download) {
        (Some(values), _) => {
            let (local, remote) = pair(values);
            Action::Upload { local, remote }
        }
        (None, Some(values)) => {
            let (remote, local) = pair(values);
            Action::Download { remote, local }
        }
        (None, None) => Action::OpenShell,
    }
}
