//! Error types shared by every stage of a connection attempt.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("entry '{0}' not found")]
    EntryNotFound(String),

    #[error("server store {path:?} is corrupt: {source}")]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("server store {path:?} is unreadable: {source}")]
    StoreUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing vault credentials (BW_CLIENTID, BW_CLIENTSECRET and BW_PASSWORD are required)")]
    MissingVaultCredentials,

    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    #[error("could not fetch '{item}' from the vault: {reason}")]
    VaultFetchFailed { item: String, reason: String },

    #[error("jump server unresolved: {0}")]
    JumpServerUnresolved(String),

    #[error("{purpose} failed ({status})")]
    ExternalProcessFailed { purpose: String, status: ExitState },

    #[error("an entry named '{0}' already exists")]
    DuplicateEntry(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a delegated process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Code(i32),
    Signal,
    NotStarted,
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Code(code) => write!(f, "exit code {code}"),
            ExitState::Signal => write!(f, "terminated by signal"),
            ExitState::NotStarted => write!(f, "could not be started"),
        }
    }
}

impl Error {
    /// Exit code to hand back to the shell when this error ends the process.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::ExternalProcessFailed {
                status: ExitState::Code(code),
                ..
            } if (1..=255).contains(code) => *code as u8,
            _ => 1,
        }
    }
}
