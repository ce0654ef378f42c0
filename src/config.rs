//! Startup configuration.
//!
//! Values come from `<home>/.env` overlaid by the process environment and are
//! read exactly once; the rest of the crate only sees the resulting [`Config`].

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{error::Error, secret::Secret};

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

const HOME_VAR: &str = "SSHHOP_HOME";
const ENV_FILE: &str = ".env";
const DEFAULT_STORE_FILE: &str = "servers.json";
const DEFAULT_VAULT_PROGRAM: &str = "bw";

pub const BW_CLIENTID: &str = "BW_CLIENTID";
pub const BW_CLIENTSECRET: &str = "BW_CLIENTSECRET";
pub const BW_PASSWORD: &str = "BW_PASSWORD";
const JUMP_SERVER_ENTRY: &str = "JUMP_SERVER_ENTRY";
const SERVERS_LOCAL_FILE: &str = "SERVERS_LOCAL_FILE";
const DEFAULT_USERNAME: &str = "DEFAULT_USERNAME";
const BW_BIN: &str = "BW_BIN";

const KNOWN_KEYS: [&str; 7] = [
    BW_CLIENTID,
    BW_CLIENTSECRET,
    BW_PASSWORD,
    JUMP_SERVER_ENTRY,
    SERVERS_LOCAL_FILE,
    DEFAULT_USERNAME,
    BW_BIN,
];

/// Out-of-band credentials used to log in to and unlock the vault.
#[derive(Debug, Clone)]
pub struct VaultCredentials {
    pub client_id: String,
    pub client_secret: Secret,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub store_path: PathBuf,
    pub jump_entry: Option<String>,
    pub default_username: Option<String>,
    pub vault: Option<VaultCredentials>,
    pub vault_program: String,
}

impl Config {
    /// Resolve the home directory, read its `.env` and overlay the process
    /// environment.
    pub fn load() -> Result<Self, Error> {
        let home = match std::env::var_os(HOME_VAR) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::config_dir()
                .map(|dir| dir.join(CRATE_NAME))
                .ok_or_else(|| {
                    Error::ConfigMissing(format!(
                        "{HOME_VAR} is not set and no config directory is available"
                    ))
                })?,
        };

        let mut vars = read_env_file(&home.join(ENV_FILE))?;
        for key in KNOWN_KEYS {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        Ok(Self::from_vars(home, &vars))
    }

    pub fn from_vars(home: PathBuf, vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let store_file = get(SERVERS_LOCAL_FILE).unwrap_or_else(|| DEFAULT_STORE_FILE.to_string());
        // Path::join keeps absolute paths as they are
        let store_path = home.join(store_file);

        let vault = match (get(BW_CLIENTID), get(BW_CLIENTSECRET), get(BW_PASSWORD)) {
            (Some(client_id), Some(client_secret), Some(password)) => Some(VaultCredentials {
                client_id,
                client_secret: Secret::new(client_secret),
                password: Secret::new(password),
            }),
            _ => None,
        };

        Self {
            store_path,
            jump_entry: get(JUMP_SERVER_ENTRY),
            default_username: get(DEFAULT_USERNAME),
            vault,
            vault_program: get(BW_BIN).unwrap_or_else(|| DEFAULT_VAULT_PROGRAM.to_string()),
            home,
        }
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, Error> {
    let mut vars = HashMap::new();
    if !path.exists() {
        debug!("no env file at {:?}", path);
        return Ok(vars);
    }

    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| Error::ConfigMissing(format!("cannot read {:?}: {e}", path)))?;
    for item in iter {
        let (key, value) =
            item.map_err(|e| Error::ConfigMissing(format!("invalid line in {:?}: {e}", path)))?;
        vars.insert(key, value);
    }

    Ok(vars)
}
