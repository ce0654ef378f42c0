//! Vault session lifecycle on top of the Bitwarden CLI.
//!
//! A [`VaultSession`] is created cold and only talks to the CLI on the first
//! [`VaultSession::fetch`]. It logs in if needed, syncs, unlocks, keeps the
//! session key in memory and caches every lookup (including failed ones) for
//! the rest of the invocation. The vault is locked once, on
//! [`VaultSession::teardown`] or drop, and only if it was unlocked.

use std::{
    collections::HashMap,
    io::ErrorKind,
    process::{Command, Output, Stdio},
};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::{VaultCredentials, BW_CLIENTID, BW_CLIENTSECRET, BW_PASSWORD},
    error::Error,
    secret::Secret,
};

const FLATPAK_APP: &str = "com.bitwarden.desktop";

/// Login fields of a vault item. Either may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultLogin {
    pub username: Option<String>,
    pub password: Option<Secret>,
}

/// The external vault operations the session needs.
pub trait VaultCli {
    fn is_logged_in(&mut self) -> Result<bool, Error>;
    fn login(&mut self, credentials: &VaultCredentials) -> Result<(), Error>;
    fn sync(&mut self) -> Result<(), Error>;
    fn unlock(&mut self, credentials: &VaultCredentials) -> Result<Secret, Error>;
    fn get_item(&mut self, item: &str, session: &Secret) -> Result<VaultLogin, Error>;
    fn lock(&mut self) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Uninitialized,
    LoggedOut,
    LoggedIn,
    Unlocked,
    /// Login or unlock failed; lookups fall back to prompting.
    Unavailable,
    Locked,
}

pub struct VaultSession<C: VaultCli> {
    cli: C,
    credentials: Option<VaultCredentials>,
    state: VaultState,
    session_key: Option<Secret>,
    cache: HashMap<String, VaultLogin>,
}

impl<C: VaultCli> VaultSession<C> {
    pub fn new(cli: C, credentials: Option<VaultCredentials>) -> Self {
        Self {
            cli,
            credentials,
            state: VaultState::Uninitialized,
            session_key: None,
            cache: HashMap::new(),
        }
    }

    pub fn state(&self) -> VaultState {
        self.state
    }

    /// True once a session key has been obtained.
    pub fn was_unlocked(&self) -> bool {
        self.session_key.is_some()
    }

    /// Look up `item`, consulting the cache first.
    ///
    /// Only a missing out-of-band credential is an error. Every other failure
    /// is logged, cached as an empty result and returned as such so that the
    /// caller falls back to prompting.
    pub fn fetch(&mut self, item: &str) -> Result<VaultLogin, Error> {
        if let Some(hit) = self.cache.get(item) {
            debug!("vault cache hit for '{item}'");
            return Ok(hit.clone());
        }

        let login = match self.ensure_session()? {
            Some(session) => {
                info!("Fetching credentials from the vault for '{item}'...");
                match self.cli.get_item(item, &session) {
                    Ok(login) => {
                        info!("Credentials retrieved");
                        login
                    }
                    Err(err) => {
                        warn!("{}", Error::VaultFetchFailed {
                            item: item.to_string(),
                            reason: err.to_string(),
                        });
                        VaultLogin::default()
                    }
                }
            }
            None => VaultLogin::default(),
        };

        self.cache.insert(item.to_string(), login.clone());
        Ok(login)
    }

    /// Returns the session key, or `None` if the vault is unavailable for
    /// this invocation.
    fn ensure_session(&mut self) -> Result<Option<Secret>, Error> {
        match self.state {
            VaultState::Unlocked => return Ok(self.session_key.clone()),
            VaultState::Unavailable | VaultState::Locked => return Ok(None),
            _ => {}
        }

        let credentials = self
            .credentials
            .clone()
            .ok_or(Error::MissingVaultCredentials)?;

        match self.open(&credentials) {
            Ok(session) => {
                self.session_key = Some(session.clone());
                self.state = VaultState::Unlocked;
                Ok(Some(session))
            }
            Err(err) => {
                warn!("{err}; falling back to manual credentials");
                self.state = VaultState::Unavailable;
                Ok(None)
            }
        }
    }

    fn open(&mut self, credentials: &VaultCredentials) -> Result<Secret, Error> {
        info!("Checking vault login status");
        if self.cli.is_logged_in()? {
            info!("Already logged in");
            self.state = VaultState::LoggedIn;
        } else {
            self.state = VaultState::LoggedOut;
            info!("Logging into the vault...");
            self.cli.login(credentials)?;
            self.state = VaultState::LoggedIn;
        }

        info!("Synchronizing vault");
        match self.cli.sync() {
            Ok(()) => info!("Vault synchronized"),
            Err(err) => warn!("vault could not be synced: {err}"),
        }

        info!("Unlocking vault...");
        let session = self.cli.unlock(credentials)?;
        info!("Vault unlocked");
        Ok(session)
    }

    /// Lock the vault if this session unlocked it. Runs at most once.
    pub fn teardown(&mut self) {
        if self.state != VaultState::Unlocked {
            return;
        }
        self.state = VaultState::Locked;
        self.session_key = None;

        info!("Locking vault...");
        if let Err(err) = self.cli.lock() {
            warn!("failed to lock the vault: {err}");
        }
    }
}

impl<C: VaultCli> Drop for VaultSession<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// [`VaultCli`] backed by the `bw` binary, falling back to the flatpak build.
pub struct BitwardenCli {
    program: String,
}

impl BitwardenCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(
        &self,
        args: &[&str],
        envs: &[(&str, &str)],
        capture_stdout: bool,
    ) -> Result<Output, Error> {
        let build = |program: &str, prefix: &[&str]| {
            let mut cmd = Command::new(program);
            cmd.args(prefix)
                .args(args)
                .envs(envs.iter().copied())
                .stdin(Stdio::null())
                .stderr(Stdio::piped());
            if capture_stdout {
                cmd.stdout(Stdio::piped());
            } else {
                cmd.stdout(Stdio::null());
            }
            cmd
        };

        match build(&self.program, &[]).output() {
            Ok(output) => Ok(output),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("'{}' not found, trying flatpak", self.program);
                let prefix = ["run", "--command=bw", FLATPAK_APP];
                build("flatpak", &prefix).output().map_err(|err| {
                    Error::VaultUnavailable(format!(
                        "'{}' is not installed and the flatpak fallback failed: {err}",
                        self.program
                    ))
                })
            }
            Err(err) => Err(Error::VaultUnavailable(format!(
                "failed to run '{}': {err}",
                self.program
            ))),
        }
    }

    fn check(output: Output, purpose: &str) -> Result<Output, Error> {
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.trim();
        Err(Error::VaultUnavailable(if reason.is_empty() {
            format!("{purpose} failed ({})", output.status)
        } else {
            format!("{purpose} failed: {reason}")
        }))
    }
}

impl VaultCli for BitwardenCli {
    fn is_logged_in(&mut self) -> Result<bool, Error> {
        let output = self.run(&["login", "--check"], &[], false)?;
        Ok(output.status.success())
    }

    fn login(&mut self, credentials: &VaultCredentials) -> Result<(), Error> {
        let envs = [
            (BW_CLIENTID, credentials.client_id.as_str()),
            (BW_CLIENTSECRET, credentials.client_secret.expose()),
        ];
        let output = self.run(&["login", "--apikey", "--quiet"], &envs, false)?;
        Self::check(output, "vault login").map(|_| ())
    }

    fn sync(&mut self) -> Result<(), Error> {
        let output = self.run(&["sync"], &[], false)?;
        Self::check(output, "vault sync").map(|_| ())
    }

    fn unlock(&mut self, credentials: &VaultCredentials) -> Result<Secret, Error> {
        let envs = [(BW_PASSWORD, credentials.password.expose())];
        let output = self.run(&["unlock", "--raw", "--passwordenv", BW_PASSWORD], &envs, true)?;
        let output = Self::check(output, "vault unlock")?;

        let key = String::from_utf8(output.stdout)
            .map_err(|_| Error::VaultUnavailable("session key is not valid UTF-8".into()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::VaultUnavailable("unlock returned no session key".into()));
        }
        ensure_plain_argument(key, "session key")?;
        Ok(Secret::new(key))
    }

    fn get_item(&mut self, item: &str, session: &Secret) -> Result<VaultLogin, Error> {
        ensure_plain_argument(item, "item name")?;
        // the session key goes through the environment so it stays out of argv
        let envs = [("BW_SESSION", session.expose())];
        let output = self.run(&["get", "item", item], &envs, true)?;
        let output = Self::check(output, "vault lookup")?;
        parse_item(&output.stdout)
            .map_err(|e| Error::VaultUnavailable(format!("unexpected item format: {e}")))
    }

    fn lock(&mut self) -> Result<(), Error> {
        let output = self.run(&["lock"], &[], false)?;
        Self::check(output, "vault lock").map(|_| ())
    }
}

/// Values handed to the vault CLI must be a single plain argument.
fn ensure_plain_argument(value: &str, what: &str) -> Result<(), Error> {
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_control) {
        return Err(Error::VaultUnavailable(format!(
            "refusing to pass {what} {value:?} to the vault CLI"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct Item {
    #[serde(default)]
    login: Option<ItemLogin>,
}

#[derive(Deserialize)]
struct ItemLogin {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

fn parse_item(data: &[u8]) -> Result<VaultLogin, serde_json::Error> {
    let item: Item = serde_json::from_slice(data)?;
    let login = item.login.unwrap_or(ItemLogin {
        username: None,
        password: None,
    });

    Ok(VaultLogin {
        username: login.username.filter(|u| !u.is_empty()),
        password: login.password.filter(|p| !p.is_empty()).map(Secret::new),
    })
}
