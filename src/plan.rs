use std::{fmt, sync::OnceLock};

use regex::Regex;
use tracing::debug;

use crate::{
    entry::ServerEntry,
    error::Error,
    prompt::Prompter,
    resolver::{CredentialResolver, SecretPolicy},
    secret::Secret,
    store::EntryStore,
    vault::VaultCli,
};

pub const DEFAULT_SSH_PORT: u16 = 22;

// hosts are often pasted from a browser or the CRM login page
const KNOWN_SUFFIXES: [&str; 1] = ["/App-Role/baseLogin"];

/// Strip a leading `http://`/`https://` and known trailing path suffixes.
/// Applying it to its own output is a no-op.
pub fn normalize_host(raw: &str) -> String {
    static SCHEME: OnceLock<Regex> = OnceLock::new();
    let scheme = SCHEME.get_or_init(|| Regex::new(r"(?i)^https?://").unwrap());

    let mut host = raw.trim().to_string();
    loop {
        let mut next = scheme.replace(&host, "").into_owned();
        for suffix in KNOWN_SUFFIXES {
            if let Some(stripped) = next.strip_suffix(suffix) {
                next = stripped.to_string();
            }
        }
        let next = next.trim_end_matches('/').to_string();
        if next == host {
            return host;
        }
        host = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// `user@host`, as ssh and scp expect it.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host[:port]` for `-J`.
    pub fn jump_spec(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            self.target()
        } else {
            format!("{}:{}", self.target(), self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Password(Secret),
    KeyOrAgent,
}

/// Fully resolved connection parameters. Built once, then only read.
#[derive(Debug, Clone)]
pub struct ConnectionPlan {
    destination: Endpoint,
    jump: Option<Endpoint>,
    auth: Auth,
}

impl ConnectionPlan {
    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    pub fn jump(&self) -> Option<&Endpoint> {
        self.jump.as_ref()
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }
}

/// What the user asked to connect to.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub entry: String,
    pub use_jump: bool,
    pub port: Option<u16>,
}

/// Look up the destination (and jump host when requested), resolve their
/// credentials destination first, and assemble the plan.
///
/// Both entries are looked up before any credential is resolved, so a
/// missing jump host fails before the vault or the user is bothered.
pub fn build_plan<C: VaultCli, P: Prompter>(
    request: &ConnectRequest,
    store: &EntryStore,
    jump_entry: Option<&str>,
    resolver: &mut CredentialResolver<'_, C, P>,
) -> Result<ConnectionPlan, Error> {
    let dest_entry = store.find(&request.entry)?;
    let dest_host = usable_host(dest_entry)
        .ok_or_else(|| Error::InvalidEntry(format!("'{}' has no IP/hostname", dest_entry.name)))?;

    let jump_entry = if request.use_jump {
        let name = jump_entry.ok_or_else(|| {
            Error::JumpServerUnresolved("JUMP_SERVER_ENTRY is not configured".into())
        })?;
        let entry = store.find(name).map_err(|_| {
            Error::JumpServerUnresolved(format!("jump entry '{name}' is not in the server list"))
        })?;
        let host = usable_host(entry).ok_or_else(|| {
            Error::JumpServerUnresolved(format!("jump entry '{name}' has no IP/hostname"))
        })?;
        Some((entry, host))
    } else {
        None
    };

    let dest_creds = resolver.resolve(dest_entry, &dest_host, SecretPolicy::Prompt)?;
    let destination = Endpoint {
        user: dest_creds.username,
        host: dest_host,
        port: request
            .port
            .or(dest_entry.port)
            .unwrap_or(DEFAULT_SSH_PORT),
    };

    let jump = match jump_entry {
        Some((entry, host)) => {
            let creds = resolver.resolve(entry, &host, SecretPolicy::KeyOnly)?;
            Some(Endpoint {
                user: creds.username,
                host,
                port: entry.port.unwrap_or(DEFAULT_SSH_PORT),
            })
        }
        None => None,
    };

    let auth = match dest_creds.secret {
        Some(secret) => Auth::Password(secret),
        None => Auth::KeyOrAgent,
    };

    debug!(
        "plan: {} via {:?}, password auth: {}",
        destination,
        jump.as_ref().map(Endpoint::to_string),
        matches!(auth, Auth::Password(_))
    );

    Ok(ConnectionPlan {
        destination,
        jump,
        auth,
    })
}

fn usable_host(entry: &ServerEntry) -> Option<String> {
    Some(normalize_host(&entry.host)).filter(|host| !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prompt::testing::ScriptedPrompter,
        vault::{
            testing::{credentials, FakeVault},
            VaultSession,
        },
    };

    fn store(entries: Vec<ServerEntry>) -> (tempfile::TempDir, EntryStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EntryStore::open_for_write(dir.path().join("servers.json")).unwrap();
        for entry in entries {
            store.add(entry).unwrap();
        }
        (dir, store)
    }

    fn request(entry: &str, use_jump: bool) -> ConnectRequest {
        ConnectRequest {
            entry: entry.into(),
            use_jump,
            port: None,
        }
    }

    #[test]
    fn normalize_strips_scheme_and_suffix() {
        assert_eq!(normalize_host("https://10.0.0.5/App-Role/baseLogin"), "10.0.0.5");
        assert_eq!(normalize_host("http://host.example"), "host.example");
        assert_eq!(normalize_host("HTTPS://host.example/"), "host.example");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "10.0.0.5",
            "https://http://a.b/App-Role/baseLogin/",
            "  web.local ",
            "https://x/App-Role/baseLogin/App-Role/baseLogin",
        ] {
            let once = normalize_host(raw);
            assert_eq!(normalize_host(&once), once, "input {raw:?}");
        }
        assert_eq!(normalize_host("db.internal"), "db.internal");
    }

    #[test]
    fn direct_plan_with_key_auth() {
        let (_dir, store) = store(vec![ServerEntry::new(
            "db1",
            "https://10.0.0.5/App-Role/baseLogin",
        )
        .with_username("alice")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[""]);
        let mut resolver = CredentialResolver::new(Some(&mut vault), &mut prompter);

        let plan = build_plan(&request("db1", false), &store, None, &mut resolver).unwrap();

        assert_eq!(plan.destination().target(), "alice@10.0.0.5");
        assert_eq!(plan.destination().port, DEFAULT_SSH_PORT);
        assert_eq!(plan.auth(), &Auth::KeyOrAgent);
        assert!(plan.jump().is_none());
        drop(resolver);
        assert!(log.borrow().calls.is_empty());
    }

    #[test]
    fn shared_vault_item_is_fetched_once() {
        let (_dir, store) = store(vec![
            ServerEntry::new("web1", "web.local").with_secret_ref("WebVaultItem"),
            ServerEntry::new("bastion", "gate.local")
                .with_secret_ref("WebVaultItem")
                .with_port(2200),
        ]);
        let (cli, log) = FakeVault::new();
        let cli = cli.with_item("WebVaultItem", Some("svc"), Some("p@ss"));
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[]);
        let mut resolver = CredentialResolver::new(Some(&mut vault), &mut prompter);

        let plan =
            build_plan(&request("web1", true), &store, Some("bastion"), &mut resolver).unwrap();

        assert_eq!(plan.destination().target(), "svc@web.local");
        assert_eq!(plan.auth(), &Auth::Password(Secret::new("p@ss")));
        let jump = plan.jump().unwrap();
        assert_eq!(jump.jump_spec(), "svc@gate.local:2200");
        assert_eq!(log.borrow().count("get"), 1);
    }

    #[test]
    fn missing_jump_entry_fails_before_resolving() {
        let (_dir, store) = store(vec![ServerEntry::new("web1", "web").with_secret_ref("Item")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[]);
        let mut resolver = CredentialResolver::new(Some(&mut vault), &mut prompter);

        let err =
            build_plan(&request("web1", true), &store, Some("bastion"), &mut resolver).unwrap_err();
        assert!(matches!(err, Error::JumpServerUnresolved(_)));

        let err = build_plan(&request("web1", true), &store, None, &mut resolver).unwrap_err();
        assert!(matches!(err, Error::JumpServerUnresolved(_)));

        drop(resolver);
        assert!(log.borrow().calls.is_empty());
        assert!(prompter.asked.is_empty());
    }

    #[test]
    fn unknown_destination_is_not_found() {
        let (_dir, store) = store(vec![]);
        let mut prompter = ScriptedPrompter::new(&[]);
        let mut resolver = CredentialResolver::<FakeVault, _>::new(None, &mut prompter);

        let err = build_plan(&request("nope", false), &store, None, &mut resolver).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(_)));
    }

    #[test]
    fn requested_port_overrides_entry_port() {
        let (_dir, store) = store(vec![ServerEntry::new("a", "h").with_username("u").with_port(2222)]);
        let mut prompter = ScriptedPrompter::new(&["", ""]);
        let mut resolver = CredentialResolver::<FakeVault, _>::new(None, &mut prompter);

        let plan = build_plan(&request("a", false), &store, None, &mut resolver).unwrap();
        assert_eq!(plan.destination().port, 2222);

        let mut req = request("a", false);
        req.port = Some(8022);
        let plan = build_plan(&req, &store, None, &mut resolver).unwrap();
        assert_eq!(plan.destination().port, 8022);
    }
}
