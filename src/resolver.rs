//! Credential resolution for a single entry.
//!
//! Precedence is fixed: vault password, vault username, entry username, then
//! interactive prompt.

use tracing::debug;

use crate::{
    entry::ServerEntry,
    error::Error,
    prompt::Prompter,
    secret::Secret,
    vault::{VaultCli, VaultLogin, VaultSession},
};

/// Whether a missing password should be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretPolicy {
    Prompt,
    /// Key or agent authentication only (jump hosts).
    KeyOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// `None` means key or agent authentication.
    pub secret: Option<Secret>,
}

pub struct CredentialResolver<'a, C: VaultCli, P: Prompter> {
    vault: Option<&'a mut VaultSession<C>>,
    prompter: &'a mut P,
}

impl<'a, C: VaultCli, P: Prompter> CredentialResolver<'a, C, P> {
    pub fn new(vault: Option<&'a mut VaultSession<C>>, prompter: &'a mut P) -> Self {
        Self { vault, prompter }
    }

    /// `host` is the normalized address, only used in prompt labels.
    pub fn resolve(
        &mut self,
        entry: &ServerEntry,
        host: &str,
        policy: SecretPolicy,
    ) -> Result<Credentials, Error> {
        let from_vault = match (entry.secret_ref.as_deref(), self.vault.as_deref_mut()) {
            (Some(item), Some(vault)) => vault.fetch(item)?,
            (Some(item), None) => {
                debug!("no vault session for '{item}'");
                VaultLogin::default()
            }
            _ => VaultLogin::default(),
        };

        let username = match from_vault.username.or_else(|| entry.username.clone()) {
            Some(username) => username,
            None => self.ask_username(host)?,
        };

        let secret = match (policy, from_vault.password) {
            (SecretPolicy::Prompt, Some(password)) => Some(password),
            (SecretPolicy::Prompt, None) => {
                let password = self.prompter.ask_secret(&format!(
                    "Enter SSH password for {username}@{host} (empty for key auth): "
                ))?;
                Some(Secret::new(password)).filter(|p| !p.is_empty())
            }
            (SecretPolicy::KeyOnly, password) => {
                if password.is_some() {
                    debug!("ignoring vault password for key-only host {host}");
                }
                None
            }
        };

        Ok(Credentials { username, secret })
    }

    fn ask_username(&mut self, host: &str) -> Result<String, Error> {
        loop {
            let username = self.prompter.ask(&format!("SSH username for {host}: "))?;
            if !username.is_empty() {
                return Ok(username);
            }
            eprintln!("SSH username is required.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prompt::testing::ScriptedPrompter,
        vault::testing::{credentials, FakeVault},
    };

    #[test]
    fn vault_values_override_entry() {
        let (cli, log) = FakeVault::new();
        let cli = cli.with_item("WebVaultItem", Some("svc"), Some("p@ss"));
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[]);

        let entry = ServerEntry::new("web1", "web")
            .with_username("someone-else")
            .with_secret_ref("WebVaultItem");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "web", SecretPolicy::Prompt)
            .unwrap();

        assert_eq!(creds.username, "svc");
        assert_eq!(creds.secret.as_ref().map(Secret::expose), Some("p@ss"));
        assert!(prompter.asked.is_empty());
        assert_eq!(log.borrow().count("get"), 1);
    }

    #[test]
    fn entry_username_backs_up_vault_password() {
        let (cli, _log) = FakeVault::new();
        let cli = cli.with_item("Item", None, Some("pw"));
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[]);

        let entry = ServerEntry::new("a", "h").with_username("alice").with_secret_ref("Item");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "h", SecretPolicy::Prompt)
            .unwrap();

        assert_eq!(creds.username, "alice");
        assert_eq!(creds.secret.as_ref().map(Secret::expose), Some("pw"));
    }

    #[test]
    fn missing_vault_password_prompts() {
        let (cli, _log) = FakeVault::new();
        let cli = cli.with_item("Item", Some("svc"), None);
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&["typed"]);

        let entry = ServerEntry::new("a", "h").with_secret_ref("Item");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "h", SecretPolicy::Prompt)
            .unwrap();

        assert_eq!(creds.username, "svc");
        assert_eq!(creds.secret.as_ref().map(Secret::expose), Some("typed"));
        assert!(prompter.asked[0].contains("svc@h"));
    }

    #[test]
    fn no_secret_ref_never_touches_vault() {
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[""]);

        let entry = ServerEntry::new("db1", "10.0.0.5").with_username("alice");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "10.0.0.5", SecretPolicy::Prompt)
            .unwrap();

        assert_eq!(creds.username, "alice");
        assert_eq!(creds.secret, None);
        assert!(log.borrow().calls.is_empty());
        assert!(!vault.was_unlocked());
    }

    #[test]
    fn failed_fetch_falls_back_to_prompts() {
        let (cli, _log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&["", "bob", "secret"]);

        let entry = ServerEntry::new("a", "h").with_secret_ref("Gone");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "h", SecretPolicy::Prompt)
            .unwrap();

        assert_eq!(creds.username, "bob");
        assert_eq!(creds.secret.as_ref().map(Secret::expose), Some("secret"));
        // blank username is asked again
        assert_eq!(prompter.asked.len(), 3);
    }

    #[test]
    fn missing_vault_credentials_is_fatal() {
        let (cli, _log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, None);
        let mut prompter = ScriptedPrompter::new(&[]);

        let entry = ServerEntry::new("a", "h").with_secret_ref("Item");
        let err = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "h", SecretPolicy::Prompt)
            .unwrap_err();
        assert!(matches!(err, Error::MissingVaultCredentials));
    }

    #[test]
    fn key_only_never_prompts_for_password() {
        let (cli, _log) = FakeVault::new();
        let cli = cli.with_item("Jump", Some("hop"), Some("ignored"));
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut prompter = ScriptedPrompter::new(&[]);

        let entry = ServerEntry::new("jump", "j").with_secret_ref("Jump");
        let creds = CredentialResolver::new(Some(&mut vault), &mut prompter)
            .resolve(&entry, "j", SecretPolicy::KeyOnly)
            .unwrap();

        assert_eq!(creds.username, "hop");
        assert_eq!(creds.secret, None);
        assert!(prompter.asked.is_empty());
    }

    #[test]
    fn without_vault_session_secret_ref_is_ignored() {
        let mut prompter = ScriptedPrompter::new(&["pw"]);
        let entry = ServerEntry::new("a", "h").with_username("u").with_secret_ref("Item");

        let creds = CredentialResolver::<FakeVault, _>::new(None, &mut prompter)
            .resolve(&entry, "h", SecretPolicy::Prompt)
            .unwrap();
        assert_eq!(creds.secret.as_ref().map(Secret::expose), Some("pw"));
    }
}
