use std::io;

use anyhow::{bail, Context};
use clap::CommandFactory;
use clap_complete::Shell;
use tracing::info;

use crate::{
    cli::{transfer_action, Cli, Commands},
    config::Config,
    error::Error,
    launcher::{Action, Launcher, ProcessRunner, SystemRunner},
    manage::{self, NewEntry},
    picker::Picker,
    plan::{build_plan, ConnectRequest},
    prompt::{Prompter, TerminalPrompter},
    resolver::CredentialResolver,
    sshconfig::{entries_from_ssh_config, load_ssh_config},
    store::EntryStore,
    terminal::Terminal,
    vault::{BitwardenCli, VaultCli, VaultSession},
};

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        App { config }
    }

    pub fn run(&mut self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Connect {
                entry,
                jump,
                port,
                upload,
                download,
            } => self.connect(entry, jump, port, transfer_action(upload, download)),
            Commands::Add {
                entry,
                host,
                user,
                vault_item,
                port,
            } => {
                let args = NewEntry {
                    name: entry,
                    host,
                    username: user,
                    secret_ref: vault_item,
                    port,
                };
                manage::add_entry(
                    &self.config.store_path,
                    args,
                    self.config.default_username.as_deref(),
                    &mut TerminalPrompter,
                )
                .with_context(|| format!("cannot add to {:?}", self.config.store_path))?;
                Ok(())
            }
            Commands::List { filter } => self.list(filter.as_deref()),
            Commands::Edit { entry } => {
                manage::edit_entry(&self.config.store_path, &entry, &mut TerminalPrompter)
                    .with_context(|| format!("cannot edit '{entry}'"))?;
                Ok(())
            }
            Commands::Remove { entry, yes } => {
                manage::remove_entry(&self.config.store_path, &entry, yes, &mut TerminalPrompter)
                    .with_context(|| format!("cannot remove '{entry}'"))?;
                Ok(())
            }
            Commands::Import { ssh_config } => {
                let parsed = load_ssh_config(ssh_config.as_deref())?;
                let default_user = self
                    .config
                    .default_username
                    .clone()
                    .unwrap_or_else(whoami::username);
                let entries = entries_from_ssh_config(&parsed, &default_user);
                manage::import_entries(&self.config.store_path, entries)
                    .with_context(|| format!("cannot import into {:?}", self.config.store_path))?;
                Ok(())
            }
            Commands::Completions { shell } => {
                print_completions(shell);
                Ok(())
            }
        }
    }

    fn open_store(&self) -> anyhow::Result<EntryStore> {
        EntryStore::open(&self.config.store_path)
            .with_context(|| format!("cannot load server list {:?}", self.config.store_path))
    }

    fn select(&self, store: &EntryStore) -> anyhow::Result<Option<String>> {
        if store.is_empty() {
            bail!("no servers saved yet; add one with `add`");
        }
        let mut picker = Picker::new(store.to_vec());
        let mut terminal =
            Terminal::new(picker.height()).context("cannot start the server picker")?;
        let selected = picker.select(&mut terminal)?;
        Ok(selected.map(|entry| entry.name))
    }

    fn connect(
        &mut self,
        entry: Option<String>,
        use_jump: bool,
        port: Option<u16>,
        action: Action,
    ) -> anyhow::Result<()> {
        let store = self.open_store()?;
        let entry = match entry {
            Some(entry) => entry,
            None => match self.select(&store)? {
                Some(entry) => entry,
                None => return Ok(()),
            },
        };

        let request = ConnectRequest {
            entry,
            use_jump,
            port,
        };
        let askpass = std::env::current_exe()
            .context("cannot locate the sshhop executable for SSH_ASKPASS")?;
        let mut launcher = Launcher::new(SystemRunner, askpass);
        let mut vault = VaultSession::new(
            BitwardenCli::new(self.config.vault_program.clone()),
            self.config.vault.clone(),
        );

        run_connection(
            &request,
            &store,
            self.config.jump_entry.as_deref(),
            &mut vault,
            &mut TerminalPrompter,
            &mut launcher,
            &action,
        )?;
        Ok(())
    }

    fn list(&self, filter: Option<&str>) -> anyhow::Result<()> {
        let store = self.open_store()?;
        let entries = store.filter(filter);
        if entries.is_empty() {
            match filter {
                Some(filter) => info!("No servers match '{filter}'"),
                None => info!("No servers saved yet"),
            }
            return Ok(());
        }
        print!("{}", manage::render_table(&entries));
        Ok(())
    }
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
}

/// Resolve the plan and hand it to the launcher. The vault is locked
/// afterwards on every path, once.
fn run_connection<C: VaultCli, P: Prompter, R: ProcessRunner>(
    request: &ConnectRequest,
    store: &EntryStore,
    jump_entry: Option<&str>,
    vault: &mut VaultSession<C>,
    prompter: &mut P,
    launcher: &mut Launcher<R>,
    action: &Action,
) -> Result<(), Error> {
    let result = {
        let mut resolver = CredentialResolver::new(Some(&mut *vault), prompter);
        build_plan(request, store, jump_entry, &mut resolver)
    }
    .and_then(|plan| launcher.launch(&plan, action));

    vault.teardown();
    result
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        entry::ServerEntry,
        error::ExitState,
        launcher::testing::RecordingRunner,
        prompt::testing::ScriptedPrompter,
        vault::testing::{credentials, FakeVault},
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

    fn connect(
        store: &EntryStore,
        request: &ConnectRequest,
        jump_entry: Option<&str>,
        vault: &mut VaultSession<FakeVault>,
        prompter: &mut ScriptedPrompter,
        runner: &mut RecordingRunner,
    ) -> Result<(), Error> {
        let mut launcher = Launcher::new(runner, PathBuf::from("/opt/sshhop"));
        run_connection(
            request,
            store,
            jump_entry,
            vault,
            prompter,
            &mut launcher,
            &Action::OpenShell,
        )
    }

    #[test]
    fn vault_is_locked_once_when_ssh_fails() {
        let (_dir, store) = store(vec![ServerEntry::new("db1", "10.0.0.5").with_secret_ref("DbItem")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(
            cli.with_item("DbItem", Some("svc"), Some("pw")),
            Some(credentials()),
        );
        let mut runner = RecordingRunner {
            exit_codes: vec![255],
            ..Default::default()
        };

        let err = connect(
            &store,
            &request("db1", false),
            None,
            &mut vault,
            &mut ScriptedPrompter::new(&[]),
            &mut runner,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::ExternalProcessFailed {
                status: ExitState::Code(255),
                ..
            }
        ));
        assert_eq!(runner.commands.len(), 1);
        assert_eq!(log.borrow().count("lock"), 1);

        drop(vault);
        assert_eq!(log.borrow().count("lock"), 1);
    }

    #[test]
    fn vault_untouched_without_vault_items() {
        let (_dir, store) = store(vec![ServerEntry::new("db1", "10.0.0.5").with_username("alice")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut runner = RecordingRunner::default();

        connect(
            &store,
            &request("db1", false),
            None,
            &mut vault,
            &mut ScriptedPrompter::new(&[""]),
            &mut runner,
        )
        .unwrap();

        assert_eq!(runner.commands.len(), 1);
        assert!(log.borrow().calls.is_empty());
    }

    #[test]
    fn missing_vault_credentials_stop_before_launch() {
        let (_dir, store) = store(vec![ServerEntry::new("db1", "10.0.0.5").with_secret_ref("DbItem")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, None);
        let mut runner = RecordingRunner::default();

        let err = connect(
            &store,
            &request("db1", false),
            None,
            &mut vault,
            &mut ScriptedPrompter::new(&[]),
            &mut runner,
        )
        .unwrap_err();

        assert!(matches!(err, Error::MissingVaultCredentials));
        assert!(runner.commands.is_empty());
        assert_eq!(log.borrow().count("lock"), 0);
    }

    #[test]
    fn unresolved_jump_never_reaches_launcher() {
        let (_dir, store) = store(vec![ServerEntry::new("db1", "10.0.0.5").with_secret_ref("DbItem")]);
        let (cli, log) = FakeVault::new();
        let mut vault = VaultSession::new(cli, Some(credentials()));
        let mut runner = RecordingRunner::default();

        let err = connect(
            &store,
            &request("db1", true),
            Some("bastion"),
            &mut vault,
            &mut ScriptedPrompter::new(&[]),
            &mut runner,
        )
        .unwrap_err();

        assert!(matches!(err, Error::JumpServerUnresolved(_)));
        assert!(runner.commands.is_empty());
        assert!(log.borrow().calls.is_empty());
    }
}
