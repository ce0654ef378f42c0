//! Add, list, edit, remove and import server entries.
//!
//! Every mutating operation re-reads the store from disk first, so name
//! uniqueness is always checked against the current file.

use std::path::Path;

use tracing::{info, warn};
use unicode_width::UnicodeWidthStr;

use crate::{
    entry::{names_equal, ServerEntry},
    error::Error,
    plan::DEFAULT_SSH_PORT,
    prompt::Prompter,
    store::EntryStore,
};

/// Values given on the command line for a new entry.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub name: Option<String>,
    pub host: Option<String>,
    pub username: Option<String>,
    pub secret_ref: Option<String>,
    pub port: Option<u16>,
}

impl NewEntry {
    /// Enough was given to skip prompting altogether.
    fn is_complete(&self) -> bool {
        self.name.is_some()
            && self.host.is_some()
            && (self.username.is_some() || self.secret_ref.is_some())
    }
}

pub fn add_entry<P: Prompter>(
    store_path: &Path,
    args: NewEntry,
    default_username: Option<&str>,
    prompter: &mut P,
) -> Result<ServerEntry, Error> {
    let mut store = EntryStore::open_for_write(store_path)?;

    if args.is_complete() {
        let name = args.name.unwrap_or_default();
        let mut entry = ServerEntry::new(name, args.host.unwrap_or_default());
        entry.username = args
            .username
            .or_else(|| args.secret_ref.as_ref().and(default_username.map(String::from)));
        entry.secret_ref = args.secret_ref;
        entry.port = args.port;
        store.add(entry.clone())?;
        store.flush()?;
        info!("Added server '{}'", entry.name);
        return Ok(entry);
    }

    info!("Adding a new server entry...");
    let name = match args.name {
        Some(name) if !name.trim().is_empty() && !store.contains(&name) => name,
        given => {
            if let Some(name) = given {
                eprintln!("An entry named '{name}' already exists. Please choose another.");
            }
            ask_new_name(&store, prompter)?
        }
    };

    let secret_ref = match args.secret_ref {
        Some(secret_ref) => Some(secret_ref),
        None => Some(prompter.ask("Vault item name (leave empty if none): ")?)
            .filter(|s| !s.is_empty()),
    };

    let username = match (args.username, &secret_ref) {
        (Some(username), _) => Some(username),
        (None, Some(_)) => default_username.map(String::from),
        (None, None) => Some(ask_required(prompter, "SSH username: ", "SSH username")?),
    };

    let host = match args.host {
        Some(host) => host,
        None => ask_required(prompter, "Server IP/Hostname: ", "Server IP/Hostname")?,
    };

    let port = match args.port {
        Some(port) => Some(port),
        None => ask_port(prompter, &format!("Port [{DEFAULT_SSH_PORT}]: "), None)?,
    };

    let entry = ServerEntry {
        name,
        host,
        port,
        username,
        secret_ref,
    };
    store.add(entry.clone())?;
    store.flush()?;
    info!("Added server '{}'", entry.name);
    Ok(entry)
}

fn ask_new_name<P: Prompter>(store: &EntryStore, prompter: &mut P) -> Result<String, Error> {
    loop {
        let name = prompter.ask("Entry name: ")?;
        if name.is_empty() {
            eprintln!("Entry name cannot be empty.");
        } else if store.contains(&name) {
            eprintln!("An entry named '{name}' already exists. Please choose another.");
        } else {
            return Ok(name);
        }
    }
}

fn ask_required<P: Prompter>(prompter: &mut P, label: &str, what: &str) -> Result<String, Error> {
    loop {
        let value = prompter.ask(label)?;
        if !value.is_empty() {
            return Ok(value);
        }
        eprintln!("{what} is required.");
    }
}

/// Blank keeps `current`.
fn ask_port<P: Prompter>(
    prompter: &mut P,
    label: &str,
    current: Option<u16>,
) -> Result<Option<u16>, Error> {
    loop {
        let value = prompter.ask(label)?;
        if value.is_empty() {
            return Ok(current);
        }
        match value.parse::<u16>() {
            Ok(port) if port > 0 => return Ok(Some(port)),
            _ => eprintln!("'{value}' is not a valid port."),
        }
    }
}

/// Field-by-field edit; a blank answer keeps the current value.
///
/// `-` clears the vault item name, and a username of the form `bw:NAME`
/// switches the entry to vault item `NAME`.
pub fn edit_entry<P: Prompter>(
    store_path: &Path,
    name: &str,
    prompter: &mut P,
) -> Result<ServerEntry, Error> {
    let mut store = EntryStore::open_for_write(store_path)?;
    let current = store.find(name)?.clone();
    let mut edited = current.clone();

    info!("Editing '{}'. Press Enter to keep the current value.", current.name);

    loop {
        let new_name = prompter.ask(&format!("Entry name [{}]: ", current.name))?;
        if new_name.is_empty() {
            break;
        }
        let taken = store
            .iter()
            .any(|entry| !entry.is_named(&current.name) && names_equal(&entry.name, &new_name));
        if taken {
            eprintln!("Entry name '{new_name}' already exists. Please enter a unique name.");
            continue;
        }
        edited.name = new_name;
        break;
    }

    let host = prompter.ask(&format!("IP/Hostname [{}]: ", current.host))?;
    if !host.is_empty() {
        edited.host = host;
    }

    let port_label = format!("Port [{}]: ", current.port.unwrap_or(DEFAULT_SSH_PORT));
    edited.port = ask_port(prompter, &port_label, current.port)?;

    let vault_label = format!(
        "Vault item name [{}] ('-' to clear): ",
        current.secret_ref.as_deref().unwrap_or("none")
    );
    match prompter.ask(&vault_label)?.as_str() {
        "" => {}
        "-" => edited.secret_ref = None,
        item => edited.secret_ref = Some(item.to_string()),
    }

    let user_label = format!(
        "SSH username [{}]: ",
        current.username.as_deref().unwrap_or("none")
    );
    let username = prompter.ask(&user_label)?;
    if let Some(item) = username.strip_prefix("bw:") {
        edited.secret_ref = Some(item.trim().to_string()).filter(|s| !s.is_empty());
        edited.username = None;
    } else if username == "-" {
        edited.username = None;
    } else if !username.is_empty() {
        edited.username = Some(username);
    }

    if edited.username.is_none() && edited.secret_ref.is_none() {
        eprintln!("SSH username is required when no vault item is set.");
        edited.username = Some(ask_required(prompter, "SSH username: ", "SSH username")?);
    }

    store.update(&current.name, edited.clone())?;
    store.flush()?;
    info!("Server '{}' updated", edited.name);
    Ok(edited)
}

/// Returns false when the user declined.
pub fn remove_entry<P: Prompter>(
    store_path: &Path,
    name: &str,
    assume_yes: bool,
    prompter: &mut P,
) -> Result<bool, Error> {
    let mut store = EntryStore::open_for_write(store_path)?;
    let entry_name = store.find(name)?.name.clone();

    let question = format!("Are you sure you want to remove '{entry_name}'? This cannot be undone");
    if !assume_yes && !prompter.confirm(&question, false)? {
        info!("Cancelled");
        return Ok(false);
    }

    store.remove(&entry_name)?;
    store.flush()?;
    info!("Removed '{entry_name}'");
    Ok(true)
}

/// Add the given entries, skipping names that are already taken.
/// Returns how many were added.
pub fn import_entries(store_path: &Path, entries: Vec<ServerEntry>) -> Result<usize, Error> {
    let mut store = EntryStore::open_for_write(store_path)?;
    let mut added = 0;

    for entry in entries {
        let name = entry.name.clone();
        match store.add(entry) {
            Ok(()) => added += 1,
            Err(err @ (Error::DuplicateEntry(_) | Error::InvalidEntry(_))) => {
                warn!("skipping '{name}': {err}");
            }
            Err(err) => return Err(err),
        }
    }

    if added > 0 {
        store.flush()?;
    }
    info!("Imported {added} entries");
    Ok(added)
}

/// Render entries as a table with columns sized to their content.
pub fn render_table(entries: &[&ServerEntry]) -> String {
    const HEADERS: [&str; 5] = ["Entry name", "IP/Hostname", "Port", "User", "Vault name"];

    let rows: Vec<[String; 5]> = entries
        .iter()
        .map(|entry| {
            [
                entry.name.clone(),
                entry.host.clone(),
                entry
                    .port
                    .map(|port| port.to_string())
                    .unwrap_or_else(|| "-".into()),
                entry.username.clone().unwrap_or_else(|| "-".into()),
                entry.secret_ref.clone().unwrap_or_else(|| "-".into()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(UnicodeWidthStr::width);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(cell.as_str()));
        }
    }
    let widths = widths.map(|w| w + 2);

    let render_row = |cells: &[&str]| {
        let mut line = String::new();
        for (cell, width) in cells.iter().zip(widths) {
            line.push_str(cell);
            let pad = width.saturating_sub(UnicodeWidthStr::width(*cell));
            line.extend(std::iter::repeat(' ').take(pad));
        }
        line.trim_end().to_string()
    };

    let mut out = render_row(&HEADERS[..]);
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum()));
    out.push('\n');
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&render_row(&cells));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::testing::ScriptedPrompter;

    fn seeded(entries: Vec<ServerEntry>) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let mut store = EntryStore::open_for_write(&path).unwrap();
        for entry in entries {
            store.add(entry).unwrap();
        }
        store.flush().unwrap();
        (dir, path)
    }

    #[test]
    fn add_from_arguments_needs_no_prompt() {
        let (_dir, path) = seeded(vec![]);
        let mut prompter = ScriptedPrompter::new(&[]);
        let args = NewEntry {
            name: Some("web1".into()),
            host: Some("web.local".into()),
            secret_ref: Some("WebVaultItem".into()),
            ..Default::default()
        };

        let entry = add_entry(&path, args, Some("ops"), &mut prompter).unwrap();
        assert_eq!(entry.username.as_deref(), Some("ops"));
        assert!(prompter.asked.is_empty());
        assert_eq!(EntryStore::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn add_rejects_duplicates_case_insensitively() {
        let (_dir, path) = seeded(vec![ServerEntry::new("Web1", "a").with_username("u")]);
        let mut prompter = ScriptedPrompter::new(&[]);
        let args = NewEntry {
            name: Some("web1".into()),
            host: Some("b".into()),
            username: Some("v".into()),
            ..Default::default()
        };

        let err = add_entry(&path, args, None, &mut prompter).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry(_)));
        let store = EntryStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store[0].host, "a");
    }

    #[test]
    fn interactive_add_reasks_taken_and_empty_names() {
        let (_dir, path) = seeded(vec![ServerEntry::new("db1", "a").with_username("u")]);
        let mut prompter =
            ScriptedPrompter::new(&["", "DB1", "db2", "", "", "alice", "10.0.0.7", "x", "2222"]);

        let entry = add_entry(&path, NewEntry::default(), None, &mut prompter).unwrap();
        assert_eq!(entry.name, "db2");
        assert_eq!(entry.username.as_deref(), Some("alice"));
        assert_eq!(entry.secret_ref, None);
        assert_eq!(entry.port, Some(2222));
        assert_eq!(EntryStore::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn edit_keeps_blank_fields() {
        let (_dir, path) = seeded(vec![ServerEntry::new("db1", "10.0.0.5").with_username("alice")]);
        let mut prompter = ScriptedPrompter::new(&["", "10.0.0.6", "", "", ""]);

        let entry = edit_entry(&path, "DB1", &mut prompter).unwrap();
        assert_eq!(entry.name, "db1");
        assert_eq!(entry.host, "10.0.0.6");
        assert_eq!(entry.username.as_deref(), Some("alice"));
        assert_eq!(EntryStore::open(&path).unwrap().find("db1").unwrap().host, "10.0.0.6");
    }

    #[test]
    fn edit_rename_must_be_unique() {
        let (_dir, path) = seeded(vec![
            ServerEntry::new("a", "h").with_username("u"),
            ServerEntry::new("b", "h").with_username("u"),
        ]);
        let mut prompter = ScriptedPrompter::new(&["B", "c", "", "", "", ""]);

        let entry = edit_entry(&path, "a", &mut prompter).unwrap();
        assert_eq!(entry.name, "c");
        let store = EntryStore::open(&path).unwrap();
        assert!(store.contains("c") && store.contains("b") && !store.contains("a"));
    }

    #[test]
    fn edit_switches_to_vault_item() {
        let (_dir, path) = seeded(vec![ServerEntry::new("a", "h").with_username("u")]);
        let mut prompter = ScriptedPrompter::new(&["", "", "", "", "bw:ProdItem"]);

        let entry = edit_entry(&path, "a", &mut prompter).unwrap();
        assert_eq!(entry.secret_ref.as_deref(), Some("ProdItem"));
        assert_eq!(entry.username, None);
    }

    #[test]
    fn clearing_vault_item_requires_username() {
        let (_dir, path) = seeded(vec![ServerEntry::new("a", "h").with_secret_ref("Item")]);
        let mut prompter = ScriptedPrompter::new(&["", "", "", "-", "", "", "root"]);

        let entry = edit_entry(&path, "a", &mut prompter).unwrap();
        assert_eq!(entry.secret_ref, None);
        assert_eq!(entry.username.as_deref(), Some("root"));
    }

    #[test]
    fn remove_asks_for_confirmation() {
        let (_dir, path) = seeded(vec![ServerEntry::new("a", "h").with_username("u")]);

        let mut prompter = ScriptedPrompter::new(&[""]);
        assert!(!remove_entry(&path, "a", false, &mut prompter).unwrap());
        assert_eq!(EntryStore::open(&path).unwrap().len(), 1);

        let mut prompter = ScriptedPrompter::new(&["y"]);
        assert!(remove_entry(&path, "A", false, &mut prompter).unwrap());
        assert!(EntryStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn remove_unknown_entry() {
        let (_dir, path) = seeded(vec![]);
        let mut prompter = ScriptedPrompter::new(&[]);
        let err = remove_entry(&path, "ghost", true, &mut prompter).unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(_)));
    }

    #[test]
    fn import_skips_existing_names() {
        let (_dir, path) = seeded(vec![ServerEntry::new("web1", "h").with_username("u")]);
        let added = import_entries(
            &path,
            vec![
                ServerEntry::new("WEB1", "other").with_username("x"),
                ServerEntry::new("db", "db.example").with_username("x"),
            ],
        )
        .unwrap();

        assert_eq!(added, 1);
        let store = EntryStore::open(&path).unwrap();
        assert_eq!(store.find("web1").unwrap().host, "h");
        assert!(store.contains("db"));
    }

    #[test]
    fn table_columns_fit_content() {
        let long = ServerEntry::new("a-very-long-name", "10.0.0.5").with_username("alice");
        let short = ServerEntry::new("b", "h").with_secret_ref("Item").with_port(2222);
        let table = render_table(&[&long, &short]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Entry name        IP/Hostname"));
        assert!(lines[2].starts_with("a-very-long-name  10.0.0.5"));
        assert!(lines[3].contains("2222"));
        assert!(lines[3].ends_with("Item"));
    }
}
