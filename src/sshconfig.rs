use std::{fs::File, io::BufReader, path::Path};

use anyhow::Context;
use ssh2_config::{ParseRule, SshConfig};

use crate::entry::ServerEntry;

pub fn load_ssh_config(path: Option<&Path>) -> anyhow::Result<SshConfig> {
    match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open {:?}", path))?;
            let mut reader = BufReader::new(file);
            SshConfig::default()
                .parse(&mut reader, ParseRule::STRICT)
                .with_context(|| format!("cannot parse {:?}", path))
        }
        None => SshConfig::parse_default_file(ParseRule::STRICT)
            .context("cannot parse ~/.ssh/config"),
    }
}

/// One entry per concrete host alias. Patterns and hosts without a
/// `HostName` are skipped; a missing `User` falls back to `default_user`.
pub fn entries_from_ssh_config(config: &SshConfig, default_user: &str) -> Vec<ServerEntry> {
    let mut entries = Vec::new();
    for host in config.get_hosts() {
        // if hostname is not set, we can't connect to it
        let Some(hostname) = host.params.host_name.clone() else {
            continue;
        };
        let user = host
            .params
            .user
            .clone()
            .unwrap_or_else(|| default_user.to_string());

        for alias in host.pattern.iter() {
            if alias.negated || alias.pattern.contains(['*', '?']) {
                continue;
            }
            let mut entry = ServerEntry::new(alias.pattern.clone(), hostname.clone())
                .with_username(user.clone());
            entry.port = host.params.port;
            entries.push(entry);
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
Host web1 web-alias
    HostName 10.0.0.9
    User deploy
    Port 2222

Host *.internal
    HostName 10.9.9.9

Host nohostname
    User nobody

Host db
    HostName db.example
";

    fn parse(text: &str) -> SshConfig {
        let mut reader = BufReader::new(text.as_bytes());
        SshConfig::default()
            .parse(&mut reader, ParseRule::STRICT)
            .unwrap()
    }

    #[test]
    fn concrete_aliases_become_entries() {
        let entries = entries_from_ssh_config(&parse(CONFIG), "me");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["web1", "web-alias", "db"]);

        let web = &entries[0];
        assert_eq!(web.host, "10.0.0.9");
        assert_eq!(web.username.as_deref(), Some("deploy"));
        assert_eq!(web.port, Some(2222));

        assert_eq!(entries[2].username.as_deref(), Some("me"));
        assert!(entries.iter().all(|e| e.validate().is_ok()));
    }
}
