use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// A named server record as kept in the store file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(rename = "entry-name")]
    pub name: String,
    #[serde(rename = "ip", alias = "server-ip", alias = "ssh-ip")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(
        rename = "ssh-username",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    #[serde(
        rename = "bitwarden-name",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub secret_ref: Option<String>,
}

impl ServerEntry {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: None,
            username: None,
            secret_ref: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_secret_ref(mut self, secret_ref: impl Into<String>) -> Self {
        self.secret_ref = Some(secret_ref.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Case-insensitive comparison against the entry name.
    pub fn is_named(&self, name: &str) -> bool {
        names_equal(&self.name, name)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidEntry("entry name cannot be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidEntry(format!(
                "'{}' has no IP/hostname",
                self.name
            )));
        }
        if self.username.is_none() && self.secret_ref.is_none() {
            return Err(Error::InvalidEntry(format!(
                "'{}' needs an SSH username or a vault item name",
                self.name
            )));
        }
        Ok(())
    }
}

pub(crate) fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
