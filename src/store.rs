use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    ops::Deref,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    entry::{names_equal, ServerEntry},
    error::Error,
};

/// The on-disk collection of server entries.
#[derive(Debug)]
pub struct EntryStore {
    path: PathBuf,
    entries: Vec<ServerEntry>,
}

impl EntryStore {
    /// Open for reading. A corrupt file is reported and treated as empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = PathBuf::from(path.as_ref());
        let entries = match Self::read(&path) {
            Ok(entries) => entries,
            Err(err @ Error::StoreCorrupt { .. }) => {
                warn!("{err}; continuing with an empty server list");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(Self { path, entries })
    }

    /// Open for modification. A corrupt file is fatal so it is never
    /// overwritten with an empty list.
    pub fn open_for_write<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = PathBuf::from(path.as_ref());
        let entries = Self::read(&path)?;
        Ok(Self { path, entries })
    }

    fn read(path: &Path) -> Result<Vec<ServerEntry>, Error> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no server store at {:?}", path);
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(Error::StoreUnreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&data).map_err(|source| Error::StoreCorrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn find(&self, name: &str) -> Result<&ServerEntry, Error> {
        self.entries
            .iter()
            .find(|entry| entry.is_named(name))
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.is_named(name))
    }

    /// Entries whose name contains `filter`, ignoring case.
    pub fn filter(&self, filter: Option<&str>) -> Vec<&ServerEntry> {
        let filter = filter.unwrap_or_default().to_lowercase();
        self.entries
            .iter()
            .filter(|entry| filter.is_empty() || entry.name.to_lowercase().contains(&filter))
            .collect()
    }

    pub fn add(&mut self, entry: ServerEntry) -> Result<(), Error> {
        entry.validate()?;
        if self.contains(&entry.name) {
            return Err(Error::DuplicateEntry(entry.name));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Replace the entry called `name` with `updated`, which may carry a new name.
    pub fn update(&mut self, name: &str, updated: ServerEntry) -> Result<(), Error> {
        let idx = self.position(name)?;
        updated.validate()?;

        let taken = self
            .entries
            .iter()
            .enumerate()
            .any(|(i, entry)| i != idx && names_equal(&entry.name, &updated.name));
        if taken {
            return Err(Error::DuplicateEntry(updated.name));
        }

        self.entries[idx] = updated;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ServerEntry, Error> {
        let idx = self.position(name)?;
        Ok(self.entries.remove(idx))
    }

    fn position(&self, name: &str) -> Result<usize, Error> {
        self.entries
            .iter()
            .position(|entry| entry.is_named(name))
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    /// Write the collection back: temp file next to the store, then rename.
    pub fn flush(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_vec_pretty(&self.entries).map_err(std::io::Error::from)?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "servers.json".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&data)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        debug!("saved {} entries to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}

impl Deref for EntryStore {
    type Target = [ServerEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
