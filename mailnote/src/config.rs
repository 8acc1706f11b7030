/*
 * This file is part of mailnote
 *
 * Copyright 2020 - Manos Pitsidianakis
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    io::{Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::prelude::*;

use super::errors::*;

/// Settings of the reply-by-email feature.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IncomingEmailSettings {
    /// Whether replies are accepted at all.
    #[serde(default)]
    pub enabled: bool,
    /// Reply address template. Must contain the `%{key}` placeholder
    /// exactly once, e.g. `reply+%{key}@example.com`.
    pub address: String,
}

impl IncomingEmailSettings {
    /// Enabled settings with the given address template.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            enabled: true,
            address: address.into(),
        }
    }
}

/// The configuration for the mailnote database and the incoming e-mail
/// pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Configuration {
    /// The location of the sqlite3 file.
    pub db_path: PathBuf,
    /// The directory where data (uploads, failed messages) are stored.
    pub data_path: PathBuf,
    /// How many seconds to wait for all attachment uploads of a message.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout: u64,
    /// URL prefix of uploaded files.
    #[serde(default = "default_uploads_url")]
    pub uploads_url: String,
    /// Reply-by-email settings.
    pub incoming_email: IncomingEmailSettings,
}

fn default_upload_timeout() -> u64 {
    30
}

fn default_uploads_url() -> String {
    "/uploads".to_string()
}

impl Configuration {
    /// Create a new configuration value from a given database path value.
    ///
    /// Incoming e-mail is disabled until an address template is set.
    ///
    /// If you wish to create a new database with this configuration, use
    /// [`Connection::open_or_create_db`](crate::Connection::open_or_create_db).
    /// To open an existing database, use
    /// [`Connection::open_db`](crate::Connection::open_db).
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        Self {
            data_path: db_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| db_path.clone()),
            incoming_email: IncomingEmailSettings {
                enabled: false,
                address: String::new(),
            },
            upload_timeout: default_upload_timeout(),
            uploads_url: default_uploads_url(),
            db_path,
        }
    }

    /// Deserialize configuration from TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut s = String::new();
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Configuration file {} not found.", path.display()))?;
        file.read_to_string(&mut s)
            .with_context(|| format!("Could not read from file {}.", path.display()))?;
        let config: Self = toml::from_str(&s)
            .map_err(anyhow::Error::from)
            .with_context(|| {
                format!(
                    "Could not parse configuration file `{}` successfully: ",
                    path.display()
                )
            })?;

        Ok(config)
    }

    /// The saved data path.
    pub fn data_directory(&self) -> &Path {
        self.data_path.as_path()
    }

    /// The directory uploaded attachments are stored in.
    pub fn uploads_directory(&self) -> PathBuf {
        self.data_path.join("uploads")
    }

    /// The sqlite3 database path.
    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Upload timeout as a [`Duration`].
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout)
    }

    /// Save message to a custom path.
    pub fn save_message_to_path(&self, msg: &[u8], mut path: PathBuf) -> Result<PathBuf> {
        if path.is_dir() {
            let now = Local::now().timestamp();
            path.push(format!("{}-failed.eml", now));
        }

        debug_assert!(path != self.db_path());
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("Could not create file {}.", path.display()))?;
        let metadata = file
            .metadata()
            .with_context(|| format!("Could not fstat file {}.", path.display()))?;
        let mut permissions = metadata.permissions();

        permissions.set_mode(0o600); // Read/write for owner only.
        file.set_permissions(permissions)
            .with_context(|| format!("Could not chmod 600 file {}.", path.display()))?;
        file.write_all(msg)
            .with_context(|| format!("Could not write message to file {}.", path.display()))?;
        file.flush()
            .with_context(|| format!("Could not flush message I/O to file {}.", path.display()))?;
        Ok(path)
    }

    /// Save message to the data directory.
    pub fn save_message(&self, msg: &[u8]) -> Result<PathBuf> {
        self.save_message_to_path(msg, self.data_directory().to_path_buf())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> String {
        toml::ser::to_string(self).expect("Could not serialize config to TOML")
    }
}
