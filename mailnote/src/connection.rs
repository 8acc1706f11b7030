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

//! Mailnote database and methods.

use log::info;
use rusqlite::Connection as DbConnection;

use crate::{config::Configuration, errors::*};

/// A connection to a `mailnote` database.
pub struct Connection {
    /// The `rusqlite` connection handle.
    pub connection: DbConnection,
    pub(crate) conf: Configuration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Connection")
            .field("conf", &self.conf)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.connection
            .authorizer::<fn(rusqlite::hooks::AuthContext<'_>) -> rusqlite::hooks::Authorization>(
                None,
            );
        // make sure pragma optimize does not take too long
        _ = self.connection.pragma_update(None, "analysis_limit", "400");
        // gather statistics to improve query optimization
        _ = self
            .connection
            .pragma(None, "optimize", 0xfffe_i64, |_| Ok(()));
    }
}

fn log_callback(error_code: std::ffi::c_int, message: &str) {
    match error_code {
        rusqlite::ffi::SQLITE_NOTICE => log::trace!("{}", message),
        rusqlite::ffi::SQLITE_OK
        | rusqlite::ffi::SQLITE_DONE
        | rusqlite::ffi::SQLITE_NOTICE_RECOVER_WAL
        | rusqlite::ffi::SQLITE_NOTICE_RECOVER_ROLLBACK => log::info!("{}", message),
        rusqlite::ffi::SQLITE_WARNING | rusqlite::ffi::SQLITE_WARNING_AUTOINDEX => {
            log::warn!("{}", message)
        }
        _ => log::error!("{error_code} {}", message),
    }
}

fn user_authorizer_callback(
    auth_context: rusqlite::hooks::AuthContext<'_>,
) -> rusqlite::hooks::Authorization {
    use rusqlite::hooks::{AuthAction, Authorization};

    // [ref:sync_auth_doc] sync with `untrusted()` rustdoc when changing this.
    match auth_context.action {
        AuthAction::Insert {
            table_name: "note" | "note_attachment",
        }
        | AuthAction::Select
        | AuthAction::Savepoint { .. }
        | AuthAction::Transaction { .. }
        | AuthAction::Read { .. }
        | AuthAction::Function {
            function_name: "count" | "strftime" | "unixepoch" | "datetime" | "length" | "trim",
        } => Authorization::Allow,
        _ => Authorization::Deny,
    }
}

impl Connection {
    /// The database schema.
    ///
    /// ```sql
    #[doc = include_str!("./schema.sql")]
    /// ```
    pub const SCHEMA: &'static str = include_str!("./schema.sql");

    /// Creates a new database connection.
    ///
    /// `Connection` supports a limited subset of operations by default (see
    /// [`Connection::untrusted`]).
    /// Use [`Connection::trusted`] to remove these limits.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mailnote::{Configuration, Connection};
    /// #
    /// # fn main() -> mailnote::Result<()> {
    /// # use tempfile::TempDir;
    /// #
    /// # let tmp_dir = TempDir::new()?;
    /// # let db_path = tmp_dir.path().join("mnote.db");
    /// let config = Configuration::new(db_path);
    /// # assert_eq!(&Connection::open_db(config.clone()).unwrap_err().to_string(), "Error: Database doesn't exist");
    ///
    /// let db = Connection::open_or_create_db(config)?;
    /// # _ = db;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_db(conf: Configuration) -> Result<Self> {
        use std::sync::Once;

        use rusqlite::config::DbConfig;

        static INIT_SQLITE_LOGGING: Once = Once::new();

        if !conf.db_path.exists() {
            return Err("Database doesn't exist".into());
        }
        INIT_SQLITE_LOGGING.call_once(|| {
            _ = unsafe { rusqlite::trace::config_log(Some(log_callback)) };
        });
        let conn = DbConnection::open(&conf.db_path).with_context(|| {
            format!("sqlite3 library could not open {}.", conf.db_path.display())
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "on")?;
        // synchronise less often to the filesystem
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_TRIGGER, true)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, true)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_TRUSTED_SCHEMA, true)?;
        conn.busy_timeout(core::time::Duration::from_millis(500))?;
        conn.busy_handler(Some(|times: i32| -> bool { times < 5 }))?;

        let ret = Self {
            conf,
            connection: conn,
        };
        ret.connection.authorizer(Some(user_authorizer_callback));
        Ok(ret)
    }

    /// Removes operational limits from this connection. (see
    /// [`Connection::untrusted`])
    #[must_use]
    pub fn trusted(self) -> Self {
        self.connection
            .authorizer::<fn(rusqlite::hooks::AuthContext<'_>) -> rusqlite::hooks::Authorization>(
                None,
            );
        self
    }

    // [tag:sync_auth_doc]
    /// Sets operational limits for this connection.
    ///
    /// - Allow `INSERT` only for "note" and "note_attachment".
    /// - Allow read access to all tables.
    /// - Allow `SELECT`, `TRANSACTION`, `SAVEPOINT`, and the `count`,
    ///   `strftime`, `unixepoch`, `datetime`, `length` and `trim` functions.
    /// - Deny everything else.
    #[must_use]
    pub fn untrusted(self) -> Self {
        self.connection.authorizer(Some(user_authorizer_callback));
        self
    }

    /// Create a database if it doesn't exist and then open it.
    pub fn open_or_create_db(conf: Configuration) -> Result<Self> {
        if !conf.db_path.exists() {
            let db_path = &conf.db_path;
            use std::os::unix::fs::PermissionsExt;

            info!("Creating database in {}", db_path.display());
            let file = std::fs::File::create(db_path).context("Could not create db path")?;
            let metadata = file
                .metadata()
                .with_context(|| format!("Could not fstat database {}.", db_path.display()))?;
            let mut permissions = metadata.permissions();

            permissions.set_mode(0o600); // Read/write for owner only.
            file.set_permissions(permissions)
                .with_context(|| format!("Could not chmod 600 database {}.", db_path.display()))?;
            drop(file);

            let conn = DbConnection::open(db_path).with_context(|| {
                format!("sqlite3 library could not open {}.", db_path.display())
            })?;
            conn.execute_batch(Self::SCHEMA).with_context(|| {
                format!(
                    "Could not initialize sqlite3 database at {}.",
                    db_path.display()
                )
            })?;
        }
        Self::open_db(conf)
    }

    /// Returns a connection's configuration.
    pub fn conf(&self) -> &Configuration {
        &self.conf
    }

    /// Execute operations inside an SQL savepoint named `name`.
    ///
    /// The savepoint is rolled back when dropped without
    /// [`Savepoint::commit`].
    pub fn savepoint(&'_ self, name: &'static str) -> Result<Savepoint<'_>> {
        self.connection
            .execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(Savepoint {
            conn: self,
            name,
            finished: false,
        })
    }
}

/// A savepoint handle.
#[derive(Debug)]
pub struct Savepoint<'conn> {
    conn: &'conn Connection,
    name: &'static str,
    finished: bool,
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.rollback_() {
            log::error!("Could not roll back savepoint {}: {err}", self.name);
        }
    }
}

impl Savepoint<'_> {
    /// Commit and consume savepoint.
    pub fn commit(mut self) -> Result<()> {
        self.conn
            .connection
            .execute_batch(&format!("RELEASE SAVEPOINT {}", self.name))?;
        self.finished = true;
        Ok(())
    }

    fn rollback_(&mut self) -> Result<()> {
        if self.finished || self.conn.connection.is_autocommit() {
            return Ok(());
        }
        self.finished = true;
        // ROLLBACK TO leaves the savepoint on the stack.
        self.conn.connection.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};",
            name = self.name
        ))?;
        Ok(())
    }
}

impl std::ops::Deref for Savepoint<'_> {
    type Target = Connection;

    #[inline]
    fn deref(&self) -> &Connection {
        self.conn
    }
}
