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

use log::trace;
use rusqlite::OptionalExtension;

use super::*;

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<User>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        User {
            pk,
            username: row.get("username")?,
            email: row.get("email")?,
            blocked: row.get("blocked")?,
            admin: row.get("admin")?,
        },
        pk,
    ))
}

impl Connection {
    /// Create a user account.
    pub fn create_user(&self, username: &str, email: &str, admin: bool) -> Result<DbVal<User>> {
        let mut stmt = self.connection.prepare(
            "INSERT INTO account(username, email, admin) VALUES(?, ?, ?) RETURNING *;",
        )?;
        let ret = stmt.query_row(rusqlite::params![username, email, admin], user_from_row)?;

        trace!("create_user {:?}.", &ret);
        Ok(ret)
    }

    /// Fetch a user by primary key.
    pub fn user_by_pk(&self, pk: i64) -> Result<Option<DbVal<User>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM account WHERE pk = ?;")?;
        let ret = stmt.query_row([&pk], user_from_row).optional()?;
        Ok(ret)
    }

    /// Fetch a user by user name.
    pub fn user_by_username(&self, username: &str) -> Result<Option<DbVal<User>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM account WHERE username = ?;")?;
        let ret = stmt.query_row([&username], user_from_row).optional()?;
        Ok(ret)
    }

    /// Block or unblock a user.
    pub fn block_user(&self, pk: i64, blocked: bool) -> Result<()> {
        let changed = self.connection.execute(
            "UPDATE account SET blocked = ? WHERE pk = ?;",
            rusqlite::params![blocked, pk],
        )?;
        if changed == 0 {
            return Err(Error::NotFound("user"));
        }
        trace!("block_user {pk} blocked = {blocked}.");
        Ok(())
    }
}
