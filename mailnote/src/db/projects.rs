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

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<Project>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        Project {
            pk,
            path: row.get("path")?,
            visibility: row.get("visibility")?,
        },
        pk,
    ))
}

impl Connection {
    /// Create a project.
    pub fn create_project(&self, path: &str, visibility: Visibility) -> Result<DbVal<Project>> {
        let mut stmt = self
            .connection
            .prepare("INSERT INTO project(path, visibility) VALUES(?, ?) RETURNING *;")?;
        let ret = stmt.query_row(rusqlite::params![path, visibility], project_from_row)?;

        trace!("create_project {:?}.", &ret);
        Ok(ret)
    }

    /// Fetch a project by primary key.
    pub fn project(&self, pk: i64) -> Result<Option<DbVal<Project>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM project WHERE pk = ?;")?;
        let ret = stmt.query_row([&pk], project_from_row).optional()?;
        Ok(ret)
    }

    /// Fetch a project by path.
    pub fn project_by_path(&self, path: &str) -> Result<Option<DbVal<Project>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM project WHERE path = ?;")?;
        let ret = stmt.query_row([&path], project_from_row).optional()?;
        Ok(ret)
    }

    /// Make `user` a member of `project`. Adding an existing member is a
    /// no-op.
    pub fn add_project_member(&self, project: i64, user: i64) -> Result<()> {
        self.connection.execute(
            "INSERT OR IGNORE INTO project_member(project, account) VALUES(?, ?);",
            rusqlite::params![project, user],
        )?;
        trace!("add_project_member project {project} user {user}.");
        Ok(())
    }

    /// Whether `user` is a member of `project`.
    pub fn is_project_member(&self, project: i64, user: i64) -> Result<bool> {
        let mut stmt = self.connection.prepare(
            "SELECT count(*) FROM project_member WHERE project = ? AND account = ?;",
        )?;
        let count: i64 = stmt.query_row(rusqlite::params![project, user], |row| row.get(0))?;
        Ok(count > 0)
    }
}
