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

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<Issue>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        Issue {
            pk,
            project: row.get("project")?,
            title: row.get("title")?,
            discussion_locked: row.get("discussion_locked")?,
        },
        pk,
    ))
}

fn merge_request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<MergeRequest>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        MergeRequest {
            pk,
            project: row.get("project")?,
            title: row.get("title")?,
            source_branch: row.get("source_branch")?,
            target_branch: row.get("target_branch")?,
            discussion_locked: row.get("discussion_locked")?,
        },
        pk,
    ))
}

fn commit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<Commit>> {
    Ok(DbVal(
        Commit {
            project: row.get("project")?,
            sha: row.get("sha")?,
            title: row.get("title")?,
        },
        row.get("pk")?,
    ))
}

impl Connection {
    /// Create an issue in `project`.
    pub fn create_issue(&self, project: i64, title: &str) -> Result<DbVal<Issue>> {
        let mut stmt = self
            .connection
            .prepare("INSERT INTO issue(project, title) VALUES(?, ?) RETURNING *;")?;
        let ret = stmt.query_row(rusqlite::params![project, title], issue_from_row)?;

        trace!("create_issue {:?}.", &ret);
        Ok(ret)
    }

    /// Create a merge request in `project`.
    pub fn create_merge_request(
        &self,
        project: i64,
        title: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<DbVal<MergeRequest>> {
        let mut stmt = self.connection.prepare(
            "INSERT INTO merge_request(project, title, source_branch, target_branch) VALUES(?, \
             ?, ?, ?) RETURNING *;",
        )?;
        let ret = stmt.query_row(
            rusqlite::params![project, title, source_branch, target_branch],
            merge_request_from_row,
        )?;

        trace!("create_merge_request {:?}.", &ret);
        Ok(ret)
    }

    /// Record a commit of `project`.
    pub fn create_commit(&self, project: i64, sha: &str, title: &str) -> Result<DbVal<Commit>> {
        let mut stmt = self.connection.prepare(
            "INSERT INTO project_commit(project, sha, title) VALUES(?, ?, ?) RETURNING *;",
        )?;
        let ret = stmt.query_row(rusqlite::params![project, sha, title], commit_from_row)?;

        trace!("create_commit {:?}.", &ret);
        Ok(ret)
    }

    /// Fetch an issue by primary key.
    pub fn issue(&self, pk: i64) -> Result<Option<DbVal<Issue>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM issue WHERE pk = ?;")?;
        let ret = stmt.query_row([&pk], issue_from_row).optional()?;
        Ok(ret)
    }

    /// Fetch a merge request by primary key.
    pub fn merge_request(&self, pk: i64) -> Result<Option<DbVal<MergeRequest>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM merge_request WHERE pk = ?;")?;
        let ret = stmt.query_row([&pk], merge_request_from_row).optional()?;
        Ok(ret)
    }

    /// Fetch a commit of `project` by SHA.
    pub fn commit(&self, project: i64, sha: &str) -> Result<Option<DbVal<Commit>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM project_commit WHERE project = ? AND sha = ?;")?;
        let ret = stmt
            .query_row(rusqlite::params![project, sha], commit_from_row)
            .optional()?;
        Ok(ret)
    }

    /// Fetch the discussion target `noteable` refers to.
    pub fn noteable_by_ref(&self, noteable: &NoteableRef) -> Result<Option<Noteable>> {
        Ok(match noteable {
            NoteableRef::Issue { pk } => self.issue(*pk)?.map(|v| Noteable::Issue(v.into_inner())),
            NoteableRef::MergeRequest { pk } => self
                .merge_request(*pk)?
                .map(|v| Noteable::MergeRequest(v.into_inner())),
            NoteableRef::Commit { project, sha } => self
                .commit(*project, sha)?
                .map(|v| Noteable::Commit(v.into_inner())),
        })
    }

    /// Lock or unlock the discussion of an issue or merge request.
    pub fn lock_discussion(&self, noteable: &NoteableRef, locked: bool) -> Result<()> {
        let (table, pk) = match noteable {
            NoteableRef::Issue { pk } => ("issue", *pk),
            NoteableRef::MergeRequest { pk } => ("merge_request", *pk),
            NoteableRef::Commit { .. } => {
                return Err(Error::new_external("Commit discussions cannot be locked."));
            }
        };
        let changed = self.connection.execute(
            &format!("UPDATE {table} SET discussion_locked = ? WHERE pk = ?;"),
            rusqlite::params![locked, pk],
        )?;
        if changed == 0 {
            return Err(Error::NotFound("discussion"));
        }
        trace!("lock_discussion {noteable} locked = {locked}.");
        Ok(())
    }
}
