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

//! sqlite3 implementations of the [`stores`](crate::stores) traits.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::{
    errors::*,
    models::*,
    reply_key::ReplyKey,
    stores::{AuthorizationChecker, NoteRepository, NoteableStore, NotificationStore, UserStore},
    Connection,
};

mod accounts;
mod noteables;
mod notes;
mod notifications;
mod projects;

pub use notes::MAX_NOTE_LENGTH;

impl FromSql for Visibility {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err: Error| FromSqlError::Other(err.to_string().into()))
    }
}

impl ToSql for Visibility {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Read the `noteable_type`, `project`, `noteable_id` and `commit_id` columns.
fn noteable_ref_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteableRef> {
    let kind: String = row.get("noteable_type")?;
    NoteableRef::from_columns(
        &kind,
        row.get("project")?,
        row.get("noteable_id")?,
        row.get("commit_id")?,
    )
    .map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            err.to_string().into(),
        )
    })
}

impl NotificationStore for Connection {
    fn sent_notification_by_reply_key(
        &self,
        key: &ReplyKey,
    ) -> Result<Option<DbVal<SentNotification>>> {
        self.sent_notification(key.as_str())
    }
}

impl UserStore for Connection {
    fn user(&self, pk: i64) -> Result<Option<DbVal<User>>> {
        self.user_by_pk(pk)
    }
}

impl AuthorizationChecker for Connection {
    /// Administrators can comment anywhere; anyone can comment on public and
    /// internal projects; private projects require membership.
    fn can_comment_in_project(&self, user: &User, project: i64) -> Result<bool> {
        if user.admin {
            return Ok(true);
        }
        let Some(project) = self.project(project)? else {
            return Ok(false);
        };
        Ok(match project.visibility {
            Visibility::Public | Visibility::Internal => true,
            Visibility::Private => self.is_project_member(project.pk(), user.pk)?,
        })
    }
}

impl NoteableStore for Connection {
    fn noteable(&self, noteable: &NoteableRef) -> Result<Option<Noteable>> {
        self.noteable_by_ref(noteable)
    }
}

impl NoteRepository for Connection {
    fn create_note(&self, note: NewNote) -> Result<DbVal<Note>> {
        self.insert_note(note)
    }
}
