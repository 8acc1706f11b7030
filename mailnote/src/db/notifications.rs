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

fn sent_notification_from_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<DbVal<SentNotification>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        SentNotification {
            pk,
            reply_key: row.get("reply_key")?,
            recipient: row.get("recipient")?,
            project: row.get("project")?,
            noteable: noteable_ref_from_row(row)?,
            created: row.get("created")?,
        },
        pk,
    ))
}

impl Connection {
    /// Record that a notification about `noteable` with reply key
    /// `reply_key` was sent to `recipient`.
    pub fn record_sent_notification(
        &self,
        reply_key: &ReplyKey,
        recipient: i64,
        noteable: &Noteable,
    ) -> Result<DbVal<SentNotification>> {
        let noteable_ref = noteable.noteable_ref();
        let (kind, noteable_id, commit_id) = noteable_ref.columns();
        let mut stmt = self.connection.prepare(
            "INSERT INTO sent_notification(reply_key, recipient, project, noteable_type, \
             noteable_id, commit_id) VALUES(?, ?, ?, ?, ?, ?) RETURNING *;",
        )?;
        let ret = stmt.query_row(
            rusqlite::params![
                reply_key.as_str(),
                recipient,
                noteable.project(),
                kind,
                noteable_id,
                commit_id,
            ],
            sent_notification_from_row,
        )?;

        trace!("record_sent_notification {:?}.", &ret);
        Ok(ret)
    }

    /// Fetch a sent notification by reply key.
    pub fn sent_notification(&self, reply_key: &str) -> Result<Option<DbVal<SentNotification>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM sent_notification WHERE reply_key = ?;")?;
        let ret = stmt
            .query_row([&reply_key], sent_notification_from_row)
            .optional()?;
        Ok(ret)
    }
}
