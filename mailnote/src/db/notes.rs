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

use log::{info, trace};
use rusqlite::OptionalExtension;

use super::*;

/// Maximum length of a note body, in characters.
pub const MAX_NOTE_LENGTH: usize = 1_000_000;

fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbVal<Note>> {
    let pk = row.get("pk")?;
    Ok(DbVal(
        Note {
            pk,
            author: row.get("author")?,
            body: row.get("body")?,
            noteable: noteable_ref_from_row(row)?,
            project: row.get("project")?,
            created: row.get("created")?,
        },
        pk,
    ))
}

/// Constraint failures while storing a note are refusals of the note, not
/// database faults.
fn refused_by_constraint(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            trace!("insert_note refused by constraint: {failure} {message:?}");
            Error::InvalidNote(vec![message.unwrap_or_else(|| failure.to_string())])
        }
        err => err.into(),
    }
}

impl Connection {
    /// Reasons `note` cannot be stored; empty if it can.
    pub fn note_rejection_reasons(&self, note: &NewNote) -> Result<Vec<String>> {
        let mut reasons = vec![];
        if note.body.trim().is_empty() {
            reasons.push("Note can't be blank".to_string());
        }
        if note.body.chars().count() > MAX_NOTE_LENGTH {
            reasons.push(format!(
                "Note is too long (maximum is {MAX_NOTE_LENGTH} characters)"
            ));
        }
        match self.noteable_by_ref(&note.noteable.noteable_ref())? {
            None => reasons.push("Noteable can't be blank".to_string()),
            Some(current) if current.discussion_locked() => {
                reasons.push("Discussion is locked".to_string());
            }
            Some(_) => {}
        }
        Ok(reasons)
    }

    /// Validate and store a note and its attachment records in one savepoint.
    ///
    /// Fails with [`Error::InvalidNote`] if the note is refused, in which
    /// case nothing is written.
    pub fn insert_note(&self, note: NewNote) -> Result<DbVal<Note>> {
        let reasons = self.note_rejection_reasons(&note)?;
        if !reasons.is_empty() {
            trace!("insert_note refused: {reasons:?}");
            return Err(Error::InvalidNote(reasons));
        }

        let noteable_ref = note.noteable.noteable_ref();
        let (kind, noteable_id, commit_id) = noteable_ref.columns();
        let tx = self.savepoint(stringify!(insert_note))?;
        let ret = {
            let mut stmt = tx.connection.prepare(
                "INSERT INTO note(author, project, noteable_type, noteable_id, commit_id, body) \
                 VALUES(?, ?, ?, ?, ?, ?) RETURNING *;",
            )?;
            let ret = stmt.query_row(
                rusqlite::params![
                    note.author,
                    note.noteable.project(),
                    kind,
                    noteable_id,
                    commit_id,
                    &note.body,
                ],
                note_from_row,
            )
            .map_err(refused_by_constraint)?;
            let mut stmt = tx.connection.prepare(
                "INSERT INTO note_attachment(note, position, url, label, is_image) VALUES(?, ?, \
                 ?, ?, ?);",
            )?;
            for (position, file) in note.attachments.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    ret.pk(),
                    position,
                    &file.url,
                    &file.label,
                    file.is_image,
                ])
                .map_err(refused_by_constraint)?;
            }
            ret
        };
        tx.commit()?;

        info!(
            "Created note #{} by user #{} on {} with {} attachment(s).",
            ret.pk(),
            ret.author,
            ret.noteable,
            note.attachments.len()
        );
        Ok(ret)
    }

    /// Fetch a note by primary key.
    pub fn note(&self, pk: i64) -> Result<Option<DbVal<Note>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM note WHERE pk = ?;")?;
        let ret = stmt.query_row([&pk], note_from_row).optional()?;
        Ok(ret)
    }

    /// Notes on `noteable`, oldest first.
    pub fn notes(&self, noteable: &NoteableRef) -> Result<Vec<DbVal<Note>>> {
        let (kind, noteable_id, commit_id) = noteable.columns();
        let project = match noteable {
            NoteableRef::Commit { project, .. } => Some(*project),
            NoteableRef::Issue { .. } | NoteableRef::MergeRequest { .. } => None,
        };
        let mut stmt = self.connection.prepare(
            "SELECT * FROM note WHERE noteable_type = ? AND noteable_id IS ? AND commit_id IS ? \
             AND (? IS NULL OR project = ?) ORDER BY pk;",
        )?;
        let iter = stmt.query_map(
            rusqlite::params![kind, noteable_id, commit_id, project, project],
            note_from_row,
        )?;

        let mut ret = vec![];
        for note in iter {
            let note = note?;
            ret.push(note);
        }
        Ok(ret)
    }

    /// Attachment records of note `note_pk`, in body order.
    pub fn note_attachments(&self, note_pk: i64) -> Result<Vec<DbVal<UploadedFile>>> {
        let mut stmt = self.connection.prepare(
            "SELECT * FROM note_attachment WHERE note = ? ORDER BY position;",
        )?;
        let iter = stmt.query_map([&note_pk], |row| {
            Ok(DbVal(
                UploadedFile {
                    url: row.get("url")?,
                    is_image: row.get("is_image")?,
                    label: row.get("label")?,
                },
                row.get("pk")?,
            ))
        })?;

        let mut ret = vec![];
        for file in iter {
            let file = file?;
            ret.push(file);
        }
        Ok(ret)
    }
}
