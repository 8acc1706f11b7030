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

//! Collaborators of the [`Receiver`](crate::Receiver).
//!
//! [`Connection`](crate::Connection) implements all of them on top of
//! sqlite3; tests and embedders can provide their own.

use crate::{
    errors::*,
    models::{DbVal, NewNote, Note, Noteable, NoteableRef, SentNotification, User},
    reply_key::ReplyKey,
};

/// Lookup of sent notifications by reply key.
pub trait NotificationStore {
    /// The notification whose reply address carries `key`, if any.
    fn sent_notification_by_reply_key(
        &self,
        key: &ReplyKey,
    ) -> Result<Option<DbVal<SentNotification>>>;
}

/// Lookup of user accounts.
pub trait UserStore {
    /// The user with primary key `pk`, if any.
    fn user(&self, pk: i64) -> Result<Option<DbVal<User>>>;
}

/// Permission policy.
pub trait AuthorizationChecker {
    /// Whether `user` may create notes in project `project`.
    fn can_comment_in_project(&self, user: &User, project: i64) -> Result<bool>;

    /// Whether `user` may create notes on `noteable`.
    fn can_comment(&self, user: &User, noteable: &Noteable) -> Result<bool> {
        self.can_comment_in_project(user, noteable.project())
    }
}

/// Lookup of discussion targets.
pub trait NoteableStore {
    /// The target identified by `noteable`, if it still exists.
    fn noteable(&self, noteable: &NoteableRef) -> Result<Option<Noteable>>;
}

/// Persistence of notes.
pub trait NoteRepository {
    /// Persist `note` and its attachment records atomically.
    ///
    /// A note the store refuses is reported as [`Error::InvalidNote`] with
    /// the reasons; nothing is written in that case.
    fn create_note(&self, note: NewNote) -> Result<DbVal<Note>>;
}
