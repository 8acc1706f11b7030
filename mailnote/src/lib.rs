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

#![deny(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    clippy::cargo,
    clippy::nursery,
    /* restriction */
    clippy::dbg_macro,
    clippy::rc_buffer,
    clippy::as_underscore,
    clippy::assertions_on_result_states,
    /* pedantic */
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::ptr_as_ptr,
    clippy::bool_to_int_with_if,
    clippy::borrow_as_ptr,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_lossless,
    clippy::cast_ptr_alignment,
    clippy::naive_bytecount
)]
#![allow(clippy::multiple_crate_versions, clippy::missing_const_for_fn)]

//! Reply by e-mail: turn replies to notification e-mails into notes on the
//! issue, merge request or commit the notification was about.
//!
//! Every notification is sent with a unique reply address such as
//! `reply+59d8df8370b7e95c5a49fbf86aeb2c93@example.com`, and the key in it is
//! recorded as a [`SentNotification`](models::SentNotification). When a reply
//! arrives, the [`Receiver`] parses it, finds the notification from the reply
//! key, checks the recipient may still comment, strips quoted history and
//! signatures from the text, uploads attachments and stores the note.
//!
//! Data is stored in a `sqlite3` database.
//! You can inspect the schema in [`SCHEMA`](crate::Connection::SCHEMA).
//!
//! # Usage
//!
//! `mailnote` can be used with the CLI tool in `mailnote-cli`, which reads
//! incoming messages from standard input, or directly as a library:
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use mailnote::{models::*, uploads::FileUploader, *};
//! # use tempfile::TempDir;
//!
//! # let tmp_dir = TempDir::new().unwrap();
//! # let db_path = tmp_dir.path().join("mnote.db");
//! # let mut config = Configuration::new(db_path);
//! # config.incoming_email = IncomingEmailSettings::new("reply+%{key}@example.com");
//! #
//! # fn do_test(config: Configuration) -> mailnote::Result<()> {
//! let db = Connection::open_or_create_db(config.clone())?.trusted();
//!
//! let jake = db.create_user("jake", "jake@adventuretime.ooo", false)?;
//! let project = db.create_project("ooo/land", Visibility::Public)?;
//! let issue = db.create_issue(project.pk(), "Lost sword")?;
//! let key = ReplyKey::new("59d8df8370b7e95c5a49fbf86aeb2c93").unwrap();
//! db.record_sent_notification(&key, jake.pk(), &Noteable::Issue(issue.clone().into_inner()))?;
//!
//! // Drop privileges; we can only create notes from now on.
//! let db = db.untrusted();
//!
//! let uploader = Arc::new(FileUploader::from_configuration(&config));
//! let receiver = Receiver::from_configuration(&config, Collaborators::from_connection(&db, uploader))?;
//! let note = receiver.execute(b"From: Jake <jake@adventuretime.ooo>
//! To: reply+59d8df8370b7e95c5a49fbf86aeb2c93@example.com
//! Subject: Re: Lost sword
//!
//! I could not disagree more.
//!
//! On Sun, Jun 9, 2013 at 1:39 PM, Finn <finn@adventuretime.ooo> wrote:
//! > I think we lost it for good.
//! ")?;
//!
//! assert_eq!(note.author, jake.pk());
//! assert_eq!(note.body, "I could not disagree more.");
//! assert_eq!(db.notes(&NoteableRef::Issue { pk: issue.pk() })?.len(), 1);
//! # Ok(())
//! # }
//! # do_test(config).unwrap();
//! ```

/* Annotations:
 *
 * Global tags (in tagref format <https://github.com/stepchowfun/tagref>) for source code
 * annotation:
 *
 * - [tag:needs_unit_test]
 * - [tag:needs_user_doc]
 * - [tag:needs_dev_doc]
 * - [tag:FIXME]
 * - [tag:TODO]
 * - [tag:VERIFY] Verify whether this is the correct way to do something
 */

/// Error library
pub extern crate anyhow;
/// Date library
pub extern crate chrono;
/// Sql library
pub extern crate rusqlite;

/// Alias for [`chrono::DateTime<chrono::Utc>`].
pub type DateTime = chrono::DateTime<chrono::Utc>;

/// Serde
#[macro_use]
pub extern crate serde;
/// Log
pub extern crate log;
/// melib
pub extern crate melib;
/// MIME parsing
pub extern crate mailparse;

pub mod attachments;
mod config;
mod connection;
mod db;
mod errors;
pub mod mail;
pub mod models;
pub mod receiver;
pub mod reply;
pub mod reply_key;
pub mod stores;
pub mod uploads;
pub mod validation;

pub use config::{Configuration, IncomingEmailSettings};
pub use connection::*;
pub use db::MAX_NOTE_LENGTH;
pub use errors::*;
pub use mail::ParsedMessage;
pub use receiver::{Collaborators, Receiver, ReplyPreview};
pub use reply_key::{AddressTemplate, ReplyKey};

use percent_encoding::CONTROLS;
pub use percent_encoding::{utf8_percent_encode, AsciiSet};

// from https://github.com/servo/rust-url/blob/master/url/src/parser.rs
const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');
const PATH: &AsciiSet = &FRAGMENT.add(b'#').add(b'?').add(b'{').add(b'}');

/// Set for percent encoding URL components.
pub const PATH_SEGMENT: &AsciiSet = &PATH.add(b'/').add(b'%');
