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

//! Errors of this library.
//!
//! The first group of variants are the rejections the [`Receiver`] can
//! return for an incoming reply; their `Display` text is meant to be shown
//! to the sender (e.g. in a bounce). The rest are infrastructure failures.
//!
//! [`Receiver`]: crate::Receiver

use std::{fmt::Write, time::Duration};

pub use crate::anyhow::Context;

use thiserror::Error;

/// Mailnote library error.
#[derive(Error, Debug)]
pub enum Error {
    /// The message or the reply it contains is empty.
    #[error(
        "Your reply could not be processed because it is empty ({0}). Make sure your reply is \
         at the top of the email; quoted text is ignored."
    )]
    EmptyEmail(&'static str),
    /// No notification matches the reply key of the recipient address.
    #[error(
        "We couldn't figure out what the email is in reply to. Please reply directly to a \
         notification email instead of composing a new message."
    )]
    SentNotificationNotFound,
    /// The message was flagged as an automatic response.
    #[error("The email was marked as automatically generated and has been ignored.")]
    AutoGeneratedEmail,
    /// The notification recipient does not exist anymore.
    #[error("We couldn't find the user the notification was sent to.")]
    UserNotFound,
    /// The notification recipient is blocked.
    #[error("Your account has been blocked. Contact an administrator if you think this is an error.")]
    UserBlocked,
    /// The notification recipient may not comment on the target.
    #[error("You are not allowed to respond to the thread you are replying to.")]
    UserNotAuthorized,
    /// The discussion target does not exist anymore.
    #[error("The thread you are replying to no longer exists.")]
    NoteableNotFound,
    /// The note was rejected by the store.
    #[error("The comment could not be created for the following reasons:{}", list_reasons(.0))]
    InvalidNote(Vec<String>),
    /// The reply references an attachment that is not part of the message.
    #[error("The reply refers to attachment `{0}`, which is not part of the message.")]
    UnresolvedAttachment(String),
    /// Uploading the attachments did not finish in time.
    #[error("Attachments could not be uploaded within {} seconds.", .0.as_secs())]
    UploadTimeout(Duration),
    /// Replying by email is turned off.
    #[error("Replying by email is disabled.")]
    IncomingEmailDisabled,

    /// An entry was not found in the database.
    #[error("This {0} is not present in the database.")]
    NotFound(&'static str),
    /// An error that shouldn't happen and should be reported.
    #[error("An error that shouldn't happen and should be reported: {0}.")]
    Bug(String),
    /// Error returned from an external user initiated operation such as
    /// deserialization or I/O.
    #[error("{0}")]
    External(#[from] anyhow::Error),
    /// Generic
    #[error("Error: {0}")]
    Generic(anyhow::Error),
    /// Error returned from sqlite3.
    #[error("Error returned from sqlite3.")]
    Sql(#[from] rusqlite::Error),
    /// Error returned from internal I/O operations.
    #[error("Error returned from internal I/O operations.")]
    Io(#[from] ::std::io::Error),
    /// Error returned from e-mail address parsing in the `melib` crate.
    #[error("Error returned from e-mail address parsing in `melib` crate.")]
    Melib(#[from] melib::error::Error),
    /// Error returned from MIME parsing in the `mailparse` crate.
    #[error("Error returned from MIME parsing.")]
    MailParse(#[from] mailparse::MailParseError),
}

fn list_reasons(reasons: &[String]) -> String {
    let mut ret = String::new();
    for reason in reasons {
        _ = write!(ret, "\n\n- {reason}");
    }
    ret
}

impl Error {
    /// Helper function to create a new generic error message.
    pub fn new_external<S: Into<String>>(msg: S) -> Self {
        let msg = msg.into();
        Self::External(anyhow::Error::msg(msg))
    }

    /// Whether this error is a rejection of the incoming message, as opposed
    /// to a failure of the infrastructure processing it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::EmptyEmail(_)
                | Self::SentNotificationNotFound
                | Self::AutoGeneratedEmail
                | Self::UserNotFound
                | Self::UserBlocked
                | Self::UserNotAuthorized
                | Self::NoteableNotFound
                | Self::InvalidNote(_)
                | Self::UnresolvedAttachment(_)
                | Self::IncomingEmailDisabled
        )
    }

    /// Display the error and every error in its `source()` chain, one per
    /// line.
    pub fn display_chain(&'_ self) -> impl std::fmt::Display + '_ {
        ErrorChainDisplay(self)
    }
}

struct ErrorChainDisplay<'e>(&'e Error);

impl std::fmt::Display for ErrorChainDisplay<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self.0);
        let mut count = 1;
        while let Some(err) = current {
            writeln!(fmt, "[{count}] {err}")?;
            count += 1;
            current = err.source();
            // `External` displays its inner `anyhow::Error` which already
            // renders the first context message.
            if count == 2 {
                if let Error::External(inner) = self.0 {
                    current = inner.chain().nth(1);
                }
            }
        }
        Ok(())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Generic(anyhow::Error::msg(s))
    }
}
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Generic(anyhow::Error::msg(s.to_string()))
    }
}

/// Type alias for Mailnote library Results.
pub type Result<T> = std::result::Result<T, Error>;
