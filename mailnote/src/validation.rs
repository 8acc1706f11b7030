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

//! The ordered checks an incoming reply goes through before a note is
//! created.
//!
//! Each check is a [`ReceiverStage`]. [`stages`] returns them in the order
//! they must run; the receiver folds them over a [`ReceiverContext`] and stops
//! at the first error:
//!
//! | #  | Stage                  | Fails with                        |
//! |----|------------------------|-----------------------------------|
//! | 1  | [`ParseMessage`]       | [`Error::EmptyEmail`]             |
//! | 2  | [`ResolveNotification`]| [`Error::SentNotificationNotFound`] |
//! | 3  | [`RejectAutoGenerated`]| [`Error::AutoGeneratedEmail`]     |
//! | 4  | [`ResolveAuthor`]      | [`Error::UserNotFound`]           |
//! | 5  | [`RejectBlockedAuthor`]| [`Error::UserBlocked`]            |
//! | 6  | [`CheckPermission`]    | [`Error::UserNotAuthorized`]      |
//! | 7  | [`ResolveNoteable`]    | [`Error::NoteableNotFound`]       |
//! | 8  | [`ExtractReply`]       | [`Error::EmptyEmail`]             |
//!
//! Stages fill in the context as they go; later stages rely on the fields
//! earlier ones set.

use log::trace;

use crate::{
    errors::*,
    mail::ParsedMessage,
    models::{DbVal, Noteable, SentNotification, User},
    receiver::Collaborators,
    reply,
    reply_key::{AddressTemplate, ReplyKey},
};

/// State threaded through the stages.
pub struct ReceiverContext<'ctx> {
    /// Raw message bytes.
    pub raw: &'ctx [u8],
    /// Reply address template.
    pub template: &'ctx AddressTemplate,
    /// Stores and policies.
    pub collaborators: &'ctx Collaborators<'ctx>,
    /// Set by [`ParseMessage`].
    pub message: Option<ParsedMessage>,
    /// Set by [`ResolveNotification`].
    pub reply_key: Option<ReplyKey>,
    /// Set by [`ResolveNotification`].
    pub sent_notification: Option<DbVal<SentNotification>>,
    /// Set by [`ResolveAuthor`].
    pub author: Option<DbVal<User>>,
    /// Set by [`CheckPermission`] when the target exists.
    pub noteable: Option<Noteable>,
    /// Set by [`ExtractReply`].
    pub reply: Option<String>,
}

impl std::fmt::Debug for ReceiverContext<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("ReceiverContext")
            .field("raw", &format_args!("{} bytes", self.raw.len()))
            .field("template", &self.template)
            .field("message", &self.message)
            .field("reply_key", &self.reply_key)
            .field("sent_notification", &self.sent_notification)
            .field("author", &self.author)
            .field("noteable", &self.noteable)
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}

impl<'ctx> ReceiverContext<'ctx> {
    /// A context where no stage has run yet.
    pub fn new(
        raw: &'ctx [u8],
        template: &'ctx AddressTemplate,
        collaborators: &'ctx Collaborators<'ctx>,
    ) -> Self {
        Self {
            raw,
            template,
            collaborators,
            message: None,
            reply_key: None,
            sent_notification: None,
            author: None,
            noteable: None,
            reply: None,
        }
    }

    fn message(&self) -> Result<&ParsedMessage> {
        self.message
            .as_ref()
            .ok_or_else(|| Error::Bug("stage ran before the message was parsed".to_string()))
    }

    fn sent_notification(&self) -> Result<&DbVal<SentNotification>> {
        self.sent_notification.as_ref().ok_or_else(|| {
            Error::Bug("stage ran before the notification was resolved".to_string())
        })
    }

    fn author(&self) -> Result<&DbVal<User>> {
        self.author
            .as_ref()
            .ok_or_else(|| Error::Bug("stage ran before the author was resolved".to_string()))
    }
}

/// One check of an incoming reply. On success the stage hands the context
/// on, possibly with more fields set.
pub trait ReceiverStage {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Run the check.
    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>>;
}

/// The stages, in the order they run.
pub fn stages() -> Vec<Box<dyn ReceiverStage>> {
    vec![
        Box::new(ParseMessage),
        Box::new(ResolveNotification),
        Box::new(RejectAutoGenerated),
        Box::new(ResolveAuthor),
        Box::new(RejectBlockedAuthor),
        Box::new(CheckPermission),
        Box::new(ResolveNoteable),
        Box::new(ExtractReply),
    ]
}

/// Run `stages` over `ctx`, stopping at the first failure.
pub fn run<'p, 'ctx>(
    stages: Vec<Box<dyn ReceiverStage>>,
    ctx: &'p mut ReceiverContext<'ctx>,
) -> Result<&'p mut ReceiverContext<'ctx>> {
    stages.into_iter().fold(Ok(ctx), |ctx, stage| {
        ctx.and_then(|ctx| {
            trace!("Running {} stage", stage.name());
            stage.feed(ctx)
        })
    })
}

/// Parse the raw message; an empty or unparsable message is empty.
pub struct ParseMessage;

impl ReceiverStage for ParseMessage {
    fn name(&self) -> &'static str {
        "ParseMessage"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        ctx.message = Some(ParsedMessage::parse(ctx.raw)?);
        Ok(ctx)
    }
}

/// Find the reply key among the recipients and load its notification.
pub struct ResolveNotification;

impl ReceiverStage for ResolveNotification {
    fn name(&self) -> &'static str {
        "ResolveNotification"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        let key = ReplyKey::from_recipients(ctx.template, &ctx.message()?.recipients[..])?;
        trace!("Reply key is {key}");
        let sent_notification = ctx
            .collaborators
            .notifications
            .sent_notification_by_reply_key(&key)?
            .ok_or(Error::SentNotificationNotFound)?;
        trace!("Sent notification is {sent_notification}");
        ctx.reply_key = Some(key);
        ctx.sent_notification = Some(sent_notification);
        Ok(ctx)
    }
}

/// Ignore out-of-office and other automatic responses.
pub struct RejectAutoGenerated;

impl ReceiverStage for RejectAutoGenerated {
    fn name(&self) -> &'static str {
        "RejectAutoGenerated"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        if ctx.message()?.is_auto_generated() {
            return Err(Error::AutoGeneratedEmail);
        }
        Ok(ctx)
    }
}

/// Load the notification recipient, who becomes the note author.
pub struct ResolveAuthor;

impl ReceiverStage for ResolveAuthor {
    fn name(&self) -> &'static str {
        "ResolveAuthor"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        let recipient = ctx.sent_notification()?.recipient;
        let author = ctx
            .collaborators
            .users
            .user(recipient)?
            .ok_or(Error::UserNotFound)?;
        trace!("Author is {author}");
        ctx.author = Some(author);
        Ok(ctx)
    }
}

/// Blocked users cannot comment.
pub struct RejectBlockedAuthor;

impl ReceiverStage for RejectBlockedAuthor {
    fn name(&self) -> &'static str {
        "RejectBlockedAuthor"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        if ctx.author()?.is_blocked() {
            return Err(Error::UserBlocked);
        }
        Ok(ctx)
    }
}

/// Ask the authorization policy whether the author may comment on the
/// target.
///
/// When the target is gone the author is checked against the project the
/// notification recorded, so [`ResolveNoteable`] only reports a missing
/// target to users allowed to see it.
pub struct CheckPermission;

impl ReceiverStage for CheckPermission {
    fn name(&self) -> &'static str {
        "CheckPermission"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        let sent_notification = ctx.sent_notification()?;
        let noteable = ctx
            .collaborators
            .noteables
            .noteable(&sent_notification.noteable)?;
        let authorizer = ctx.collaborators.authorizer;
        let allowed = match noteable.as_ref() {
            Some(noteable) => authorizer.can_comment(ctx.author()?, noteable)?,
            None => authorizer.can_comment_in_project(ctx.author()?, sent_notification.project)?,
        };
        if !allowed {
            return Err(Error::UserNotAuthorized);
        }
        ctx.noteable = noteable;
        Ok(ctx)
    }
}

/// The target must still exist.
pub struct ResolveNoteable;

impl ReceiverStage for ResolveNoteable {
    fn name(&self) -> &'static str {
        "ResolveNoteable"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        if ctx.noteable.is_none() {
            return Err(Error::NoteableNotFound);
        }
        Ok(ctx)
    }
}

/// Extract the reply text; a reply without any text of its own is empty.
pub struct ExtractReply;

impl ReceiverStage for ExtractReply {
    fn name(&self) -> &'static str {
        "ExtractReply"
    }

    fn feed<'p, 'ctx>(
        self: Box<Self>,
        ctx: &'p mut ReceiverContext<'ctx>,
    ) -> Result<&'p mut ReceiverContext<'ctx>> {
        let reply = reply::extract(ctx.message()?);
        if reply.is_empty() {
            return Err(Error::EmptyEmail("the reply contains no text"));
        }
        ctx.reply = Some(reply);
        Ok(ctx)
    }
}
