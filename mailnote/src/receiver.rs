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

//! Turning an incoming reply into a note.

use std::{sync::Arc, time::Duration};

use log::{info, trace, warn};

use crate::{
    attachments::{attachment_parts, link_attachments, AttachmentProcessor, AttachmentUploader},
    config::{Configuration, IncomingEmailSettings},
    errors::*,
    models::{DbVal, NewNote, Note, Noteable, User},
    reply_key::AddressTemplate,
    stores::{AuthorizationChecker, NoteRepository, NoteableStore, NotificationStore, UserStore},
    validation::{self, ReceiverContext},
    Connection,
};

/// Everything the [`Receiver`] reads from or writes to.
#[derive(Clone)]
pub struct Collaborators<'a> {
    /// Sent notification lookup.
    pub notifications: &'a dyn NotificationStore,
    /// User lookup.
    pub users: &'a dyn UserStore,
    /// Permission policy.
    pub authorizer: &'a dyn AuthorizationChecker,
    /// Discussion target lookup.
    pub noteables: &'a dyn NoteableStore,
    /// Note persistence.
    pub notes: &'a dyn NoteRepository,
    /// Attachment storage.
    pub uploader: Arc<dyn AttachmentUploader>,
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl<'a> Collaborators<'a> {
    /// Use `db` for every store and `uploader` for attachments.
    pub fn from_connection(db: &'a Connection, uploader: Arc<dyn AttachmentUploader>) -> Self {
        Self {
            notifications: db,
            users: db,
            authorizer: db,
            noteables: db,
            notes: db,
            uploader,
        }
    }
}

/// What [`Receiver::check`] found out about a reply, without uploading or
/// storing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPreview {
    /// The note author.
    pub author: DbVal<User>,
    /// The discussion target.
    pub noteable: Noteable,
    /// The reply text, before attachments are linked.
    pub reply: String,
    /// File names of the attachments that would be uploaded.
    pub attachments: Vec<String>,
}

/// Processes incoming replies.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use mailnote::{uploads::FileUploader, *};
/// # fn main() -> mailnote::Result<()> {
/// let conf = Configuration::from_file("/etc/mnote.toml")?;
/// let db = Connection::open_db(conf.clone())?;
/// let uploader = Arc::new(FileUploader::from_configuration(&conf));
/// let receiver = Receiver::from_configuration(&conf, Collaborators::from_connection(&db, uploader))?;
/// let note = receiver.execute(b"From: ...")?;
/// println!("created {note}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Receiver<'a> {
    enabled: bool,
    template: AddressTemplate,
    upload_timeout: Duration,
    collaborators: Collaborators<'a>,
}

impl<'a> Receiver<'a> {
    /// Create a receiver. Fails if `settings.address` is not a valid reply
    /// address template.
    pub fn new(
        settings: &IncomingEmailSettings,
        upload_timeout: Duration,
        collaborators: Collaborators<'a>,
    ) -> Result<Self> {
        Ok(Self {
            enabled: settings.enabled,
            template: AddressTemplate::new(&settings.address)?,
            upload_timeout,
            collaborators,
        })
    }

    /// Create a receiver from the incoming e-mail settings and upload timeout
    /// of `conf`.
    pub fn from_configuration(conf: &Configuration, collaborators: Collaborators<'a>) -> Result<Self> {
        Self::new(&conf.incoming_email, conf.upload_timeout(), collaborators)
    }

    /// The reply address template in use.
    pub fn template(&self) -> &AddressTemplate {
        &self.template
    }

    fn validate<'s>(&'s self, raw: &'s [u8]) -> Result<ReceiverContext<'s>> {
        if !self.enabled {
            return Err(Error::IncomingEmailDisabled);
        }
        let mut ctx = ReceiverContext::new(raw, &self.template, &self.collaborators);
        if let Err(err) = validation::run(validation::stages(), &mut ctx) {
            warn!("Rejected incoming message: {err}");
            return Err(err);
        }
        Ok(ctx)
    }

    /// Run every check on `raw` without uploading attachments or creating a
    /// note.
    pub fn check(&self, raw: &[u8]) -> Result<ReplyPreview> {
        let ctx = self.validate(raw)?;
        let (Some(message), Some(author), Some(noteable), Some(reply)) =
            (ctx.message, ctx.author, ctx.noteable, ctx.reply)
        else {
            return Err(Error::Bug("validation left the context incomplete".to_string()));
        };
        let attachments = attachment_parts(&message)
            .into_iter()
            .enumerate()
            .map(|(idx, part)| crate::attachments::attachment_filename(part, idx))
            .collect();
        Ok(ReplyPreview {
            author,
            noteable,
            reply,
            attachments,
        })
    }

    /// Create a note from the reply in `raw`.
    ///
    /// On failure no note exists; files uploaded before the failure are left
    /// in storage.
    pub fn execute(&self, raw: &[u8]) -> Result<DbVal<Note>> {
        let ctx = self.validate(raw)?;
        let (Some(message), Some(author), Some(noteable), Some(reply)) =
            (ctx.message, ctx.author, ctx.noteable, ctx.reply)
        else {
            return Err(Error::Bug("validation left the context incomplete".to_string()));
        };

        let parts = attachment_parts(&message);
        trace!("Message has {} attachment(s)", parts.len());
        let attachments = AttachmentProcessor::new(
            Arc::clone(&self.collaborators.uploader),
            self.upload_timeout,
        )
        .process(&parts)?;
        let body = link_attachments(&reply, &attachments)?;

        let note = self
            .collaborators
            .notes
            .create_note(NewNote {
                author: author.pk(),
                body,
                noteable,
                attachments: attachments.into_iter().map(|a| a.file).collect(),
            })
            .map_err(|err| {
                warn!("Note could not be created: {err}");
                err
            })?;
        info!("Incoming reply from {} became note #{}", author, note.pk());
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        models::{Issue, NoteableRef, SentNotification, UploadedFile},
        reply_key::ReplyKey,
    };

    const KEY: &str = "59d8df8370b7e95c5a49fbf86aeb2c93";
    const TEMPLATE: &str = "reply+%{key}@appmail.adventuretime.ooo";

    fn reply(extra_headers: &str, body: &str) -> Vec<u8> {
        format!(
            "From: Jake the Dog <jake@adventuretime.ooo>\r\nTo: \
             reply+{KEY}@appmail.adventuretime.ooo\r\n{extra_headers}Subject: Re: Lost \
             sword\r\n\r\n{body}\r\n"
        )
        .into_bytes()
    }

    struct Mock {
        notification: Option<DbVal<SentNotification>>,
        user: Option<DbVal<User>>,
        allowed: bool,
        noteable: Option<Noteable>,
        reject: Option<Vec<String>>,
        notes: Mutex<Vec<NewNote>>,
    }

    impl Default for Mock {
        fn default() -> Self {
            let issue = Issue {
                pk: 7,
                project: 3,
                title: "Lost sword".into(),
                discussion_locked: false,
            };
            Self {
                notification: Some(DbVal(
                    SentNotification {
                        pk: 1,
                        reply_key: KEY.into(),
                        recipient: 2,
                        project: 3,
                        noteable: NoteableRef::Issue { pk: 7 },
                        created: chrono::Utc::now(),
                    },
                    1,
                )),
                user: Some(DbVal(
                    User {
                        pk: 2,
                        username: "jake".into(),
                        email: "jake@adventuretime.ooo".into(),
                        blocked: false,
                        admin: false,
                    },
                    2,
                )),
                allowed: true,
                noteable: Some(Noteable::Issue(issue)),
                reject: None,
                notes: Mutex::new(vec![]),
            }
        }
    }

    impl NotificationStore for Mock {
        fn sent_notification_by_reply_key(
            &self,
            key: &ReplyKey,
        ) -> Result<Option<DbVal<SentNotification>>> {
            Ok(self
                .notification
                .clone()
                .filter(|n| n.reply_key == key.as_str()))
        }
    }

    impl UserStore for Mock {
        fn user(&self, pk: i64) -> Result<Option<DbVal<User>>> {
            Ok(self.user.clone().filter(|u| u.pk() == pk))
        }
    }

    impl AuthorizationChecker for Mock {
        fn can_comment_in_project(&self, _: &User, _: i64) -> Result<bool> {
            Ok(self.allowed)
        }
    }

    impl NoteableStore for Mock {
        fn noteable(&self, _: &NoteableRef) -> Result<Option<Noteable>> {
            Ok(self.noteable.clone())
        }
    }

    impl NoteRepository for Mock {
        fn create_note(&self, note: NewNote) -> Result<DbVal<Note>> {
            if let Some(reasons) = self.reject.clone() {
                return Err(Error::InvalidNote(reasons));
            }
            let mut notes = self.notes.lock().unwrap();
            notes.push(note.clone());
            let pk = i64::try_from(notes.len()).unwrap();
            Ok(DbVal(
                Note {
                    pk,
                    author: note.author,
                    body: note.body,
                    noteable: note.noteable.noteable_ref(),
                    project: note.noteable.project(),
                    created: chrono::Utc::now(),
                },
                pk,
            ))
        }
    }

    struct Uploader {
        fail: bool,
        delay: Duration,
    }

    impl AttachmentUploader for Uploader {
        fn upload(&self, _: &[u8], filename: &str, mime_type: &str) -> Result<UploadedFile> {
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(Error::new_external("upload service unavailable"));
            }
            Ok(UploadedFile {
                url: format!("uploads/{filename}"),
                is_image: mime_type.starts_with("image/"),
                label: filename.to_string(),
            })
        }
    }

    fn uploader() -> Arc<dyn AttachmentUploader> {
        Arc::new(Uploader {
            fail: false,
            delay: Duration::ZERO,
        })
    }

    fn receiver<'a>(mock: &'a Mock, uploader: Arc<dyn AttachmentUploader>) -> Receiver<'a> {
        Receiver::new(
            &IncomingEmailSettings::new(TEMPLATE),
            Duration::from_secs(5),
            Collaborators {
                notifications: mock,
                users: mock,
                authorizer: mock,
                noteables: mock,
                notes: mock,
                uploader,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_creates_note() {
        let mock = Mock::default();
        let note = receiver(&mock, uploader())
            .execute(&reply(
                "",
                "I could not disagree more.\r\n\r\nOn Sun, Finn wrote:\r\n> quoted",
            ))
            .unwrap();
        assert_eq!(note.author, 2);
        assert_eq!(note.body, "I could not disagree more.");
        assert_eq!(note.noteable, NoteableRef::Issue { pk: 7 });
        assert_eq!(mock.notes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled() {
        let mock = Mock::default();
        let mut settings = IncomingEmailSettings::new(TEMPLATE);
        settings.enabled = false;
        let receiver =
            Receiver::new(&settings, Duration::from_secs(5), Collaborators {
                notifications: &mock,
                users: &mock,
                authorizer: &mock,
                noteables: &mock,
                notes: &mock,
                uploader: uploader(),
            })
            .unwrap();
        assert!(matches!(
            receiver.execute(b"").unwrap_err(),
            Error::IncomingEmailDisabled
        ));
    }

    #[test]
    fn test_invalid_template() {
        let mock = Mock::default();
        Receiver::new(
            &IncomingEmailSettings::new("reply@appmail.adventuretime.ooo"),
            Duration::from_secs(5),
            Collaborators {
                notifications: &mock,
                users: &mock,
                authorizer: &mock,
                noteables: &mock,
                notes: &mock,
                uploader: uploader(),
            },
        )
        .unwrap_err();
    }

    fn assert_rejected(mock: Mock, raw: &[u8], check: impl Fn(&Error) -> bool) {
        let err = receiver(&mock, uploader()).execute(raw).unwrap_err();
        assert!(check(&err), "{err:?}");
        assert!(err.is_rejection(), "{err:?}");
        assert!(mock.notes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_each_rejection() {
        assert_rejected(Mock::default(), b"  \r\n", |e| {
            matches!(e, Error::EmptyEmail(_))
        });
        assert_rejected(
            Mock {
                notification: None,
                ..Mock::default()
            },
            &reply("", "Hello"),
            |e| matches!(e, Error::SentNotificationNotFound),
        );
        // The recipient is not a reply address at all.
        assert_rejected(
            Mock::default(),
            b"From: jake@adventuretime.ooo\r\nTo: finn@adventuretime.ooo\r\n\r\nHello\r\n",
            |e| matches!(e, Error::SentNotificationNotFound),
        );
        assert_rejected(
            Mock::default(),
            &reply("Auto-Submitted: auto-replied\r\n", "I am on vacation"),
            |e| matches!(e, Error::AutoGeneratedEmail),
        );
        assert_rejected(
            Mock {
                user: None,
                ..Mock::default()
            },
            &reply("", "Hello"),
            |e| matches!(e, Error::UserNotFound),
        );
        assert_rejected(
            Mock {
                allowed: false,
                ..Mock::default()
            },
            &reply("", "Hello"),
            |e| matches!(e, Error::UserNotAuthorized),
        );
        assert_rejected(
            Mock {
                noteable: None,
                ..Mock::default()
            },
            &reply("", "Hello"),
            |e| matches!(e, Error::NoteableNotFound),
        );
        assert_rejected(
            Mock::default(),
            &reply("", "\r\nOn Sun, Finn wrote:\r\n> quoted only"),
            |e| matches!(e, Error::EmptyEmail(_)),
        );
        assert_rejected(
            Mock {
                reject: Some(vec!["Discussion is locked".into()]),
                ..Mock::default()
            },
            &reply("", "Hello"),
            |e| matches!(e, Error::InvalidNote(r) if r == &["Discussion is locked".to_string()]),
        );
    }

    #[test]
    fn test_blocked_user() {
        let mut mock = Mock::default();
        if let Some(user) = mock.user.as_mut() {
            user.blocked = true;
        }
        assert!(matches!(
            receiver(&mock, uploader())
                .execute(&reply("", "Hello"))
                .unwrap_err(),
            Error::UserBlocked
        ));
    }

    #[test]
    fn test_order_is_fail_fast() {
        // Every later check would fail too; the earliest one is reported.
        let mut mock = Mock {
            allowed: false,
            noteable: None,
            reject: Some(vec!["nope".into()]),
            ..Mock::default()
        };
        let auto = reply("X-Autoreply: yes\r\n", "");
        assert!(matches!(
            receiver(&mock, uploader()).execute(&auto).unwrap_err(),
            Error::AutoGeneratedEmail
        ));
        if let Some(user) = mock.user.as_mut() {
            user.blocked = true;
        }
        assert!(matches!(
            receiver(&mock, uploader())
                .execute(&reply("", ""))
                .unwrap_err(),
            Error::UserBlocked
        ));
        mock.user = None;
        assert!(matches!(
            receiver(&mock, uploader())
                .execute(&reply("", ""))
                .unwrap_err(),
            Error::UserNotFound
        ));
        // Permission is checked against the notification's project before
        // the target is looked for.
        let mock = Mock {
            noteable: None,
            allowed: false,
            ..Mock::default()
        };
        assert!(matches!(
            receiver(&mock, uploader())
                .execute(&reply("", "Hello"))
                .unwrap_err(),
            Error::UserNotAuthorized
        ));
        let mock = Mock {
            noteable: None,
            ..Mock::default()
        };
        assert!(matches!(
            receiver(&mock, uploader())
                .execute(&reply("", "Hello"))
                .unwrap_err(),
            Error::NoteableNotFound
        ));
    }

    fn with_attachments() -> Vec<u8> {
        format!(
            "From: jake@adventuretime.ooo\r
To: reply+{KEY}@appmail.adventuretime.ooo\r
Subject: Re: Lost sword\r
MIME-Version: 1.0\r
Content-Type: multipart/mixed; boundary=\"b\"\r
\r
--b\r
Content-Type: text/plain\r
\r
See [attachment:2]\r
--b\r
Content-Type: image/png; name=\"one.png\"\r
Content-Transfer-Encoding: base64\r
\r
iVBORw0KGgo=\r
--b\r
Content-Type: application/pdf\r
Content-Disposition: attachment; filename=\"two.pdf\"\r
\r
%PDF\r
--b\r
Content-Type: text/plain\r
Content-Disposition: attachment; filename=\"three.txt\"\r
\r
three\r
--b--\r
"
        )
        .into_bytes()
    }

    #[test]
    fn test_attachments_in_order() {
        let mock = Mock::default();
        let uploader = Arc::new(Uploader {
            fail: false,
            delay: Duration::from_millis(10),
        });
        let note = receiver(&mock, uploader)
            .execute(&with_attachments())
            .unwrap();
        assert_eq!(
            note.body,
            "See [two.pdf](uploads/two.pdf)\n\n![one.png](uploads/one.png)\n\n[three.txt](uploads/three.txt)"
        );
        let stored = mock.notes.lock().unwrap();
        assert_eq!(
            stored[0]
                .attachments
                .iter()
                .map(|a| a.label.as_str())
                .collect::<Vec<_>>(),
            vec!["one.png", "two.pdf", "three.txt"]
        );
    }

    #[test]
    fn test_upload_failure_propagates() {
        let mock = Mock::default();
        let err = receiver(
            &mock,
            Arc::new(Uploader {
                fail: true,
                delay: Duration::ZERO,
            }),
        )
        .execute(&with_attachments())
        .unwrap_err();
        assert!(matches!(err, Error::External(_)), "{err:?}");
        assert_eq!(err.to_string(), "upload service unavailable");
        assert!(mock.notes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_upload_timeout() {
        let mock = Mock::default();
        let receiver = Receiver::new(
            &IncomingEmailSettings::new(TEMPLATE),
            Duration::from_millis(10),
            Collaborators {
                notifications: &mock,
                users: &mock,
                authorizer: &mock,
                noteables: &mock,
                notes: &mock,
                uploader: Arc::new(Uploader {
                    fail: false,
                    delay: Duration::from_millis(500),
                }),
            },
        )
        .unwrap();
        assert!(matches!(
            receiver.execute(&with_attachments()).unwrap_err(),
            Error::UploadTimeout(_)
        ));
        assert!(mock.notes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_same_message_twice() {
        let mock = Mock::default();
        let receiver = receiver(&mock, uploader());
        let raw = reply("", "Me too.");
        let first = receiver.execute(&raw).unwrap();
        let second = receiver.execute(&raw).unwrap();
        assert_ne!(first.pk(), second.pk());
        assert_eq!(mock.notes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_check() {
        let mock = Mock::default();
        let preview = receiver(&mock, uploader())
            .check(&with_attachments())
            .unwrap();
        assert_eq!(preview.reply, "See [attachment:2]");
        assert_eq!(preview.attachments, vec!["one.png", "two.pdf", "three.txt"]);
        assert!(mock.notes.lock().unwrap().is_empty());
    }
}
