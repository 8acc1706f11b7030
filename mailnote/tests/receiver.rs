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

use std::sync::Arc;

use mailnote::{models::*, uploads::FileUploader, Collaborators, Connection, Error, Receiver};
use mailnote_tests::{init_stderr_logging, TestInstance, REPLY_KEY};

const VALID_REPLY: &[u8] = include_bytes!("data/valid_reply.eml");
const WRONG_REPLY_KEY: &[u8] = include_bytes!("data/wrong_reply_key.eml");
const AUTO_REPLY: &[u8] = include_bytes!("data/auto_reply.eml");
const NO_CONTENT_REPLY: &[u8] = include_bytes!("data/no_content_reply.eml");
const HTML_REPLY: &[u8] = include_bytes!("data/html_reply.eml");
const ATTACHMENT_REPLY: &[u8] = include_bytes!("data/attachment_reply.eml");
const FORGED_FROM_REPLY: &[u8] = include_bytes!("data/forged_from_reply.eml");
const CORRUPT_ATTACHMENT_REPLY: &[u8] = include_bytes!("data/corrupt_attachment_reply.eml");

const VALID_REPLY_TEXT: &str = "I could not disagree more. I am obviously biased but adventure \
                                time is the\ngreatest show ever created. Everyone should watch \
                                it.\n\n- Jake out";

/// Run `raw` through a receiver over an untrusted connection to the
/// instance's database.
fn receive(instance: &TestInstance, raw: &[u8]) -> mailnote::Result<DbVal<Note>> {
    let db = Connection::open_db(instance.config.clone())
        .unwrap()
        .untrusted();
    let uploader = Arc::new(FileUploader::from_configuration(&instance.config));
    let receiver =
        Receiver::from_configuration(&instance.config, Collaborators::from_connection(&db, uploader))
            .unwrap();
    receiver.execute(raw)
}

/// `raw` with the seeded reply key replaced by `key`.
fn with_reply_key(raw: &[u8], key: &str) -> Vec<u8> {
    String::from_utf8(raw.to_vec())
        .unwrap()
        .replace(REPLY_KEY, key)
        .into_bytes()
}

#[test]
fn test_valid_reply_creates_note() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let note = receive(&instance, VALID_REPLY).unwrap();
    assert_eq!(note.author, instance.user.pk());
    assert_eq!(note.project, instance.project.pk());
    assert_eq!(note.noteable, instance.issue_ref());
    assert_eq!(note.body, VALID_REPLY_TEXT);

    let db = instance.db();
    let notes = db.notes(&instance.issue_ref()).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0], note);
    assert!(db.note_attachments(note.pk()).unwrap().is_empty());
}

#[test]
fn test_author_is_notification_recipient() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Private);
    let db = instance.db();
    let finn = db
        .create_user("finn", "finn@adventuretime.ooo", false)
        .unwrap();
    db.add_project_member(instance.project.pk(), finn.pk())
        .unwrap();

    // The message claims to come from a project member, but the reply key
    // was issued to jake, who is not one.
    let err = receive(&instance, FORGED_FROM_REPLY).unwrap_err();
    assert!(matches!(err, Error::UserNotAuthorized), "{err:?}");

    db.add_project_member(instance.project.pk(), instance.user.pk())
        .unwrap();
    let note = receive(&instance, FORGED_FROM_REPLY).unwrap();
    assert_eq!(note.author, instance.user.pk());
    assert_ne!(note.author, finn.pk());
    assert_eq!(note.body, VALID_REPLY_TEXT);
}

#[test]
fn test_same_reply_twice_creates_two_notes() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let first = receive(&instance, VALID_REPLY).unwrap();
    let second = receive(&instance, VALID_REPLY).unwrap();
    assert_ne!(first.pk(), second.pk());
    assert_eq!(first.body, second.body);
    assert_eq!(instance.db().notes(&instance.issue_ref()).unwrap().len(), 2);
}

#[test]
fn test_html_reply() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let note = receive(&instance, HTML_REPLY).unwrap();
    assert_eq!(note.body, "It was in the tree fort all along.");
}

#[test]
fn test_reply_to_merge_request_and_commit() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Internal);

    let mr_key = "1ba1d27c0c1bbd37a5a3bb2a1f1c3b9e";
    instance.notify(
        mr_key,
        instance.user.pk(),
        Noteable::MergeRequest(instance.merge_request.clone().into_inner()),
    );
    let note = receive(&instance, &with_reply_key(VALID_REPLY, mr_key)).unwrap();
    assert_eq!(
        note.noteable,
        NoteableRef::MergeRequest {
            pk: instance.merge_request.pk()
        }
    );

    let commit_key = "f3a9b2d6c1e04b7a8e5d2c9b1a0f3e6d";
    instance.notify(
        commit_key,
        instance.user.pk(),
        Noteable::Commit(instance.commit.clone().into_inner()),
    );
    let note = receive(&instance, &with_reply_key(VALID_REPLY, commit_key)).unwrap();
    let commit_ref = NoteableRef::Commit {
        project: instance.project.pk(),
        sha: instance.commit.sha.clone(),
    };
    assert_eq!(note.noteable, commit_ref);
    assert_eq!(note.body, VALID_REPLY_TEXT);
    assert_eq!(instance.db().notes(&commit_ref).unwrap().len(), 1);
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_reply_with_attachments() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let note = receive(&instance, ATTACHMENT_REPLY).unwrap();
    println!("Note body: {}", note.body);
    assert!(
        note.body
            .starts_with("Found it, see below.\n\n![sword.png](/uploads/"),
        "{}",
        note.body
    );
    assert!(
        note.body.contains("/sword.png)\n\n[map.txt](/uploads/"),
        "{}",
        note.body
    );
    assert!(note.body.ends_with("/map.txt)"), "{}", note.body);

    let files = instance.db().note_attachments(note.pk()).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].label, "sword.png");
    assert!(files[0].is_image);
    assert_eq!(files[1].label, "map.txt");
    assert!(!files[1].is_image);

    // Stored under the uploads directory as <hash>/<filename>.
    let relative = files[0].url.trim_start_matches("/uploads/");
    let stored = std::fs::read(instance.config.uploads_directory().join(relative)).unwrap();
    assert!(stored.starts_with(b"\x89PNG"));
    let relative = files[1].url.trim_start_matches("/uploads/");
    assert_eq!(
        std::fs::read_to_string(instance.config.uploads_directory().join(relative))
            .unwrap()
            .trim(),
        "Tree fort, second floor."
    );
}

#[test]
fn test_reply_with_corrupt_attachment() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    // Undecodable parts do not hide the real rejection reason.
    let unknown = with_reply_key(CORRUPT_ATTACHMENT_REPLY, "00000000000000000000000000000000");
    let err = receive(&instance, &unknown).unwrap_err();
    assert!(matches!(err, Error::SentNotificationNotFound), "{err:?}");

    let note = receive(&instance, CORRUPT_ATTACHMENT_REPLY).unwrap();
    assert!(
        note.body
            .starts_with("The scan did not come out right.\n\n[scan.pdf](/uploads/"),
        "{}",
        note.body
    );
    let files = instance.db().note_attachments(note.pk()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].label, "scan.pdf");
}

#[test]
fn test_unknown_reply_key() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    assert!(matches!(
        receive(&instance, WRONG_REPLY_KEY).unwrap_err(),
        Error::SentNotificationNotFound
    ));
    // No reply address at all.
    let raw = String::from_utf8(VALID_REPLY.to_vec()).unwrap().replace(
        &format!("reply+{REPLY_KEY}@appmail.adventuretime.ooo"),
        "jake@adventuretime.ooo",
    );
    assert!(matches!(
        receive(&instance, raw.as_bytes()).unwrap_err(),
        Error::SentNotificationNotFound
    ));
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_empty_messages() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    assert!(matches!(
        receive(&instance, b"").unwrap_err(),
        Error::EmptyEmail(_)
    ));
    assert!(matches!(
        receive(&instance, b"  \r\n\r\n ").unwrap_err(),
        Error::EmptyEmail(_)
    ));
    let err = receive(&instance, NO_CONTENT_REPLY).unwrap_err();
    assert!(matches!(err, Error::EmptyEmail(_)), "{err:?}");
    assert!(err.to_string().contains("quoted text is ignored"));
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_auto_reply_is_ignored() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    assert!(matches!(
        receive(&instance, AUTO_REPLY).unwrap_err(),
        Error::AutoGeneratedEmail
    ));
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_recipient_rejections() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    println!("Recipient that does not exist…");
    let gone_key = "0d3c1b2a9f8e7d6c5b4a39281706f5e4";
    instance.notify(
        gone_key,
        instance.user.pk() + 100,
        Noteable::Issue(instance.issue.clone().into_inner()),
    );
    assert!(matches!(
        receive(&instance, &with_reply_key(VALID_REPLY, gone_key)).unwrap_err(),
        Error::UserNotFound
    ));

    println!("Blocked recipient…");
    instance.db().block_user(instance.user.pk(), true).unwrap();
    assert!(matches!(
        receive(&instance, VALID_REPLY).unwrap_err(),
        Error::UserBlocked
    ));
    instance.db().block_user(instance.user.pk(), false).unwrap();
    receive(&instance, VALID_REPLY).unwrap();
}

#[test]
fn test_private_project_needs_membership() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Private);

    let err = receive(&instance, VALID_REPLY).unwrap_err();
    assert!(matches!(err, Error::UserNotAuthorized), "{err:?}");
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());

    instance
        .db()
        .add_project_member(instance.project.pk(), instance.user.pk())
        .unwrap();
    receive(&instance, VALID_REPLY).unwrap();

    println!("Administrators may comment anywhere…");
    let db = instance.db();
    let admin = db
        .create_user("bubblegum", "pb@candykingdom.ooo", true)
        .unwrap();
    let admin_key = "5b7e1c9d3a2f4e6b8c0d1e2f3a4b5c6d";
    instance.notify(
        admin_key,
        admin.pk(),
        Noteable::Issue(instance.issue.clone().into_inner()),
    );
    let note = receive(&instance, &with_reply_key(VALID_REPLY, admin_key)).unwrap();
    assert_eq!(note.author, admin.pk());
}

#[test]
fn test_missing_noteable() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let key = "9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b";
    instance.notify(
        key,
        instance.user.pk(),
        Noteable::Issue(Issue {
            pk: instance.issue.pk() + 100,
            project: instance.project.pk(),
            title: "Deleted".into(),
            discussion_locked: false,
        }),
    );
    assert!(matches!(
        receive(&instance, &with_reply_key(VALID_REPLY, key)).unwrap_err(),
        Error::NoteableNotFound
    ));
}

#[test]
fn test_missing_noteable_in_private_project() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Private);

    let key = "3f2e1d0c9b8a7f6e5d4c3b2a1f0e9d8c";
    instance.notify(
        key,
        instance.user.pk(),
        Noteable::Issue(Issue {
            pk: instance.issue.pk() + 100,
            project: instance.project.pk(),
            title: "Deleted".into(),
            discussion_locked: false,
        }),
    );
    let reply = with_reply_key(VALID_REPLY, key);

    // Outsiders learn nothing about what exists in the project.
    let err = receive(&instance, &reply).unwrap_err();
    assert!(matches!(err, Error::UserNotAuthorized), "{err:?}");

    instance
        .db()
        .add_project_member(instance.project.pk(), instance.user.pk())
        .unwrap();
    let err = receive(&instance, &reply).unwrap_err();
    assert!(matches!(err, Error::NoteableNotFound), "{err:?}");
}

#[test]
fn test_locked_discussion_is_invalid_note() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    instance
        .db()
        .lock_discussion(&instance.issue_ref(), true)
        .unwrap();
    match receive(&instance, VALID_REPLY).unwrap_err() {
        Error::InvalidNote(reasons) => {
            assert_eq!(reasons, vec!["Discussion is locked".to_string()]);
        }
        other => panic!("Unexpected error: {other:?}"),
    }
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_unresolved_inline_attachment() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let raw = String::from_utf8(VALID_REPLY.to_vec())
        .unwrap()
        .replace("- Jake out", "- Jake out\n\n[cid:missing@adventuretime.ooo]");
    match receive(&instance, raw.as_bytes()).unwrap_err() {
        Error::UnresolvedAttachment(placeholder) => {
            assert_eq!(placeholder, "cid:missing@adventuretime.ooo");
        }
        other => panic!("Unexpected error: {other:?}"),
    }
    assert!(instance.db().notes(&instance.issue_ref()).unwrap().is_empty());
}

#[test]
fn test_disabled_incoming_email() {
    init_stderr_logging();
    let mut instance = TestInstance::new(Visibility::Public);
    instance.config.incoming_email.enabled = false;

    assert!(matches!(
        receive(&instance, VALID_REPLY).unwrap_err(),
        Error::IncomingEmailDisabled
    ));
    assert!(matches!(
        receive(&instance, b"").unwrap_err(),
        Error::IncomingEmailDisabled
    ));
}

#[test]
fn test_check_does_not_write() {
    init_stderr_logging();
    let instance = TestInstance::new(Visibility::Public);

    let db = instance.db().untrusted();
    let uploader = Arc::new(FileUploader::from_configuration(&instance.config));
    let receiver =
        Receiver::from_configuration(&instance.config, Collaborators::from_connection(&db, uploader))
            .unwrap();
    let preview = receiver.check(ATTACHMENT_REPLY).unwrap();
    assert_eq!(preview.author, instance.user);
    assert_eq!(preview.noteable.noteable_ref(), instance.issue_ref());
    assert_eq!(
        preview.reply,
        "Found it, see below.\n\n[cid:sword@adventuretime.ooo]"
    );
    assert_eq!(preview.attachments, vec!["sword.png", "map.txt"]);

    assert!(db.notes(&instance.issue_ref()).unwrap().is_empty());
    assert!(!instance.config.uploads_directory().exists());
}
