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

#![allow(clippy::new_without_default)]

use std::{path::PathBuf, sync::Once};

pub use assert_cmd;
pub use log::{trace, warn};
pub use mailnote::{
    models::*, Configuration, Connection, IncomingEmailSettings, ReplyKey,
};
pub use predicates;
pub use tempfile::{self, TempDir};

static INIT_STDERR_LOGGING: Once = Once::new();

pub fn init_stderr_logging() {
    INIT_STDERR_LOGGING.call_once(|| {
        stderrlog::new()
            .quiet(false)
            .verbosity(15)
            .show_module_names(true)
            .timestamp(stderrlog::Timestamp::Millisecond)
            .init()
            .unwrap();
    });
}

/// Reply key of the notification seeded by [`TestInstance::new`].
pub const REPLY_KEY: &str = "59d8df8370b7e95c5a49fbf86aeb2c93";
/// Reply address template used by [`TestInstance`].
pub const REPLY_ADDRESS_TEMPLATE: &str = "reply+%{key}@appmail.adventuretime.ooo";

/// A temporary database seeded with one user, one project with an issue, a
/// merge request and a commit, and a notification about the issue sent to
/// the user with reply key [`REPLY_KEY`].
pub struct TestInstance {
    pub tmp_dir: TempDir,
    pub config: Configuration,
    pub user: DbVal<User>,
    pub project: DbVal<Project>,
    pub issue: DbVal<Issue>,
    pub merge_request: DbVal<MergeRequest>,
    pub commit: DbVal<Commit>,
    pub sent_notification: DbVal<SentNotification>,
}

impl TestInstance {
    pub fn new(visibility: Visibility) -> Self {
        let tmp_dir = TempDir::new().unwrap();
        let mut config = Configuration::new(tmp_dir.path().join("mnote.db"));
        config.incoming_email = IncomingEmailSettings::new(REPLY_ADDRESS_TEMPLATE);
        config.upload_timeout = 10;

        let db = Connection::open_or_create_db(config.clone())
            .unwrap()
            .trusted();
        let user = db
            .create_user("jake", "jake@adventuretime.ooo", false)
            .unwrap();
        let project = db.create_project("ooo/tree-fort", visibility).unwrap();
        let issue = db
            .create_issue(project.pk(), "The sword is missing")
            .unwrap();
        let merge_request = db
            .create_merge_request(project.pk(), "Find the sword", "find-sword", "main")
            .unwrap();
        let commit = db
            .create_commit(
                project.pk(),
                "3f1b0c6e2d9a4b5c8e7f6a5b4c3d2e1f0a9b8c7d",
                "Add sword",
            )
            .unwrap();
        let sent_notification = db
            .record_sent_notification(
                &ReplyKey::new(REPLY_KEY).unwrap(),
                user.pk(),
                &Noteable::Issue(issue.clone().into_inner()),
            )
            .unwrap();
        drop(db);

        std::fs::write(tmp_dir.path().join("conf.toml"), config.to_toml()).unwrap();

        Self {
            tmp_dir,
            config,
            user,
            project,
            issue,
            merge_request,
            commit,
            sent_notification,
        }
    }

    /// A trusted connection to the database.
    pub fn db(&self) -> Connection {
        Connection::open_db(self.config.clone()).unwrap().trusted()
    }

    /// Path of the configuration file written for the instance.
    pub fn config_path(&self) -> PathBuf {
        self.tmp_dir.path().join("conf.toml")
    }

    pub fn issue_ref(&self) -> NoteableRef {
        NoteableRef::Issue {
            pk: self.issue.pk(),
        }
    }

    /// Record another notification with reply key `key` about `noteable`.
    pub fn notify(&self, key: &str, recipient: i64, noteable: Noteable) -> DbVal<SentNotification> {
        self.db()
            .record_sent_notification(&ReplyKey::new(key).unwrap(), recipient, &noteable)
            .unwrap()
    }
}
