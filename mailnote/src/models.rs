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

//! Database models: [`User`], [`Project`], [`SentNotification`],
//! [`Noteable`] and [`Note`].

use super::*;

/// A database entry and its primary key. Derefs to its inner type.
///
/// # Example
///
/// ```rust,no_run
/// # use mailnote::{*, models::*};
/// # fn foo(db: &Connection) {
/// let val: Option<DbVal<User>> = db.user_by_pk(5).unwrap();
/// if let Some(user) = val {
///     assert_eq!(user.pk(), 5);
/// }
/// # }
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DbVal<T: Send + Sync>(pub T, #[serde(skip)] pub i64);

impl<T: Send + Sync> DbVal<T> {
    /// Primary key.
    #[inline(always)]
    pub fn pk(&self) -> i64 {
        self.1
    }

    /// Unwrap inner value.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for DbVal<T>
where
    T: Send + Sync,
{
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for DbVal<T>
where
    T: Send + Sync,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> std::fmt::Display for DbVal<T>
where
    T: std::fmt::Display + Send + Sync,
{
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A user account.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct User {
    /// Database primary key.
    pub pk: i64,
    /// Unique user name.
    pub username: String,
    /// Primary e-mail address.
    pub email: String,
    /// Whether the account has been blocked by an administrator.
    pub blocked: bool,
    /// Whether the user is an instance administrator.
    pub admin: bool,
}

impl User {
    /// Whether the account has been blocked by an administrator.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "[#{}] @{} <{}>", self.pk, self.username, self.email)
    }
}

/// Who can see a [`Project`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Anyone.
    Public,
    /// Any signed in user.
    Internal,
    /// Project members only.
    Private,
}

impl Visibility {
    /// Value stored in the `visibility` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "public" => Self::Public,
            "internal" => Self::Internal,
            "private" => Self::Private,
            other => return Err(format!("Invalid project visibility {other:?}.").into()),
        })
    }
}

/// A project owning issues, merge requests and commits.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Project {
    /// Database primary key.
    pub pk: i64,
    /// Path, e.g. `group/project`.
    pub path: String,
    /// Visibility level.
    pub visibility: Visibility,
}

impl std::fmt::Display for Project {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "[#{}] {} ({})", self.pk, self.path, self.visibility.as_str())
    }
}

/// Kind of a discussion target.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
pub enum NoteableKind {
    /// An issue.
    Issue,
    /// A merge request.
    MergeRequest,
    /// A commit.
    Commit,
}

impl NoteableKind {
    /// Value stored in `noteable_type` columns.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "Issue",
            Self::MergeRequest => "MergeRequest",
            Self::Commit => "Commit",
        }
    }
}

impl std::str::FromStr for NoteableKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "Issue" => Self::Issue,
            "MergeRequest" => Self::MergeRequest,
            "Commit" => Self::Commit,
            other => return Err(format!("Invalid noteable type {other:?}.").into()),
        })
    }
}

/// Identity of a discussion target, as recorded in a [`SentNotification`].
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum NoteableRef {
    /// Issue primary key.
    Issue {
        /// Primary key.
        pk: i64,
    },
    /// Merge request primary key.
    MergeRequest {
        /// Primary key.
        pk: i64,
    },
    /// Commit SHA in a project.
    Commit {
        /// Project primary key.
        project: i64,
        /// Commit SHA.
        sha: String,
    },
}

impl NoteableRef {
    /// The kind of the target.
    pub const fn kind(&self) -> NoteableKind {
        match self {
            Self::Issue { .. } => NoteableKind::Issue,
            Self::MergeRequest { .. } => NoteableKind::MergeRequest,
            Self::Commit { .. } => NoteableKind::Commit,
        }
    }

    /// `(noteable_type, noteable_id, commit_id)` column values.
    pub(crate) fn columns(&self) -> (&'static str, Option<i64>, Option<&str>) {
        match self {
            Self::Issue { pk } | Self::MergeRequest { pk } => (self.kind().as_str(), Some(*pk), None),
            Self::Commit { sha, .. } => (self.kind().as_str(), None, Some(sha.as_str())),
        }
    }

    /// Build from `(noteable_type, noteable_id, commit_id)` column values.
    pub(crate) fn from_columns(
        kind: &str,
        project: i64,
        id: Option<i64>,
        sha: Option<String>,
    ) -> Result<Self> {
        let kind: NoteableKind = kind.parse()?;
        Ok(match (kind, id, sha) {
            (NoteableKind::Issue, Some(pk), _) => Self::Issue { pk },
            (NoteableKind::MergeRequest, Some(pk), _) => Self::MergeRequest { pk },
            (NoteableKind::Commit, _, Some(sha)) => Self::Commit { project, sha },
            (kind, id, sha) => {
                return Err(Error::Bug(format!(
                    "Inconsistent noteable columns: {kind:?} id {id:?} sha {sha:?}"
                )))
            }
        })
    }
}

impl std::fmt::Display for NoteableRef {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Issue { pk } => write!(fmt, "issue #{pk}"),
            Self::MergeRequest { pk } => write!(fmt, "merge request !{pk}"),
            Self::Commit { project, sha } => write!(fmt, "commit {sha} of project #{project}"),
        }
    }
}

/// An issue.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Issue {
    /// Database primary key.
    pub pk: i64,
    /// Owning project.
    pub project: i64,
    /// Title.
    pub title: String,
    /// Whether new notes are refused.
    pub discussion_locked: bool,
}

/// A merge request.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MergeRequest {
    /// Database primary key.
    pub pk: i64,
    /// Owning project.
    pub project: i64,
    /// Title.
    pub title: String,
    /// Source branch name.
    pub source_branch: String,
    /// Target branch name.
    pub target_branch: String,
    /// Whether new notes are refused.
    pub discussion_locked: bool,
}

/// A commit.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Commit {
    /// Owning project.
    pub project: i64,
    /// Commit SHA.
    pub sha: String,
    /// Commit message title.
    pub title: String,
}

/// A discussion target: something notes can be attached to.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub enum Noteable {
    /// An issue.
    Issue(Issue),
    /// A merge request.
    MergeRequest(MergeRequest),
    /// A commit.
    Commit(Commit),
}

impl Noteable {
    /// Identity of this target.
    pub fn noteable_ref(&self) -> NoteableRef {
        match self {
            Self::Issue(Issue { pk, .. }) => NoteableRef::Issue { pk: *pk },
            Self::MergeRequest(MergeRequest { pk, .. }) => NoteableRef::MergeRequest { pk: *pk },
            Self::Commit(Commit { project, sha, .. }) => NoteableRef::Commit {
                project: *project,
                sha: sha.clone(),
            },
        }
    }

    /// The project this target belongs to.
    pub fn project(&self) -> i64 {
        match self {
            Self::Issue(Issue { project, .. })
            | Self::MergeRequest(MergeRequest { project, .. })
            | Self::Commit(Commit { project, .. }) => *project,
        }
    }

    /// Whether the target refuses new notes.
    pub fn discussion_locked(&self) -> bool {
        match self {
            Self::Issue(Issue {
                discussion_locked, ..
            })
            | Self::MergeRequest(MergeRequest {
                discussion_locked, ..
            }) => *discussion_locked,
            Self::Commit(_) => false,
        }
    }

    /// Title of the target.
    pub fn title(&self) -> &str {
        match self {
            Self::Issue(Issue { title, .. })
            | Self::MergeRequest(MergeRequest { title, .. })
            | Self::Commit(Commit { title, .. }) => title,
        }
    }
}

/// Record of a notification e-mail that was sent to a user, correlating
/// replies to it with a discussion target.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SentNotification {
    /// Database primary key.
    pub pk: i64,
    /// Reply key embedded in the reply address of the notification.
    pub reply_key: String,
    /// User the notification was sent to.
    pub recipient: i64,
    /// Project the target belongs to.
    pub project: i64,
    /// The discussion target.
    pub noteable: NoteableRef,
    /// When the notification was sent.
    pub created: DateTime,
}

impl std::fmt::Display for SentNotification {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "[#{}] {} to user #{} about {}",
            self.pk, self.reply_key, self.recipient, self.noteable
        )
    }
}

/// A file uploaded from an e-mail attachment.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct UploadedFile {
    /// Where the file can be fetched from.
    pub url: String,
    /// Whether the file is an image and can be embedded.
    pub is_image: bool,
    /// Display label: the file name.
    pub label: String,
}

impl UploadedFile {
    /// Markdown reference to the file: embedded for images, a link otherwise.
    pub fn markdown(&self) -> String {
        let label = self.label.replace(['[', ']'], "");
        if self.is_image {
            format!("![{}]({})", label, self.url)
        } else {
            format!("[{}]({})", label, self.url)
        }
    }
}

/// A note to be created.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NewNote {
    /// Author user primary key.
    pub author: i64,
    /// Markdown body.
    pub body: String,
    /// The discussion target.
    pub noteable: Noteable,
    /// Files referenced by the body.
    pub attachments: Vec<UploadedFile>,
}

/// A note on a discussion target.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Note {
    /// Database primary key.
    pub pk: i64,
    /// Author user primary key.
    pub author: i64,
    /// Markdown body.
    pub body: String,
    /// The discussion target.
    pub noteable: NoteableRef,
    /// Project of the target.
    pub project: i64,
    /// Creation time.
    pub created: DateTime,
}

impl std::fmt::Display for Note {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "[#{}] note by user #{} on {}",
            self.pk, self.author, self.noteable
        )
    }
}
