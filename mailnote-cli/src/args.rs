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

pub use std::path::PathBuf;

pub use clap::{Args, CommandFactory, Parser, Subcommand};
use mailnote::models::NoteableRef;

#[derive(Debug, Parser)]
#[command(
    name = "mnote",
    about = "turn e-mail replies into discussion notes",
    long_about = "Tool for mailnote reply-by-email processing.",
    before_long_help = "GNU Affero version 3 or later <https://www.gnu.org/licenses/>",
    author,
    version
)]
pub struct Opt {
    /// Print logs.
    #[arg(short, long)]
    pub debug: bool,
    /// Configuration file to use.
    #[arg(short, long, value_parser)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Command,
    /// Silence all output.
    #[arg(short, long)]
    pub quiet: bool,
    /// Verbose mode (-v, -vv, -vvv, etc).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Debug log timestamp (sec, ms, ns, none).
    #[arg(short, long)]
    pub ts: Option<stderrlog::Timestamp>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Prints a sample config file to STDOUT.
    ///
    /// You can generate a new configuration file by writing the output to a
    /// file, e.g: mnote sample-config > config.toml
    SampleConfig,
    /// Turn the reply read from STDIN into a note.
    ///
    /// Meant to be the target of a mail server's pipe-to-program delivery. If
    /// the reply is rejected the reason is printed and the exit status is
    /// non-zero. Messages that cannot be parsed are saved in the data
    /// directory.
    Receive {
        /// Check the reply and show the note it would create without
        /// uploading or storing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the notes of a discussion target.
    Notes {
        #[command(subcommand)]
        noteable: NoteableArg,
    },
    /// Print the sent notification with this reply key.
    SentNotification {
        /// Reply key, e.g. the `59d8df8370b7e95c5a49fbf86aeb2c93` in
        /// `reply+59d8df8370b7e95c5a49fbf86aeb2c93@example.com`.
        reply_key: String,
    },
}

/// A discussion target.
#[derive(Debug, Clone, Subcommand)]
pub enum NoteableArg {
    /// An issue.
    Issue {
        /// Issue primary key.
        pk: i64,
    },
    /// A merge request.
    MergeRequest {
        /// Merge request primary key.
        pk: i64,
    },
    /// A commit.
    Commit {
        /// Commit SHA.
        sha: String,
        /// Primary key of the project the commit belongs to.
        #[arg(long)]
        project: i64,
    },
}

impl From<NoteableArg> for NoteableRef {
    fn from(val: NoteableArg) -> Self {
        match val {
            NoteableArg::Issue { pk } => Self::Issue { pk },
            NoteableArg::MergeRequest { pk } => Self::MergeRequest { pk },
            NoteableArg::Commit { sha, project } => Self::Commit { project, sha },
        }
    }
}
