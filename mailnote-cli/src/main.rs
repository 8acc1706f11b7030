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

#![allow(clippy::result_large_err)]

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use mailnote::{Configuration, Connection, Context, IncomingEmailSettings, Result};
use mailnote_cli::{args::*, commands::*};

fn run_app(
    config: Option<PathBuf>,
    cmd: Command,
    debug: bool,
    quiet: bool,
) -> Result<()> {
    if let Command::SampleConfig = cmd {
        let mut new = Configuration::new("/path/to/sqlite.db");
        new.incoming_email = IncomingEmailSettings::new("reply+%{key}@example.com");
        println!("{}", new.to_toml());
        return Ok(());
    };
    let config_path = if let Some(path) = config.as_deref() {
        path
    } else {
        let mut opt = Opt::command();
        opt.error(
            clap::error::ErrorKind::MissingRequiredArgument,
            "--config is required for mail operations",
        )
        .exit();
    };

    let config = Configuration::from_file(config_path).with_context(|| {
        format!(
            "Could not read configuration file from path: {}",
            config_path.display()
        )
    })?;

    use Command::*;
    // Nothing here needs more than reading and creating notes.
    let db = Connection::open_or_create_db(config)
        .context("Could not open database connection with this configuration")?
        .untrusted();
    match cmd {
        SampleConfig => {}
        Receive { dry_run } => {
            receive(&db, dry_run, quiet, debug).context("Could not process incoming reply.")?;
        }
        Notes { noteable } => {
            let noteable = mailnote::models::NoteableRef::from(noteable);
            notes(&db, noteable.clone(), quiet)
                .with_context(|| format!("Could not retrieve notes of {noteable}."))?;
        }
        SentNotification { reply_key } => {
            sent_notification(&db, &reply_key, quiet).with_context(|| {
                format!("Could not retrieve sent notification with reply key {reply_key}.")
            })?;
        }
    }

    Ok(())
}

fn main() -> std::result::Result<(), i32> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("mailnote")
        .quiet(opt.quiet)
        .verbosity(opt.verbose as usize)
        .timestamp(opt.ts.unwrap_or(stderrlog::Timestamp::Off))
        .init()
        .unwrap();
    if opt.debug {
        println!("DEBUG: {:?}", &opt);
    }
    let Opt {
        config,
        cmd,
        debug,
        quiet,
        ..
    } = opt;
    if let Err(err) = run_app(config, cmd, debug, quiet) {
        print!("{}", err.display_chain());
        std::process::exit(-1);
    }
    Ok(())
}
