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

//! Implementations of CLI subcommands

use std::{io::Read, sync::Arc};

use mailnote::{
    models::NoteableRef, uploads::FileUploader, Collaborators, Connection, Context, Error,
    ParsedMessage, Receiver, Result,
};

pub fn receive(db: &Connection, dry_run: bool, quiet: bool, debug: bool) -> Result<()> {
    if debug {
        println!("Receive dry_run = {:?}", dry_run);
    }

    if !db.conf().incoming_email.enabled {
        return Err(Error::IncomingEmailDisabled);
    }

    let mut input = vec![];
    std::io::stdin()
        .read_to_end(&mut input)
        .context("Could not read from stdin")?;
    if input.iter().all(u8::is_ascii_whitespace) {
        eprintln!("Empty input, abort.");
        return Err(Error::EmptyEmail("the message is blank"));
    }
    if let Err(err) = ParsedMessage::parse(&input) {
        eprintln!("Could not parse message: {}", err);
        let p = db.conf().save_message(&input)?;
        eprintln!("Message saved at {}", p.display());
        return Err(err);
    }

    let uploader = Arc::new(FileUploader::from_configuration(db.conf()));
    let receiver =
        Receiver::from_configuration(db.conf(), Collaborators::from_connection(db, uploader))?;
    if dry_run {
        let preview = receiver.check(&input)?;
        if debug {
            eprintln!("Preview is:\n{:#?}", &preview);
        }
        if !quiet {
            println!("Author: {}", preview.author);
            println!(
                "Target: {} ({})",
                preview.noteable.noteable_ref(),
                preview.noteable.title()
            );
            for attachment in &preview.attachments {
                println!("Attachment: {}", attachment);
            }
            println!("\n{}", preview.reply);
        }
        return Ok(());
    }

    let note = receiver.execute(&input)?;
    if !quiet {
        println!("Created note {}", note);
    }
    Ok(())
}

pub fn notes(db: &Connection, noteable: NoteableRef, quiet: bool) -> Result<()> {
    let notes = db.notes(&noteable)?;
    if quiet {
        return Ok(());
    }
    if notes.is_empty() {
        println!("No notes found on {}.", noteable);
        return Ok(());
    }
    for note in notes {
        println!("- {} at {}", note, note.created);
        for line in note.body.lines() {
            println!("  {}", line);
        }
        for file in db.note_attachments(note.pk())? {
            println!("  attachment: {} {}", file.label, file.url);
        }
    }
    Ok(())
}

pub fn sent_notification(db: &Connection, reply_key: &str, quiet: bool) -> Result<()> {
    let Some(notification) = db.sent_notification(reply_key)? else {
        return Err(Error::NotFound("sent notification"));
    };
    if quiet {
        return Ok(());
    }
    println!("{}", notification);
    println!("Sent: {}", notification.created);
    match db.user_by_pk(notification.recipient)? {
        Some(user) => println!("Recipient: {}", user),
        None => println!("Recipient: user #{} (deleted)", notification.recipient),
    }
    match db.noteable_by_ref(&notification.noteable)? {
        Some(noteable) => println!("Target: {}", noteable.title()),
        None => println!("Target: {} (deleted)", notification.noteable),
    }
    Ok(())
}
