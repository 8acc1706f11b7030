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

//! Parsing raw incoming messages into a [`ParsedMessage`].
//!
//! MIME structure, transfer encodings and charsets are handled by
//! [`mailparse`]; recipient addresses are parsed with [`melib::Address`].

use log::{trace, warn};
use mailparse::{body::Body, DispositionType, MailHeaderMap, ParsedMail};

use crate::errors::*;

/// Headers recipient addresses are collected from, in order.
pub const RECIPIENT_HEADERS: &[&str] = &[
    "To",
    "Cc",
    "Delivered-To",
    "Envelope-To",
    "X-Envelope-To",
    "X-Original-To",
];

/// How a body part is meant to be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Displayed as part of the message body.
    Inline,
    /// A file attached to the message.
    Attachment,
}

/// A leaf MIME part of a message.
#[derive(Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Lowercase MIME type, e.g. `text/plain`.
    pub mime_type: String,
    /// Decoded content (transfer encoding removed).
    pub content: Vec<u8>,
    /// Charset decoded text, for `text/*` parts.
    pub text: Option<String>,
    /// `Content-Disposition` of the part.
    pub disposition: Disposition,
    /// File name from `Content-Disposition` or `Content-Type` parameters.
    pub filename: Option<String>,
    /// `Content-ID` without the surrounding carets.
    pub content_id: Option<String>,
}

impl std::fmt::Debug for BodyPart {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("BodyPart")
            .field("mime_type", &self.mime_type)
            .field("content", &format_args!("{} bytes", self.content.len()))
            .field("disposition", &self.disposition)
            .field("filename", &self.filename)
            .field("content_id", &self.content_id)
            .finish()
    }
}

impl BodyPart {
    /// Whether this part is a candidate for the reply text.
    pub fn is_text_body(&self, mime_type: &str) -> bool {
        self.mime_type == mime_type
            && self.disposition == Disposition::Inline
            && self.filename.is_none()
            && self.text.is_some()
    }

    /// Whether this part is an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A parsed incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    headers: Vec<(String, String)>,
    /// Leaf parts in depth-first order.
    pub parts: Vec<BodyPart>,
    /// Recipient e-mail addresses, deduplicated, in header order.
    pub recipients: Vec<String>,
}

impl ParsedMessage {
    /// Parse raw message bytes.
    ///
    /// Fails with [`Error::EmptyEmail`] when there is nothing to parse.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::EmptyEmail("the message is blank"));
        }
        let mail = match mailparse::parse_mail(raw) {
            Ok(mail) => mail,
            Err(err) => {
                trace!("Could not parse message: {err}");
                return Err(Error::EmptyEmail("the message could not be parsed"));
            }
        };
        if mail.headers.is_empty() {
            return Err(Error::EmptyEmail("the message has no header fields"));
        }

        let headers = mail
            .headers
            .iter()
            .map(|h| (h.get_key(), h.get_value()))
            .collect::<Vec<(String, String)>>();

        let mut recipients: Vec<String> = vec![];
        for name in RECIPIENT_HEADERS {
            for value in mail.headers.get_all_values(name) {
                let addresses = match melib::Address::list_try_from(value.as_str()) {
                    Ok(addresses) => addresses,
                    Err(err) => {
                        trace!("Could not parse {name} value {value:?}: {err}");
                        continue;
                    }
                };
                for address in addresses {
                    let email = address.get_email();
                    if !recipients.iter().any(|r| r.eq_ignore_ascii_case(&email)) {
                        recipients.push(email);
                    }
                }
            }
        }

        let mut parts = vec![];
        flatten_parts(&mail, &mut parts);
        trace!(
            "Parsed message with {} headers, recipients {:?}, parts {:#?}",
            headers.len(),
            recipients,
            parts
        );

        Ok(Self {
            headers,
            parts,
            recipients,
        })
    }

    /// First value of header `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of header `name`, case-insensitively.
    pub fn header_values<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All header fields in message order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Whether the message is flagged as an automatic response (RFC 3834
    /// `Auto-Submitted` and the common non-standard markers).
    pub fn is_auto_generated(&self) -> bool {
        if self
            .header_values("Auto-Submitted")
            .any(|v| !v.trim().eq_ignore_ascii_case("no"))
        {
            return true;
        }
        if ["X-Autoreply", "X-Autorespond", "X-Autogenerated"]
            .iter()
            .any(|h| self.header(h).is_some())
        {
            return true;
        }
        if self
            .header_values("Precedence")
            .any(|v| v.trim().eq_ignore_ascii_case("auto_reply"))
        {
            return true;
        }
        // Subject is free text typed by people.
        self.headers.iter().any(|(k, v)| {
            if k.eq_ignore_ascii_case("Subject") {
                return false;
            }
            let v = v.to_ascii_lowercase();
            v.contains("auto-generated") || v.contains("auto-replied")
        })
    }
}

/// Collect leaf parts depth-first. A part whose transfer encoding cannot be
/// decoded is kept with its undecoded content instead of failing the message.
fn flatten_parts(mail: &ParsedMail<'_>, parts: &mut Vec<BodyPart>) {
    let mime_type = mail.ctype.mimetype.to_ascii_lowercase();
    if mime_type.starts_with("multipart/") {
        for sub in &mail.subparts {
            flatten_parts(sub, parts);
        }
        return;
    }

    let disposition = mail.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| mail.ctype.params.get("name"))
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    let disposition = match disposition.disposition {
        DispositionType::Attachment => Disposition::Attachment,
        _ if mime_type == "message/rfc822" => Disposition::Attachment,
        _ => Disposition::Inline,
    };
    let content_id = mail
        .headers
        .get_first_value("Content-ID")
        .map(|cid| cid.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|cid| !cid.is_empty());
    let content = match mail.get_body_raw() {
        Ok(content) => content,
        Err(err) => {
            warn!("Could not decode {mime_type} part, keeping it undecoded: {err}");
            undecoded_body(mail)
        }
    };
    let text = if mime_type.starts_with("text/") {
        Some(mail.get_body().unwrap_or_else(|err| {
            warn!("Could not decode {mime_type} text: {err}");
            String::from_utf8_lossy(&content).into_owned()
        }))
    } else {
        None
    };
    parts.push(BodyPart {
        content,
        mime_type,
        text,
        disposition,
        filename,
        content_id,
    });
}

fn undecoded_body(mail: &ParsedMail<'_>) -> Vec<u8> {
    match mail.get_body_encoded() {
        Body::Base64(body) | Body::QuotedPrintable(body) => body.get_raw().to_vec(),
        Body::SevenBit(body) | Body::EightBit(body) => body.get_raw().to_vec(),
        Body::Binary(body) => body.get_raw().to_vec(),
    }
}
