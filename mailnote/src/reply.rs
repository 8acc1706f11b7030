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

//! Extracting the text a person actually wrote from a reply: quoted history,
//! signatures and client boilerplate are dropped.

use log::trace;

use crate::mail::ParsedMessage;

const HTML_WIDTH: usize = 10_000;

/// Extract the reply text of `message`.
///
/// The first inline `text/plain` part is used; otherwise the first inline
/// `text/html` part, converted to text. A message without either yields an
/// empty string.
pub fn extract(message: &ParsedMessage) -> String {
    let text = if let Some(text) = message
        .parts
        .iter()
        .find(|p| p.is_text_body("text/plain"))
        .and_then(|p| p.text.as_deref())
    {
        text.to_string()
    } else if let Some(html) = message
        .parts
        .iter()
        .find(|p| p.is_text_body("text/html"))
        .and_then(|p| p.text.as_deref())
    {
        html_to_text(html)
    } else {
        trace!("Message has no text body");
        String::new()
    };
    trim_reply(&text)
}

/// Convert an HTML body to plain text. Block quotes become `> ` prefixed
/// lines.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), HTML_WIDTH)
        .unwrap_or_else(|_| html.to_string())
        .replace('\u{00a0}', " ")
}

/// Cut `text` at the first quoted-reply header or signature, and remove the
/// trailing quoted block.
pub fn trim_reply(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines = text.lines().collect::<Vec<&str>>();
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let next = lines[idx + 1..]
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty());
        let has_content = kept.iter().any(|l| !l.trim().is_empty());
        if is_reply_header(trimmed)
            || is_wrapped_reply_header(trimmed, lines.get(idx + 1).map(|l| l.trim()))
            || is_separator(trimmed)
            || is_signature_delimiter(line)
            || (has_content && is_header_block(trimmed, next))
        {
            trace!("Reply cut at line {idx}: {trimmed:?}");
            break;
        }
        kept.push(line);
    }

    while let Some(last) = kept.last().map(|l| l.trim()) {
        if last.is_empty() || last.starts_with('>') || is_mobile_signature(last) {
            kept.pop();
        } else {
            break;
        }
    }

    kept.iter()
        .map(|l| l.trim_end())
        .collect::<Vec<&str>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_reply_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    (lower.starts_with("on ") && lower.ends_with("wrote:"))
        || (lower.starts_with("am ") && lower.ends_with("schrieb:"))
        || (lower.starts_with("le ") && lower.trim_end_matches(':').trim_end().ends_with("a écrit"))
}

fn is_wrapped_reply_header(line: &str, next: Option<&str>) -> bool {
    let Some(next) = next else {
        return false;
    };
    // Wrapped attributions carry a date or an address; prose rarely does.
    let attribution = |c: char| c.is_ascii_digit() || c == '@' || c == '<';
    line.to_lowercase().starts_with("on ")
        && next.to_lowercase().ends_with("wrote:")
        && (line.contains(attribution) || next.contains(attribution))
}

fn is_separator(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("-----original message-----")
        || lower.contains("-----forwarded message-----")
        || lower.contains("---------- forwarded message ----------")
        || (line.len() >= 20 && line.chars().all(|c| c == '_'))
}

fn is_signature_delimiter(line: &str) -> bool {
    line == "-- " || line.trim_end() == "--"
}

fn is_header_block(line: &str, next: Option<&str>) -> bool {
    let lower = line.to_lowercase();
    if !lower.starts_with("from:") {
        return false;
    }
    let Some(next) = next.map(str::to_lowercase) else {
        return false;
    };
    ["sent:", "date:", "to:", "subject:", "cc:"]
        .iter()
        .any(|h| next.starts_with(h))
}

fn is_mobile_signature(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("sent from my ") || lower.starts_with("get outlook for ")
}
