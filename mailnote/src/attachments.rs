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

//! Uploading message attachments and linking them from the note body.
//!
//! Uploads of one message run concurrently, one thread per file, and are
//! joined before the body is finalized:
//!
//! ```text
//! parts ──┬─ upload #1 ─┐
//!         ├─ upload #2 ─┼─ join (bounded by timeout) ─ link_attachments()
//!         └─ upload #3 ─┘
//! ```
//!
//! The resulting order is always the order of the parts in the message.

use std::{
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use log::{trace, warn};

use crate::{
    errors::*,
    mail::{BodyPart, ParsedMessage},
    models::UploadedFile,
};

/// Storage for uploaded files.
pub trait AttachmentUploader: Send + Sync {
    /// Store `content` and return where it can be found.
    fn upload(&self, content: &[u8], filename: &str, mime_type: &str) -> Result<UploadedFile>;
}

/// An uploaded attachment and the `Content-ID` of the part it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The upload result.
    pub file: UploadedFile,
    /// `Content-ID` of the source part, if any.
    pub content_id: Option<String>,
}

/// The parts of `message` that are files rather than the reply text.
pub fn attachment_parts(message: &ParsedMessage) -> Vec<&BodyPart> {
    message
        .parts
        .iter()
        .filter(|p| !p.is_text_body("text/plain") && !p.is_text_body("text/html"))
        .collect()
}

/// Uploads attachment parts through an [`AttachmentUploader`].
#[derive(Clone)]
pub struct AttachmentProcessor {
    uploader: Arc<dyn AttachmentUploader>,
    timeout: Duration,
}

impl std::fmt::Debug for AttachmentProcessor {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("AttachmentProcessor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AttachmentProcessor {
    /// Create a processor waiting at most `timeout` for all uploads of a
    /// message.
    pub fn new(uploader: Arc<dyn AttachmentUploader>, timeout: Duration) -> Self {
        Self { uploader, timeout }
    }

    /// Upload every part and return the attachments in part order.
    ///
    /// The first failed upload is returned as is. If the uploads do not all
    /// finish within the timeout, [`Error::UploadTimeout`] is returned; uploads
    /// still running are abandoned.
    pub fn process(&self, parts: &[&BodyPart]) -> Result<Vec<Attachment>> {
        if parts.is_empty() {
            return Ok(vec![]);
        }
        let (tx, rx) = mpsc::channel::<(usize, Result<UploadedFile>)>();
        for (idx, part) in parts.iter().enumerate() {
            let tx = tx.clone();
            let uploader = Arc::clone(&self.uploader);
            let filename = attachment_filename(part, idx);
            let mime_type = part.mime_type.clone();
            let content = part.content.clone();
            trace!("Uploading part #{idx} {filename:?} ({mime_type})");
            std::thread::Builder::new()
                .name(format!("upload-{idx}"))
                .spawn(move || {
                    let result = uploader.upload(&content, &filename, &mime_type);
                    // The receiver is gone if the join timed out.
                    _ = tx.send((idx, result));
                })
                .context("Could not spawn upload thread.")?;
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut slots: Vec<Option<UploadedFile>> = vec![None; parts.len()];
        for _ in 0..parts.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((idx, result)) => slots[idx] = Some(result?),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(
                        "Attachment uploads did not finish within {} seconds.",
                        self.timeout.as_secs()
                    );
                    return Err(Error::UploadTimeout(self.timeout));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::Bug(
                        "upload thread exited without reporting a result".to_string(),
                    ));
                }
            }
        }

        slots
            .into_iter()
            .zip(parts)
            .map(|(file, part)| {
                Ok(Attachment {
                    file: file.ok_or_else(|| Error::Bug("missing upload result".to_string()))?,
                    content_id: part.content_id.clone(),
                })
            })
            .collect()
    }
}

/// File name of part `idx`, inventing one from the MIME type if the message
/// does not name it.
pub fn attachment_filename(part: &BodyPart, idx: usize) -> String {
    if let Some(filename) = part.filename.as_deref() {
        return filename.to_string();
    }
    let ext = mime_guess::get_mime_extensions_str(&part.mime_type)
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("attachment-{}.{ext}", idx + 1)
}

/// Replace inline attachment placeholders in `body` with Markdown references
/// and append the attachments that were not referenced.
///
/// Placeholders are `[cid:CONTENT-ID]`, a bare `cid:CONTENT-ID` and
/// `[attachment:N]` (1-based). A placeholder without a matching attachment is
/// an [`Error::UnresolvedAttachment`].
pub fn link_attachments(body: &str, attachments: &[Attachment]) -> Result<String> {
    let mut ret = String::with_capacity(body.len());
    let mut used = vec![false; attachments.len()];
    let mut rest = body;
    loop {
        let bracket = rest.find('[');
        let bare = find_bare_cid(rest);
        let start = match (bracket, bare) {
            (None, None) => break,
            (Some(b), Some(c)) => b.min(c),
            (Some(i), None) | (None, Some(i)) => i,
        };
        ret.push_str(&rest[..start]);
        let candidate = &rest[start..];

        if bare == Some(start) {
            let id_len = candidate[4..]
                .find(|c: char| c.is_whitespace() || ")>]\"'".contains(c))
                .unwrap_or(candidate.len() - 4);
            let token = &candidate[..4 + id_len];
            if id_len == 0 {
                ret.push_str(token);
            } else {
                let idx = placeholder_target(token, attachments)
                    .and_then(std::result::Result::ok)
                    .ok_or_else(|| Error::UnresolvedAttachment(token.to_string()))?;
                trace!("Placeholder {token} resolved to attachment #{idx}");
                ret.push_str(&attachments[idx].file.markdown());
                used[idx] = true;
            }
            rest = &candidate[token.len()..];
            continue;
        }

        let Some(end) = candidate.find(']') else {
            ret.push_str(candidate);
            rest = "";
            break;
        };
        let inner = &candidate[1..end];
        match placeholder_target(inner, attachments) {
            Some(Ok(idx)) => {
                trace!("Placeholder [{inner}] resolved to attachment #{idx}");
                ret.push_str(&attachments[idx].file.markdown());
                used[idx] = true;
                rest = &candidate[end + 1..];
            }
            Some(Err(())) => return Err(Error::UnresolvedAttachment(inner.to_string())),
            None => {
                ret.push('[');
                rest = &candidate[1..];
            }
        }
    }
    ret.push_str(rest);

    for (attachment, _) in attachments.iter().zip(used).filter(|(_, used)| !used) {
        if !ret.is_empty() {
            ret.push_str("\n\n");
        }
        ret.push_str(&attachment.file.markdown());
    }
    Ok(ret)
}

/// Offset of the first `cid:` that starts a word and is not inside brackets.
fn find_bare_cid(text: &str) -> Option<usize> {
    text.match_indices("cid:").map(|(idx, _)| idx).find(|&idx| {
        text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace() || "(<\"'".contains(c))
    })
}

/// `None` if `inner` is not a placeholder, otherwise the index of the
/// attachment it refers to.
fn placeholder_target(
    inner: &str,
    attachments: &[Attachment],
) -> Option<std::result::Result<usize, ()>> {
    let (kind, value) = inner.split_once(':')?;
    let value = value.trim();
    if kind.eq_ignore_ascii_case("cid") {
        let value = value.trim_start_matches('<').trim_end_matches('>');
        Some(
            attachments
                .iter()
                .position(|a| a.content_id.as_deref() == Some(value))
                .ok_or(()),
        )
    } else if kind.eq_ignore_ascii_case("attachment") {
        let n = value.parse::<usize>().ok()?;
        Some(if (1..=attachments.len()).contains(&n) {
            Ok(n - 1)
        } else {
            Err(())
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::mail::Disposition;

    fn part(mime_type: &str, filename: Option<&str>, content_id: Option<&str>) -> BodyPart {
        BodyPart {
            mime_type: mime_type.to_string(),
            content: filename.unwrap_or("data").as_bytes().to_vec(),
            text: None,
            disposition: Disposition::Attachment,
            filename: filename.map(str::to_string),
            content_id: content_id.map(str::to_string),
        }
    }

    fn attachment(label: &str, is_image: bool, content_id: Option<&str>) -> Attachment {
        Attachment {
            file: UploadedFile {
                url: format!("uploads/{label}"),
                is_image,
                label: label.to_string(),
            },
            content_id: content_id.map(str::to_string),
        }
    }

    /// Uploads with a delay that is longer for earlier parts, so completion
    /// order is the reverse of part order.
    struct SlowUploader {
        calls: Mutex<Vec<String>>,
    }

    impl AttachmentUploader for SlowUploader {
        fn upload(&self, content: &[u8], filename: &str, mime_type: &str) -> Result<UploadedFile> {
            let delay = match filename {
                "a.png" => 60,
                "b.txt" => 30,
                _ => 0,
            };
            std::thread::sleep(Duration::from_millis(delay));
            self.calls.lock().unwrap().push(filename.to_string());
            if filename == "broken.bin" {
                return Err(Error::new_external("storage is full"));
            }
            Ok(UploadedFile {
                url: format!("uploads/{}", String::from_utf8_lossy(content)),
                is_image: mime_type.starts_with("image/"),
                label: filename.to_string(),
            })
        }
    }

    #[test]
    fn test_process_keeps_part_order() {
        let uploader = Arc::new(SlowUploader {
            calls: Mutex::new(vec![]),
        });
        let processor = AttachmentProcessor::new(uploader.clone(), Duration::from_secs(10));
        let parts = [
            part("image/png", Some("a.png"), Some("cid-a")),
            part("text/plain", Some("b.txt"), None),
            part("application/zip", Some("c.zip"), None),
        ];
        let refs = parts.iter().collect::<Vec<_>>();
        let attachments = processor.process(&refs).unwrap();
        assert_eq!(
            attachments
                .iter()
                .map(|a| a.file.label.as_str())
                .collect::<Vec<_>>(),
            vec!["a.png", "b.txt", "c.zip"]
        );
        assert!(attachments[0].file.is_image);
        assert_eq!(attachments[0].content_id.as_deref(), Some("cid-a"));
        assert!(!attachments[1].file.is_image);
        assert_eq!(uploader.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_process_propagates_upload_error() {
        let processor = AttachmentProcessor::new(
            Arc::new(SlowUploader {
                calls: Mutex::new(vec![]),
            }),
            Duration::from_secs(10),
        );
        let parts = [part("application/octet-stream", Some("broken.bin"), None)];
        let err = processor.process(&parts.iter().collect::<Vec<_>>()).unwrap_err();
        assert_eq!(err.to_string(), "storage is full");
    }

    #[test]
    fn test_process_timeout() {
        let processor = AttachmentProcessor::new(
            Arc::new(SlowUploader {
                calls: Mutex::new(vec![]),
            }),
            Duration::from_millis(5),
        );
        let parts = [part("image/png", Some("a.png"), None)];
        assert!(matches!(
            processor.process(&parts.iter().collect::<Vec<_>>()).unwrap_err(),
            Error::UploadTimeout(_)
        ));
    }

    #[test]
    fn test_attachment_filename() {
        assert_eq!(
            attachment_filename(&part("image/png", Some("screen.png"), None), 0),
            "screen.png"
        );
        assert_eq!(attachment_filename(&part("image/png", None, None), 1), "attachment-2.png");
        assert_eq!(
            attachment_filename(&part("x-unknown/whatever", None, None), 0),
            "attachment-1.bin"
        );
    }

    #[test]
    fn test_link_appends_unreferenced() {
        let attachments = [
            attachment("image.png", true, None),
            attachment("notes.txt", false, None),
        ];
        assert_eq!(
            link_attachments("I could not disagree more.", &attachments).unwrap(),
            "I could not disagree more.\n\n![image.png](uploads/image.png)\n\n[notes.txt](uploads/notes.txt)"
        );
        assert_eq!(link_attachments("No files.", &[]).unwrap(), "No files.");
    }

    #[test]
    fn test_link_inline_placeholders() {
        let attachments = [
            attachment("image.png", true, Some("ii_1@mail")),
            attachment("notes.txt", false, None),
            attachment("other.png", true, None),
        ];
        assert_eq!(
            link_attachments(
                "Look: [cid:ii_1@mail]\nand [attachment:3], [not a placeholder] [x]",
                &attachments
            )
            .unwrap(),
            "Look: ![image.png](uploads/image.png)\nand ![other.png](uploads/other.png), [not a \
             placeholder] [x]\n\n[notes.txt](uploads/notes.txt)"
        );
    }

    #[test]
    fn test_link_bare_content_id() {
        let attachments = [attachment("image.png", true, Some("ii_1@mail"))];
        assert_eq!(
            link_attachments("Screenshot: cid:ii_1@mail\nthanks", &attachments).unwrap(),
            "Screenshot: ![image.png](uploads/image.png)\nthanks"
        );
        assert_eq!(
            link_attachments("acid:rain", &attachments).unwrap(),
            "acid:rain\n\n![image.png](uploads/image.png)"
        );
        assert!(matches!(
            link_attachments("(cid:other@mail)", &attachments).unwrap_err(),
            Error::UnresolvedAttachment(cid) if cid == "cid:other@mail"
        ));
    }

    #[test]
    fn test_link_unresolved() {
        let attachments = [attachment("image.png", true, Some("ii_1@mail"))];
        assert!(matches!(
            link_attachments("See [cid:missing@mail]", &attachments).unwrap_err(),
            Error::UnresolvedAttachment(cid) if cid == "cid:missing@mail"
        ));
        assert!(matches!(
            link_attachments("See [attachment:2]", &attachments).unwrap_err(),
            Error::UnresolvedAttachment(_)
        ));
        assert_eq!(
            link_attachments("unclosed [cid:x", &attachments).unwrap(),
            "unclosed [cid:x\n\n![image.png](uploads/image.png)"
        );
    }
}
