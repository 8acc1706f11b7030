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

//! Filesystem storage for uploaded attachments.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::PathBuf,
};

use log::trace;

use crate::{attachments::AttachmentUploader, errors::*, models::UploadedFile, Configuration};

/// Stores uploads as `<directory>/<hash>/<filename>` and serves them under
/// `<url_prefix>/<hash>/<filename>`.
#[derive(Debug, Clone)]
pub struct FileUploader {
    directory: PathBuf,
    url_prefix: String,
}

impl FileUploader {
    /// Create an uploader storing files in `directory`.
    pub fn new(directory: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// An uploader for [`Configuration::uploads_directory`] and
    /// [`Configuration::uploads_url`].
    pub fn from_configuration(conf: &Configuration) -> Self {
        Self::new(conf.uploads_directory(), conf.uploads_url.as_str())
    }
}

/// Strip directory components and control characters from a file name.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let name = name.trim().trim_start_matches('.');
    if name.is_empty() {
        "file".to_string()
    } else {
        name.to_string()
    }
}

impl AttachmentUploader for FileUploader {
    fn upload(&self, content: &[u8], filename: &str, mime_type: &str) -> Result<UploadedFile> {
        let filename = sanitize_filename(filename);
        let mut hasher = DefaultHasher::default();
        content.hash(&mut hasher);
        filename.hash(&mut hasher);
        let hash = data_encoding::HEXLOWER.encode(&hasher.finish().to_be_bytes());

        let dir = self.directory.join(&hash);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create upload directory {}.", dir.display()))?;
        let path = dir.join(&filename);
        std::fs::write(&path, content)
            .with_context(|| format!("Could not write upload {}.", path.display()))?;
        trace!("Stored {} bytes in {}", content.len(), path.display());

        Ok(UploadedFile {
            url: format!(
                "{}/{}/{}",
                self.url_prefix,
                hash,
                percent_encoding::utf8_percent_encode(&filename, crate::PATH_SEGMENT)
            ),
            is_image: mime_type.starts_with("image/"),
            label: filename,
        })
    }
}
