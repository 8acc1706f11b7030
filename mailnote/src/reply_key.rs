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

//! Reply keys and the reply address template they are embedded in.

use log::trace;

use crate::errors::*;

/// A reply key: the token in a notification's reply address that identifies
/// the notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyKey(String);

impl ReplyKey {
    /// Wrap a non-empty key value.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    /// The key value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Find the first recipient address matching `template` and return its
    /// key.
    ///
    /// Fails with [`Error::SentNotificationNotFound`] when no recipient carries
    /// a reply key.
    pub fn from_recipients<S: AsRef<str>>(
        template: &AddressTemplate,
        recipients: &[S],
    ) -> Result<Self> {
        recipients
            .iter()
            .find_map(|r| template.extract(r.as_ref()))
            .ok_or(Error::SentNotificationNotFound)
    }
}

impl std::fmt::Display for ReplyKey {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// A reply address template such as `reply+%{key}@example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTemplate {
    prefix: String,
    suffix: String,
}

impl AddressTemplate {
    /// The placeholder replaced by the reply key.
    pub const PLACEHOLDER: &'static str = "%{key}";

    /// Parse a template. It must contain [`Self::PLACEHOLDER`] exactly once.
    pub fn new(template: &str) -> Result<Self> {
        let mut split = template.split(Self::PLACEHOLDER);
        match (split.next(), split.next(), split.next()) {
            (Some(prefix), Some(suffix), None) => Ok(Self {
                prefix: prefix.trim().to_string(),
                suffix: suffix.trim().to_string(),
            }),
            _ => Err(Error::new_external(format!(
                "Incoming e-mail address template {template:?} must contain {} exactly once.",
                Self::PLACEHOLDER
            ))),
        }
    }

    /// The reply address for `key`.
    pub fn address(&self, key: &ReplyKey) -> String {
        format!("{}{}{}", self.prefix, key, self.suffix)
    }

    /// Extract the reply key from `address`, if it matches the template.
    pub fn extract(&self, address: &str) -> Option<ReplyKey> {
        let address = address.trim();
        let min_len = self.prefix.len() + self.suffix.len();
        if address.len() <= min_len
            || !address.is_char_boundary(self.prefix.len())
            || !address.is_char_boundary(address.len() - self.suffix.len())
        {
            trace!("{address:?} does not match reply address template");
            return None;
        }
        let (head, rest) = address.split_at(self.prefix.len());
        let (key, tail) = rest.split_at(rest.len() - self.suffix.len());
        if !head.eq_ignore_ascii_case(&self.prefix)
            || !tail.eq_ignore_ascii_case(&self.suffix)
            || key.contains('@')
        {
            trace!("{address:?} does not match reply address template");
            return None;
        }
        ReplyKey::new(key)
    }
}

impl std::str::FromStr for AddressTemplate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
