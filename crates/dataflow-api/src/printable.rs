// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message samples for status.
//!
//! Status objects carry the last message seen by every source and sink. Raw
//! payloads may be large or binary, so only a short printable sample is kept.

/// Maximum number of characters kept from a message.
pub const MAX_SAMPLE_CHARS: usize = 32;

/// Sample stored in place of payloads that are not printable text.
pub const REDACTED: &str = "<binary data redacted>";

/// Format or redact a message for display in status.
///
/// Text is truncated to [`MAX_SAMPLE_CHARS`] characters (with a `...` suffix).
/// Payloads that are not UTF-8, or contain control characters other than
/// tab, newline and carriage return, are replaced with [`REDACTED`].
pub fn printable(data: &[u8]) -> String {
    let Ok(text) = std::str::from_utf8(data) else {
        return REDACTED.to_string();
    };

    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return REDACTED.to_string();
    }

    match text.char_indices().nth(MAX_SAMPLE_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
