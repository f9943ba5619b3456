//! Handle text codec.
//!
//! A handle is `<uniquifier>[<workbook>]<reference>[,<index>]`, e.g.
//! `X[Book1]Sheet1!A1,1`. The `,<index>` suffix is omitted for index 0.
//! Decoding never fails loudly: anything that is not a well-formed handle is
//! simply `None`, because callers test arbitrary cell text.

use std::fmt::Write;

/// Decoded view of a handle string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleParts<'a> {
    pub workbook: &'a str,
    pub reference: &'a str,
    pub index: usize,
}

/// Cheap prefix test: does `text` start with `<uniquifier>[`?
#[inline]
pub fn is_reference(text: &str, uniquifier: char) -> bool {
    let mut chars = text.chars();
    chars.next() == Some(uniquifier) && chars.next() == Some('[')
}

/// Render a handle.
pub fn write_handle(uniquifier: char, workbook: &str, reference: &str, index: usize) -> String {
    // uniquifier + brackets + up to ",NNN"
    let mut out = String::with_capacity(workbook.len() + reference.len() + 10);
    out.push(uniquifier);
    out.push('[');
    out.push_str(workbook);
    out.push(']');
    out.push_str(reference);
    if index > 0 {
        let _ = write!(out, ",{index}");
    }
    out
}

/// Decode a handle, or `None` if `text` is not one.
pub fn parse_handle(text: &str, uniquifier: char) -> Option<HandleParts<'_>> {
    if !is_reference(text, uniquifier) {
        return None;
    }
    let body = &text[uniquifier.len_utf8() + 1..];

    // Search backwards: the workbook name may itself contain ']'
    let close = body.rfind(']')?;
    let workbook = &body[..close];
    let tail = &body[close + 1..];

    // Only an all-digit tail after the last comma is an index; otherwise
    // the comma belongs to the sheet name.
    let (reference, index) = match tail.rsplit_once(',') {
        Some((reference, digits))
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (reference, digits.parse().ok()?)
        }
        _ => (tail, 0),
    };
    if reference.is_empty() {
        return None;
    }
    Some(HandleParts {
        workbook,
        reference,
        index,
    })
}
