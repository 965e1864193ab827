//! Cutting blobs of concatenated documents into per-document byte ranges

use std::ops::Range;

use crate::meta::Lines;

/// Split `raw` into one range per document.
///
/// A document starts at a line beginning with `start_keyword`, or at the
/// first line of the annotation block directly preceding such a line.
/// It ends right before the next document starts, or at the end of input.
/// Bytes preceding the first document are kept with it, so the ranges
/// always cover the whole input. Input without any start keyword yields
/// no ranges.
pub fn split_documents(raw: &[u8], start_keyword: &str) -> Vec<Range<usize>> {
    let token = start_keyword.as_bytes();
    let mut starts = Vec::new();
    let mut annotation_start: Option<usize> = None;

    for (offset, line) in Lines::new(raw, 0) {
        if line.first() == Some(&b'@') {
            annotation_start.get_or_insert(offset);
        } else {
            if raw[offset..].starts_with(token) {
                starts.push(annotation_start.unwrap_or(offset));
            }
            annotation_start = None;
        }
    }

    if let Some(first) = starts.first_mut() {
        *first = 0;
    }
    let mut ranges = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(raw.len());
        ranges.push(*start..end);
    }
    ranges
}

/// Split `raw` into one range per line, for formats with one document per
/// line. Annotation lines stay with the line that follows them.
pub fn split_lines(raw: &[u8]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for (offset, line) in Lines::new(raw, 0) {
        if line.first() == Some(&b'@') {
            continue;
        }
        let end = (offset + line.len() + 1).min(raw.len());
        ranges.push(start..end);
        start = end;
    }
    ranges
}
