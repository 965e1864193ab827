//! The meta format shared by all Tor documents: annotations, keyword lines
//! ("items") and the cryptographic objects that may follow them.
//!
//! Documents are scanned as bytes. Lines are decoded lossily, so that a
//! stray non-UTF-8 byte in a free-text field (contact lines, platform
//! strings) does not prevent parsing, while the exact input bytes are kept
//! for [`RawContent`].

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use crate::descriptor::ParseOptions;
use crate::digest;
use crate::error::DocumentParseError;

//
// External dependencies
//
use nom::{
    bytes::complete::{tag, take_until, take_while1},
    combinator::{eof, opt, rest},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

pub(crate) const OBJECT_BEGIN: &str = "-----BEGIN ";
pub(crate) const OBJECT_END: &str = "-----END ";

/// Longest prefix of a document quoted in error messages
const FRAGMENT_LEN: usize = 64;

/// A relay identity (or other 20-byte) fingerprint
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn from_u8(bytes: &[u8; 20]) -> Fingerprint {
        Fingerprint(*bytes)
    }

    /// Parse from 40 hex characters (either case)
    pub fn from_str_hex(s: &str) -> Result<Fingerprint, DocumentParseError> {
        let invalid = || DocumentParseError::InvalidFingerprint {
            value: s.to_string(),
            line: s.to_string(),
        };
        if s.len() != 40 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| invalid())?;
        Ok(Fingerprint(bytes))
    }

    /// Parse from 27 base64 characters without padding
    pub fn from_str_b64(s: &str) -> Result<Fingerprint, DocumentParseError> {
        let invalid = || DocumentParseError::InvalidBase64 {
            value: s.to_string(),
            line: s.to_string(),
        };
        if s.len() != 27 {
            return Err(invalid());
        }
        let decoded = base64::decode_config(s, base64::STANDARD_NO_PAD).map_err(|_| invalid())?;
        let bytes: [u8; 20] = decoded.try_into().map_err(|_| invalid())?;
        Ok(Fingerprint(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lower-case hex, as used in file names
    pub fn to_hex_lower(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        base64::encode_config(self.0, base64::STANDARD_NO_PAD)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// A `-----BEGIN <label>-----` ... `-----END <label>-----` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub label: String,
    /// The complete block, delimiter lines included, joined by newlines
    pub text: String,
}

impl Object {
    pub fn is(&self, label: &str) -> bool {
        self.label == label
    }
}

/// A single keyword line of a document, with its optional object
#[derive(Debug, Clone)]
pub struct Item<'a> {
    line: Cow<'a, str>,
    keyword: Range<usize>,
    arguments: Option<Range<usize>>,
    pub object: Option<Object>,
    /// Byte offset of the line within the document's raw bytes
    pub offset: usize,
}

fn is_keyword_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn keyword_line(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    terminated(
        pair(
            take_while1(is_keyword_char),
            opt(preceded(take_while1(is_space), rest)),
        ),
        eof,
    )(input)
}

fn object_begin(input: &str) -> IResult<&str, &str> {
    terminated(
        delimited(tag(OBJECT_BEGIN), take_until("-----"), tag("-----")),
        eof,
    )(input)
}

fn object_end(input: &str) -> IResult<&str, &str> {
    terminated(
        delimited(tag(OBJECT_END), take_until("-----"), tag("-----")),
        eof,
    )(input)
}

fn nom_error(err: nom::Err<nom::error::Error<&str>>, line: &str) -> DocumentParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            DocumentParseError::Internal(nom::error::Error::new(e.input.to_string(), e.code))
        }
        nom::Err::Incomplete(_) => DocumentParseError::illegal(line, "incomplete line"),
    }
}

/// Position of `sub` inside `outer`, both slices of the same string
fn sub_range(outer: &str, sub: &str) -> Range<usize> {
    let start = sub.as_ptr() as usize - outer.as_ptr() as usize;
    start..start + sub.len()
}

impl<'a> Item<'a> {
    pub(crate) fn parse(line: Cow<'a, str>, offset: usize) -> Result<Item<'a>, DocumentParseError> {
        let (keyword, arguments) = {
            let text: &str = &line;
            let (_, (mut keyword, mut arguments)) =
                keyword_line(text).map_err(|_| DocumentParseError::illegal(text, "malformed keyword line"))?;
            // a legacy "opt " prefix is dropped before interpretation
            if keyword == "opt" {
                let inner = arguments.ok_or_else(|| DocumentParseError::args_missing(text))?;
                let (_, (k, a)) = keyword_line(inner)
                    .map_err(|_| DocumentParseError::illegal(text, "malformed keyword line"))?;
                keyword = k;
                arguments = a;
            }
            let arguments = arguments
                .map(|a| a.trim_end_matches(is_space))
                .filter(|a| !a.is_empty())
                .map(|a| sub_range(text, a));
            (sub_range(text, keyword), arguments)
        };
        Ok(Item {
            line,
            keyword,
            arguments,
            object: None,
            offset,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.line[self.keyword.clone()]
    }

    pub fn arguments(&self) -> Option<&str> {
        self.arguments.clone().map(|r| &self.line[r])
    }

    /// The line verbatim, including a possible `opt ` prefix
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Get the argument string, failing if there is none
    pub fn get_argument(&self) -> Result<&str, DocumentParseError> {
        self.arguments()
            .ok_or_else(|| DocumentParseError::args_missing(self.line()))
    }

    /// Split the arguments on whitespace, failing if there are none
    pub fn split_arguments(&self) -> Result<Vec<&str>, DocumentParseError> {
        Ok(self.get_argument()?.split(is_space).filter(|x| !x.is_empty()).collect())
    }

    /// Split the arguments on whitespace, accepting an empty list
    pub fn args(&self) -> Vec<&str> {
        self.arguments()
            .map(|a| a.split(is_space).filter(|x| !x.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Split arguments and require at least `n` of them
    pub fn args_at_least(&self, n: usize) -> Result<Vec<&str>, DocumentParseError> {
        let args = self.args();
        if args.len() < n {
            return Err(DocumentParseError::args_missing(self.line()));
        }
        Ok(args)
    }

    /// Split arguments and require exactly `n` of them
    pub fn args_exactly(&self, n: usize) -> Result<Vec<&str>, DocumentParseError> {
        let args = self.args();
        if args.len() != n {
            return Err(DocumentParseError::illegal(
                self.line(),
                format!("expected {} arguments, found {}", n, args.len()),
            ));
        }
        Ok(args)
    }

    /// Require that no arguments follow the keyword
    pub fn no_arguments(&self) -> Result<(), DocumentParseError> {
        match self.arguments() {
            None => Ok(()),
            Some(_) => Err(DocumentParseError::illegal(self.line(), "unexpected arguments")),
        }
    }

    /// Get the object following this line, requiring the given label
    pub fn object_labeled(&self, label: &str) -> Result<&Object, DocumentParseError> {
        match &self.object {
            Some(obj) if obj.is(label) => Ok(obj),
            Some(obj) => Err(DocumentParseError::illegal(
                self.line(),
                format!("expected {} block, found {}", label, obj.label),
            )),
            None => Err(DocumentParseError::illegal(
                self.line(),
                format!("missing {} block", label),
            )),
        }
    }

    /// Get the object following this line, whatever its label
    pub fn require_object(&self) -> Result<&Object, DocumentParseError> {
        self.object
            .as_ref()
            .ok_or_else(|| DocumentParseError::illegal(self.line(), "missing crypto block"))
    }

    /// The line and its object lines, as kept for unrecognized lines
    pub fn verbatim_lines(&self) -> Vec<String> {
        let mut lines = vec![self.line.to_string()];
        if let Some(obj) = &self.object {
            lines.extend(obj.text.lines().map(str::to_string));
        }
        lines
    }
}

/// Iterates `(offset, line)` pairs of newline-terminated lines
pub(crate) struct Lines<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    pub(crate) fn new(raw: &'a [u8], pos: usize) -> Lines<'a> {
        Lines { raw, pos }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.raw.len() {
            return None;
        }
        let start = self.pos;
        let end = match memchr::memchr(b'\n', &self.raw[start..]) {
            Some(i) => start + i,
            None => self.raw.len(),
        };
        self.pos = end + 1;
        Some((start, &self.raw[start..end]))
    }
}

/// A quotable prefix of some bytes, for error messages
pub(crate) fn fragment(raw: &[u8]) -> String {
    let end = memchr::memchr(b'\n', raw).unwrap_or(raw.len()).min(FRAGMENT_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Separate the leading `@` annotation lines of `raw` from the body,
/// returning the annotations and the offset the body starts at
pub(crate) fn split_annotations(raw: &[u8]) -> (Vec<Cow<'_, str>>, usize) {
    let mut annotations = Vec::new();
    for (offset, line) in Lines::new(raw, 0) {
        if line.first() != Some(&b'@') {
            return (annotations, offset);
        }
        annotations.push(String::from_utf8_lossy(line));
    }
    (annotations, raw.len())
}

/// A Tor document split into annotations and items
#[derive(Debug)]
pub struct Document<'a> {
    raw: &'a [u8],
    body_offset: usize,
    annotations: Vec<Cow<'a, str>>,
    pub items: Vec<Item<'a>>,
}

impl<'a> Document<'a> {
    /// Split a single document into annotations, items and objects.
    ///
    /// Fails on documents without content, blank lines, lines that do not
    /// start with a keyword, and unterminated or orphaned crypto blocks.
    pub fn parse_single(raw: &'a [u8]) -> Result<Document<'a>, DocumentParseError> {
        let (annotations, body_offset) = split_annotations(raw);
        if raw[body_offset..].iter().all(u8::is_ascii_whitespace) {
            return Err(DocumentParseError::EmptyDocument);
        }

        let mut lines = Lines::new(raw, body_offset);
        let mut items: Vec<Item<'a>> = Vec::new();
        while let Some((offset, line)) = lines.next() {
            if line.iter().all(u8::is_ascii_whitespace) {
                return Err(DocumentParseError::BlankLine {
                    fragment: fragment(&raw[body_offset..]),
                });
            }
            let text = String::from_utf8_lossy(line);
            if text.starts_with(OBJECT_BEGIN) {
                let (_, label) = object_begin(&text).map_err(|e| nom_error(e, &text))?;
                let label = label.to_string();
                let item = match items.last_mut() {
                    Some(item) if item.object.is_none() => item,
                    _ => {
                        return Err(DocumentParseError::UnexpectedObject {
                            line: text.into_owned(),
                        })
                    }
                };
                let mut block = text.clone().into_owned();
                loop {
                    let (_, next) = lines.next().ok_or_else(|| {
                        DocumentParseError::UnterminatedObject {
                            line: text.to_string(),
                        }
                    })?;
                    let next = String::from_utf8_lossy(next);
                    block.push('\n');
                    block.push_str(&next);
                    if next.starts_with(OBJECT_END) {
                        let (_, end_label) = object_end(&next).map_err(|e| nom_error(e, &next))?;
                        if end_label != label {
                            return Err(DocumentParseError::illegal(
                                next.as_ref(),
                                format!("crypto block {} closed as {}", label, end_label),
                            ));
                        }
                        break;
                    }
                }
                item.object = Some(Object { label, text: block });
                continue;
            }
            items.push(Item::parse(text, offset)?);
        }

        Ok(Document {
            raw,
            body_offset,
            annotations,
            items,
        })
    }

    /// Split a blob of concatenated documents and parse each of them.
    pub fn parse_many(
        raw: &'a [u8],
        start_keyword: &str,
    ) -> Result<Vec<Document<'a>>, DocumentParseError> {
        crate::split::split_documents(raw, start_keyword)
            .into_iter()
            .map(|range| Document::parse_single(&raw[range]))
            .collect()
    }

    /// All bytes of this document, annotations included
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// The bytes following the annotations
    pub fn body(&self) -> &'a [u8] {
        &self.raw[self.body_offset..]
    }

    pub fn annotations(&self) -> Vec<String> {
        self.annotations.iter().map(|a| a.to_string()).collect()
    }

    /// The start of the document body, quoted in error messages
    pub fn fragment(&self) -> String {
        fragment(self.body())
    }

    pub fn first_item(&self) -> Option<&Item<'a>> {
        self.items.first()
    }

    /// Get the raw bytes from the first line starting with `from` through
    /// the end of the first following occurrence of `to`.
    pub fn get_raw_content_between(
        &self,
        from: &str,
        to: &str,
    ) -> Result<&'a [u8], DocumentParseError> {
        digest::locate(self.raw, from, Some(to))
    }

    /// Turn this document into the owned raw parts kept by a descriptor
    pub(crate) fn into_content(self, unrecognized: UnrecognizedLines) -> RawContent {
        RawContent {
            bytes: self.raw.to_vec(),
            annotations: self.annotations(),
            unrecognized_lines: unrecognized.lines,
        }
    }
}

/// Collector for lines with keywords a decoder does not know
#[derive(Debug)]
pub(crate) struct UnrecognizedLines {
    fail: bool,
    lines: Vec<String>,
}

impl UnrecognizedLines {
    pub(crate) fn new(options: &ParseOptions) -> UnrecognizedLines {
        UnrecognizedLines {
            fail: options.fail_on_unrecognized,
            lines: Vec::new(),
        }
    }

    /// Record an unknown item, or fail if configured to do so
    pub(crate) fn record(&mut self, item: &Item) -> Result<(), DocumentParseError> {
        if self.fail {
            return Err(DocumentParseError::UnrecognizedKeyword {
                line: item.line().to_string(),
            });
        }
        self.lines.extend(item.verbatim_lines());
        Ok(())
    }

    /// Take over the lines a sub-entry decoder collected
    pub(crate) fn extend(&mut self, lines: Vec<String>) {
        self.lines.extend(lines);
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// The exact input bytes of a descriptor plus what did not fit its fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawContent {
    bytes: Vec<u8>,
    annotations: Vec<String>,
    unrecognized_lines: Vec<String>,
}

impl RawContent {
    pub(crate) fn new(bytes: Vec<u8>, annotations: Vec<String>, unrecognized_lines: Vec<String>) -> Self {
        RawContent {
            bytes,
            annotations,
            unrecognized_lines,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn unrecognized_lines(&self) -> &[String] {
        &self.unrecognized_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_and_objects() {
        let raw = b"@type test 1.0\nfoo bar  baz\nopt key-word\n-----BEGIN RSA PUBLIC KEY-----\nAAAA\n-----END RSA PUBLIC KEY-----\nlast\n";
        let doc = Document::parse_single(raw).unwrap();
        assert_eq!(doc.annotations(), vec!["@type test 1.0".to_string()]);
        assert_eq!(doc.items.len(), 3);
        assert_eq!(doc.items[0].keyword(), "foo");
        assert_eq!(doc.items[0].split_arguments().unwrap(), vec!["bar", "baz"]);
        assert_eq!(doc.items[1].keyword(), "key-word");
        assert_eq!(doc.items[1].line(), "opt key-word");
        let obj = doc.items[1].object.as_ref().unwrap();
        assert!(obj.is("RSA PUBLIC KEY"));
        assert!(obj.text.ends_with("-----END RSA PUBLIC KEY-----"));
        assert_eq!(doc.items[2].arguments(), None);
        assert_eq!(doc.body(), &raw[15..]);
    }

    #[test]
    fn rejects_blank_lines() {
        let err = Document::parse_single(b"foo\n\nbar\n").unwrap_err();
        assert!(matches!(err, DocumentParseError::BlankLine { .. }));
    }

    #[test]
    fn rejects_annotation_only() {
        let err = Document::parse_single(b"@type foo 1.0\n").unwrap_err();
        assert!(matches!(err, DocumentParseError::EmptyDocument));
    }

    #[test]
    fn rejects_unterminated_object() {
        let err = Document::parse_single(b"key\n-----BEGIN SIGNATURE-----\nAAAA\n").unwrap_err();
        assert!(matches!(err, DocumentParseError::UnterminatedObject { .. }));
    }

    #[test]
    fn rejects_orphan_object() {
        let err = Document::parse_single(b"-----BEGIN SIGNATURE-----\n-----END SIGNATURE-----\n")
            .unwrap_err();
        assert!(matches!(err, DocumentParseError::UnexpectedObject { .. }));
    }

    #[test]
    fn rejects_line_without_keyword() {
        let err = Document::parse_single(b"foo\n$bar\n").unwrap_err();
        assert!(matches!(err, DocumentParseError::IllegalLine { .. }));
    }

    #[test]
    fn survives_non_utf8() {
        let doc = Document::parse_single(b"contact caf\xe9\n").unwrap();
        assert_eq!(doc.items[0].keyword(), "contact");
        assert!(doc.items[0].get_argument().unwrap().starts_with("caf"));
    }

    #[test]
    fn fingerprints() {
        let hex = "000A10D43011EA4928A35F610405F92B4433B4DC";
        let fp = Fingerprint::from_str_hex(hex).unwrap();
        assert_eq!(fp.to_string(), hex);
        assert_eq!(Fingerprint::from_str_b64(&fp.to_base64()).unwrap(), fp);
        assert!(Fingerprint::from_str_hex("000A10").is_err());
        assert!(Fingerprint::from_str_hex(&"Z".repeat(40)).is_err());
    }
}
