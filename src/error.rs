//! Custom error types for the parsing and fetching of Tor documents

use std::num::ParseIntError;
use std::string::ToString;

use thiserror;

/// Error that occured when parsing a Tor document
#[derive(thiserror::Error, Debug)]
pub enum DocumentParseError {
    #[error("an internal parsing error occured (raised by nom)")]
    Internal(#[from] nom::error::Error<String>),
    #[error("Document contains no content besides annotations")]
    EmptyDocument,
    #[error("Blank line in document starting with '{fragment}'")]
    BlankLine { fragment: String },
    #[error("Illegal line '{line}': {reason}")]
    IllegalLine { line: String, reason: String },
    #[error("Crypto block starting with '{line}' is not terminated")]
    UnterminatedObject { line: String },
    #[error("Crypto block '{line}' does not follow a keyword line")]
    UnexpectedObject { line: String },
    #[error("Keyword '{keyword}' must be contained {constraint}, but was found {count} times in document starting with '{fragment}'")]
    KeywordCount {
        keyword: String,
        constraint: &'static str,
        count: usize,
        fragment: String,
    },
    #[error("Keyword '{keyword}' requires keyword '{required}' in document starting with '{fragment}'")]
    KeywordDependency {
        keyword: String,
        required: String,
        fragment: String,
    },
    #[error("Keyword '{expected}' must be the {position} keyword, found '{found}' in document starting with '{fragment}'")]
    KeywordPosition {
        expected: &'static str,
        position: &'static str,
        found: String,
        fragment: String,
    },
    #[error("When parsing a document, not all necessary information were present")]
    Incomplete(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Line '{line}' unexpectedly had no or not enough arguments")]
    ItemArgumentsMissing { line: String },
    #[error("An item with keyword '{keyword}' was not expected at this position")]
    UnexpectedKeyword { keyword: String },
    #[error("Unrecognized line '{line}'")]
    UnrecognizedKeyword { line: String },
    #[error("Invalid base64 value '{value}' in line '{line}'")]
    InvalidBase64 { value: String, line: String },
    #[error("Invalid timestamp '{value}' in line '{line}'")]
    InvalidDate { value: String, line: String },
    #[error("Could not parse integer in {context}")]
    InvalidInt { context: String },
    #[error("Invalid {kind} '{value}' in line '{line}'")]
    InvalidNumber {
        kind: &'static str,
        value: String,
        line: String,
    },
    #[error("Invalid fingerprint '{value}' in line '{line}'")]
    InvalidFingerprint { value: String, line: String },
    #[error("Invalid nickname '{value}' in line '{line}'")]
    InvalidNickname { value: String, line: String },
    #[error("Invalid IP address '{value}' in line '{line}'")]
    InvalidIpAddress { value: String, line: String },
    #[error("Duplicate entry '{key}' in line '{line}'")]
    DuplicateEntry { key: String, line: String },
    #[error("Unknown protocol '{protocol}'")]
    UnknownProtocol { protocol: String },
    #[error("Invalid protocol version '{raw}'")]
    InvalidProtocolVersion { raw: String },
    #[error("Invalid exit policy entry '{raw}'")]
    InvalidExitPolicyEntry { raw: String },
    #[error("Malformed exit policy")]
    MalformedExitPolicy,
    #[error("Invalid argument dictionary in line '{line}'")]
    InvalidArgumentDict { line: String },
    #[error("Content range '{from}'...'{to}' not found")]
    ContentRangeNotFound { from: String, to: String },
    #[error("Declared digest '{declared}' does not match computed digest '{computed}'")]
    DigestMismatch { declared: String, computed: String },
    #[error("Error parsing the IP Address")]
    IpParseError(String),
    #[error("Error parsing a range")]
    RangeParseError(String),
    #[error("Error expected \"accept\" or \"reject\" received: {0}")]
    PolicyParseError(String),
    #[error("Unable to detect descriptor type of document starting with '{first_line}'")]
    UnknownDescriptorType { first_line: String },
    #[error("File name '{file_name}' does not match the expected pattern '{pattern}'")]
    InvalidFileName {
        file_name: String,
        pattern: &'static str,
    },
}

impl DocumentParseError {
    /// Create a new ItemArgumentsMissing error, easily
    pub fn args_missing(line: impl Into<String>) -> DocumentParseError {
        DocumentParseError::ItemArgumentsMissing { line: line.into() }
    }

    /// Create a new IllegalLine error, easily
    pub fn illegal(line: impl Into<String>, reason: impl Into<String>) -> DocumentParseError {
        DocumentParseError::IllegalLine {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

/// A document that could not be turned into a descriptor, together with
/// the bytes that failed.
#[derive(thiserror::Error, Debug)]
#[error("could not parse descriptor: {error}")]
pub struct UnparseableDocument {
    pub raw: Vec<u8>,
    #[source]
    pub error: DocumentParseError,
}

impl UnparseableDocument {
    pub fn new(raw: impl Into<Vec<u8>>, error: DocumentParseError) -> UnparseableDocument {
        UnparseableDocument {
            raw: raw.into(),
            error,
        }
    }
}

/// Error scoped to one input unit (file, archive entry, or peer response)
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("I/O error on '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Request to '{url}' failed: {message}")]
    Transport { url: String, message: String },
    #[error("Could not decompress response body")]
    Decompression(#[source] std::io::Error),
    #[error(transparent)]
    Parse(#[from] UnparseableDocument),
    #[error("Worker panicked while handling '{path}': {message}")]
    WorkerPanic { path: String, message: String },
}

impl SourceError {
    pub(crate) fn io(path: impl ToString, source: std::io::Error) -> SourceError {
        SourceError::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Programming errors: using a component in a way it does not support
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MisuseError {
    #[error("Configuration cannot be changed after reading has started")]
    AlreadyStarted,
    #[error("Cannot publish to a sequence that has been closed")]
    PublishAfterClose,
    #[error("Sequence has already been closed")]
    AlreadyClosed,
    #[error("Every consumer of the sequence has gone away")]
    NoConsumers,
    #[error("No directory peers configured")]
    NoPeers,
    #[error("Nothing to download, neither consensus nor votes requested")]
    NothingToDownload,
}

pub(crate) trait ErrorContext<T> {
    type IntoError;

    fn context(self, context: impl ToString) -> Result<T, Self::IntoError>;
}

impl<T> ErrorContext<T> for Result<T, ParseIntError> {
    type IntoError = DocumentParseError;

    fn context(self, context: impl ToString) -> Result<T, Self::IntoError> {
        self.map_err(|_| DocumentParseError::InvalidInt {
            context: context.to_string(),
        })
    }
}
