//! Directory key certificates, as published by directory authorities and
//! embedded in their votes.

use std::net::IpAddr;

use crate::descriptor::ParseOptions;
use crate::digest::{self, DigestAlgorithm, DigestEncoding, DigestSpec};
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, RawContent, UnrecognizedLines};

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;

pub(crate) const START_KEYWORD: &str = "dir-key-certificate-version ";

const RULES: Rules = Rules {
    first: Some("dir-key-certificate-version"),
    last: Some("dir-key-certification"),
    exactly_once: &[
        "dir-key-certificate-version",
        "fingerprint",
        "dir-identity-key",
        "dir-key-published",
        "dir-key-expires",
        "dir-signing-key",
        "dir-key-certification",
    ],
    at_most_once: &["dir-address", "dir-key-crosscert"],
    ..Rules::NONE
};

const DIGEST: DigestSpec = DigestSpec {
    start: START_KEYWORD,
    end: Some("\ndir-key-certification\n"),
    algorithm: DigestAlgorithm::Sha1,
    encoding: DigestEncoding::HexUpper,
};

/// An authority's medium-term signing key, certified by its identity key
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(private)]
pub struct DirectoryKeyCertificate {
    pub version: u32,
    #[builder(default)]
    pub dir_address: Option<(IpAddr, u16)>,
    pub fingerprint: Fingerprint,
    /// PEM block of the authority identity key
    pub identity_key: String,
    pub published: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub signing_key: String,
    #[builder(default)]
    pub crosscert: Option<String>,
    pub certification: String,
    /// SHA-1 over `dir-key-certificate-version` through `dir-key-certification`
    pub digest_sha1: String,
    #[builder(default)]
    pub content: RawContent,
}

impl DirectoryKeyCertificate {
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, options)
    }

    pub(crate) fn from_doc(doc: Document, options: &ParseOptions) -> Result<Self, DocumentParseError> {
        RULES.check_items(&doc.items, doc.fragment())?;

        let mut cert = DirectoryKeyCertificateBuilder::default();
        let mut unrecognized = UnrecognizedLines::new(options);
        for item in doc.items.iter() {
            let line = item.line();
            match item.keyword() {
                "dir-key-certificate-version" => {
                    let version = fields::parse_int(item.args_exactly(1)?[0], line)?;
                    if version != 3 {
                        return Err(DocumentParseError::illegal(line, "unsupported certificate version"));
                    }
                    cert.version(version);
                }
                "dir-address" => {
                    let address = fields::parse_address_port(item.args_exactly(1)?[0], line)?;
                    cert.dir_address(Some(address));
                }
                "fingerprint" => {
                    cert.fingerprint(fields::parse_hex_fingerprint(item.args_exactly(1)?[0], line)?);
                }
                "dir-identity-key" => {
                    item.no_arguments()?;
                    cert.identity_key(item.object_labeled("RSA PUBLIC KEY")?.text.clone());
                }
                "dir-key-published" => {
                    cert.published(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "dir-key-expires" => {
                    cert.expires(fields::parse_timestamp(item.get_argument()?, line)?);
                }
                "dir-signing-key" => {
                    item.no_arguments()?;
                    cert.signing_key(item.object_labeled("RSA PUBLIC KEY")?.text.clone());
                }
                "dir-key-crosscert" => {
                    let object = item.require_object()?;
                    if !object.is("ID SIGNATURE") && !object.is("SIGNATURE") {
                        return Err(DocumentParseError::illegal(line, "unexpected crosscert block"));
                    }
                    cert.crosscert(Some(object.text.clone()));
                }
                "dir-key-certification" => {
                    item.no_arguments()?;
                    cert.certification(item.object_labeled("SIGNATURE")?.text.clone());
                }
                _ => unrecognized.record(item)?,
            }
        }
        cert.digest_sha1(digest::compute(doc.raw(), &DIGEST)?);
        cert.content(doc.into_content(unrecognized));

        cert.build()
            .map_err(|err| DocumentParseError::Incomplete(Box::new(err)))
    }

    /// Parse all certificates of a blob, e.g. a file from the
    /// `certs` directory of an archive
    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        Document::parse_many(raw, START_KEYWORD)?
            .into_iter()
            .map(|doc| Self::from_doc(doc, options))
            .collect()
    }

    pub fn is_expired_at(&self, time: DateTime<Utc>) -> bool {
        self.expires <= time
    }
}
