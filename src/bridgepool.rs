//! Bridge pool assignments: which distribution pool each bridge was put in

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::grammar::Rules;
use crate::meta::{Document, Fingerprint, RawContent, UnrecognizedLines};

//
// External dependencies
//
use chrono::{DateTime, Utc};

pub(crate) const START_KEYWORD: &str = "bridge-pool-assignment ";

const RULES: Rules = Rules {
    first: Some("bridge-pool-assignment"),
    exactly_once: &["bridge-pool-assignment"],
    ..Rules::NONE
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePoolAssignment {
    pub published: DateTime<Utc>,
    /// Assignment details such as `https ring=3 flag=stable`, by the
    /// (hashed) bridge fingerprint
    pub entries: BTreeMap<Fingerprint, String>,
    pub content: RawContent,
}

impl BridgePoolAssignment {
    pub fn from_bytes(raw: &[u8], options: &ParseOptions) -> Result<Self, DocumentParseError> {
        Self::from_doc(Document::parse_single(raw)?, options)
    }

    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        Document::parse_many(raw, START_KEYWORD)?
            .into_iter()
            .map(|doc| Self::from_doc(doc, options))
            .collect()
    }

    /// Every line but the first is an assignment, keyed by a fingerprint
    /// instead of a keyword; there are no unrecognized lines.
    pub(crate) fn from_doc(doc: Document, options: &ParseOptions) -> Result<Self, DocumentParseError> {
        RULES.check_items(&doc.items, doc.fragment())?;

        let published = {
            let first = &doc.items[0];
            fields::parse_timestamp(first.get_argument()?, first.line())?
        };
        let mut entries = BTreeMap::new();
        for item in doc.items.iter().skip(1) {
            let line = item.line();
            let fingerprint = fields::parse_hex_fingerprint(item.keyword(), line)?;
            let details = item.get_argument()?.to_string();
            if entries.insert(fingerprint, details).is_some() {
                return Err(DocumentParseError::DuplicateEntry {
                    key: fingerprint.to_string(),
                    line: line.to_string(),
                });
            }
        }

        Ok(BridgePoolAssignment {
            published,
            entries,
            content: doc.into_content(UnrecognizedLines::new(options)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSIGNMENT: &str = "@type bridge-pool-assignment 1.0
bridge-pool-assignment 2011-03-13 14:38:03
00b834117566035736fc6bd4ece950eace8e057a unallocated
00e923e7a8d87d28954fee7503e480f3a03ce4ee https ring=3 flag=stable
0103bb5b00ad3102b2dbafe9ce709a0a7c1060e4 email
";

    #[test]
    fn parses_assignment() {
        let a = BridgePoolAssignment::from_bytes(ASSIGNMENT.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(a.entries.len(), 3);
        let https = Fingerprint::from_str_hex("00e923e7a8d87d28954fee7503e480f3a03ce4ee").unwrap();
        assert_eq!(a.entries[&https], "https ring=3 flag=stable");
        assert_eq!(a.content.annotations().len(), 1);
    }

    #[test]
    fn two_assignments() {
        let second = ASSIGNMENT.replace("14:38:03", "15:08:03");
        let raw = format!("{}{}", ASSIGNMENT, second);
        let all = BridgePoolAssignment::parse_all(raw.as_bytes(), &ParseOptions::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].published < all[1].published);
    }

    #[test]
    fn rejects_duplicates_and_bad_fingerprints() {
        let raw = format!("{}0103bb5b00ad3102b2dbafe9ce709a0a7c1060e4 https\n", ASSIGNMENT);
        assert!(matches!(
            BridgePoolAssignment::from_bytes(raw.as_bytes(), &ParseOptions::default()),
            Err(DocumentParseError::DuplicateEntry { .. })
        ));
        let raw = format!("{}0103bb5b email\n", ASSIGNMENT);
        assert!(BridgePoolAssignment::from_bytes(raw.as_bytes(), &ParseOptions::default()).is_err());
    }
}
