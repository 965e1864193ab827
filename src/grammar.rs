//! Keyword multiplicity rules.
//!
//! Decoders first count all keywords of a document (the count pass, which
//! already skips the contents of crypto blocks), check the counts against
//! the rules declared for the document type, and only then extract fields.
//! All multiplicity violations, at-most-once ones included, are therefore
//! reported before any field is looked at.

use std::collections::HashMap;

use crate::error::DocumentParseError;
use crate::meta::{Document, Item};

/// Keyword counts of one document or section
#[derive(Debug, Clone)]
pub struct KeywordCounts {
    counts: HashMap<String, usize>,
    first: Option<String>,
    last: Option<String>,
    fragment: String,
}

impl KeywordCounts {
    /// Count the keywords of a whole document
    pub fn scan(doc: &Document) -> KeywordCounts {
        Self::scan_items(&doc.items, doc.fragment())
    }

    /// Count the keywords of a run of items, e.g. one section
    pub fn scan_items(items: &[Item], fragment: String) -> KeywordCounts {
        let mut counts = HashMap::new();
        for item in items {
            *counts.entry(item.keyword().to_string()).or_insert(0) += 1;
        }
        KeywordCounts {
            counts,
            first: items.first().map(|i| i.keyword().to_string()),
            last: items.last().map(|i| i.keyword().to_string()),
            fragment,
        }
    }

    pub fn count(&self, keyword: &str) -> usize {
        self.counts.get(keyword).copied().unwrap_or(0)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.count(keyword) > 0
    }

    fn violation(&self, keyword: &str, constraint: &'static str) -> DocumentParseError {
        DocumentParseError::KeywordCount {
            keyword: keyword.to_string(),
            constraint,
            count: self.count(keyword),
            fragment: self.fragment.clone(),
        }
    }

    pub fn exactly_once(&self, keyword: &str) -> Result<(), DocumentParseError> {
        match self.count(keyword) {
            1 => Ok(()),
            _ => Err(self.violation(keyword, "exactly once")),
        }
    }

    pub fn at_most_once(&self, keyword: &str) -> Result<(), DocumentParseError> {
        match self.count(keyword) {
            0 | 1 => Ok(()),
            _ => Err(self.violation(keyword, "at most once")),
        }
    }

    pub fn at_least_once(&self, keyword: &str) -> Result<(), DocumentParseError> {
        match self.count(keyword) {
            0 => Err(self.violation(keyword, "at least once")),
            _ => Ok(()),
        }
    }

    /// If `keyword` is present, `required` must be too
    pub fn requires(&self, keyword: &str, required: &str) -> Result<(), DocumentParseError> {
        if self.contains(keyword) && !self.contains(required) {
            return Err(DocumentParseError::KeywordDependency {
                keyword: keyword.to_string(),
                required: required.to_string(),
                fragment: self.fragment.clone(),
            });
        }
        Ok(())
    }

    pub fn first_keyword_is(&self, keyword: &'static str) -> Result<(), DocumentParseError> {
        Self::position(&self.first, keyword, "first", &self.fragment)
    }

    pub fn last_keyword_is(&self, keyword: &'static str) -> Result<(), DocumentParseError> {
        Self::position(&self.last, keyword, "last", &self.fragment)
    }

    fn position(
        found: &Option<String>,
        expected: &'static str,
        position: &'static str,
        fragment: &str,
    ) -> Result<(), DocumentParseError> {
        match found {
            Some(found) if found == expected => Ok(()),
            other => Err(DocumentParseError::KeywordPosition {
                expected,
                position,
                found: other.clone().unwrap_or_default(),
                fragment: fragment.to_string(),
            }),
        }
    }
}

/// The keyword rules of one document type (or section of one)
#[derive(Debug, Clone, Copy)]
pub struct Rules {
    pub first: Option<&'static str>,
    pub last: Option<&'static str>,
    pub exactly_once: &'static [&'static str],
    pub at_most_once: &'static [&'static str],
    pub at_least_once: &'static [&'static str],
    pub requires: &'static [(&'static str, &'static str)],
}

impl Rules {
    pub const NONE: Rules = Rules {
        first: None,
        last: None,
        exactly_once: &[],
        at_most_once: &[],
        at_least_once: &[],
        requires: &[],
    };

    /// Check the first keyword, then all multiplicities, then the last keyword
    pub fn check(&self, counts: &KeywordCounts) -> Result<(), DocumentParseError> {
        if let Some(first) = self.first {
            counts.first_keyword_is(first)?;
        }
        for keyword in self.exactly_once {
            counts.exactly_once(keyword)?;
        }
        for keyword in self.at_most_once {
            counts.at_most_once(keyword)?;
        }
        for keyword in self.at_least_once {
            counts.at_least_once(keyword)?;
        }
        for (keyword, required) in self.requires {
            counts.requires(keyword, required)?;
        }
        if let Some(last) = self.last {
            counts.last_keyword_is(last)?;
        }
        Ok(())
    }

    /// Count the keywords of `items` and check them
    pub fn check_items(&self, items: &[Item], fragment: String) -> Result<KeywordCounts, DocumentParseError> {
        let counts = KeywordCounts::scan_items(items, fragment);
        self.check(&counts)?;
        Ok(counts)
    }
}
