//! GetTor request statistics: one line per day of `key:count` pairs

use std::collections::BTreeMap;

use crate::descriptor::ParseOptions;
use crate::error::DocumentParseError;
use crate::fields;
use crate::meta::{self, RawContent};
use crate::split;

//
// External dependencies
//
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GettorStatistics {
    pub date: NaiveDate,
    /// Number of requests per package or language
    pub counts: BTreeMap<String, u64>,
    pub content: RawContent,
}

impl GettorStatistics {
    /// Parse one line, possibly preceded by annotations
    pub fn from_bytes(raw: &[u8], _options: &ParseOptions) -> Result<Self, DocumentParseError> {
        let (annotations, body_offset) = meta::split_annotations(raw);
        let body = String::from_utf8_lossy(&raw[body_offset..]);
        let line = body.strip_suffix('\n').unwrap_or(&body);
        if line.trim().is_empty() {
            return Err(DocumentParseError::EmptyDocument);
        }
        if line.contains('\n') {
            return Err(DocumentParseError::illegal(line, "expected a single line"));
        }

        let mut tokens = line.split(' ').filter(|t| !t.is_empty());
        let date = fields::parse_date(tokens.next().unwrap_or_default(), line)?;
        let mut counts = BTreeMap::new();
        for token in tokens {
            let (key, count) = token
                .split_once(':')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| DocumentParseError::InvalidArgumentDict {
                    line: line.to_string(),
                })?;
            if counts.insert(key.to_string(), fields::parse_int(count, line)?).is_some() {
                return Err(DocumentParseError::DuplicateEntry {
                    key: key.to_string(),
                    line: line.to_string(),
                });
            }
        }

        Ok(GettorStatistics {
            date,
            counts,
            content: RawContent::new(
                raw.to_vec(),
                annotations.iter().map(|a| a.to_string()).collect(),
                Vec::new(),
            ),
        })
    }

    /// Parse a file of statistics lines
    pub fn parse_all(raw: &[u8], options: &ParseOptions) -> Result<Vec<Self>, DocumentParseError> {
        split::split_lines(raw)
            .into_iter()
            .map(|range| Self::from_bytes(&raw[range], options))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}
