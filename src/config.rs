//! Config-file record parser shared by the node list and the node-status
//! list files (spec section 6).
//!
//! Grammar: `key=value` or `key = value`; `#` starts a comment; blank
//! lines are ignored; values are trimmed of trailing whitespace. Records
//! (a node, a job) are separated by a blank line or by the reappearance of
//! the file's primary key.

use std::collections::HashMap;

/// One `key=value` config line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLine {
    pub line_no: usize,
    pub key: String,
    pub value: String,
}

fn parse_line(line_no: usize, raw: &str) -> Option<ConfigLine> {
    let without_comment = match raw.find('#') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let trimmed = without_comment.trim();
    if trimmed.is_empty() {
        return None;
    }

    let sep = trimmed.find(['=', ' '])?;
    let key = trimmed[..sep].trim();
    let value = trimmed[sep..].trim_start_matches([' ', '=']).trim();
    if key.is_empty() {
        return None;
    }
    Some(ConfigLine {
        line_no,
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parses an entire config file into a flat list of lines, preserving
/// order (needed for multi-valued keys like `dataN`).
pub fn parse_lines(contents: &str) -> Vec<ConfigLine> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(i + 1, line))
        .collect()
}

/// Splits a flat line list into records, where a record starts at each
/// occurrence of `primary_key` (case-sensitive) and a blank source line
/// also ends the current record. Since blank lines are already dropped by
/// `parse_lines`, re-splitting on `primary_key` recurrences alone is
/// sufficient and matches `loadConfigFile`'s behaviour of treating a
/// repeated primary key as a fresh record.
pub fn split_records(lines: &[ConfigLine], primary_key: &str) -> Vec<Vec<ConfigLine>> {
    let mut records: Vec<Vec<ConfigLine>> = Vec::new();
    for line in lines {
        if line.key == primary_key {
            records.push(Vec::new());
        }
        if let Some(current) = records.last_mut() {
            current.push(line.clone());
        }
    }
    records
}

/// Convenience view over one record: first value per key, plus every value
/// for keys that may repeat (`dataN` disk quotas).
#[derive(Debug, Default)]
pub struct Record {
    first: HashMap<String, String>,
    all: HashMap<String, Vec<String>>,
}

impl Record {
    pub fn from_lines(lines: &[ConfigLine]) -> Self {
        let mut rec = Record::default();
        for line in lines {
            rec.first
                .entry(line.key.clone())
                .or_insert_with(|| line.value.clone());
            rec.all
                .entry(line.key.clone())
                .or_default()
                .push(line.value.clone());
        }
        rec
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.first.get(key).map(|s| s.as_str())
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.all.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some("1") => true,
            Some("0") => false,
            _ => default,
        }
    }

    /// Keys in this record not found in `known`, for the "unknown config
    /// key" warning (spec section 4.1).
    pub fn unknown_keys<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.first
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_equals_value_and_key_space_value() {
        let lines = parse_lines("node=alpha.example.org\nsite = siteA\n# comment\n\nbad");
        // "bad" has no '=' or ' ' so is skipped by parse_line (sep not found).
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].key, "node");
        assert_eq!(lines[0].value, "alpha.example.org");
        assert_eq!(lines[1].key, "site");
        assert_eq!(lines[1].value, "siteA");
    }

    #[test]
    fn trims_trailing_whitespace_and_comments() {
        let lines = parse_lines("path=/data/grid   # trailing comment\n");
        assert_eq!(lines[0].value, "/data/grid");
    }

    #[test]
    fn splits_records_on_repeated_primary_key() {
        let lines = parse_lines(
            "node=a\nsite=siteA\npath=/a\ntype=globus\ndata1=1000\n\
             node=b\nsite=siteB\npath=/b\ntype=srm\ndata1=2000\n",
        );
        let records = split_records(&lines, "node");
        assert_eq!(records.len(), 2);
        let rec_a = Record::from_lines(&records[0]);
        assert_eq!(rec_a.get("node"), Some("a"));
        assert_eq!(rec_a.get("site"), Some("siteA"));
        let rec_b = Record::from_lines(&records[1]);
        assert_eq!(rec_b.get("node"), Some("b"));
    }

    #[test]
    fn multi_valued_data_keys_are_all_kept() {
        let lines = parse_lines("node=a\ndata1=1000\ndata2=2000\ndata3=3000\n");
        let rec = Record::from_lines(&lines);
        assert_eq!(rec.get_all("data1"), ["1000"]);
        assert_eq!(rec.get_int("data2", 0), 2000);
    }

    #[test]
    fn unknown_keys_are_reported() {
        let lines = parse_lines("node=a\nsite=siteA\nbogus=1\n");
        let rec = Record::from_lines(&lines);
        let unknown = rec.unknown_keys(&["node", "site"]);
        assert_eq!(unknown, vec!["bogus"]);
    }
}
