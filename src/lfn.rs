//! Logical file name validation and DIR-encoding.
//!
//! DIR-encoding flattens a slash-separated LFN into the single-file name
//! used inside an SE's inbox: `a/b/c.txt` <-> `a-DIR-b-DIR-c.txt`. The
//! token `-DIR-` must never occur in a legal path component; this is
//! enforced at put time (spec section 3, section 6).

use crate::error::DigsError;

pub const DIR_TOKEN: &str = "-DIR-";

/// Validates that `lfn` is legal: non-empty, no leading/trailing slash,
/// no empty components, and no component containing the DIR token.
pub fn validate_lfn(lfn: &str) -> Result<(), DigsError> {
    if lfn.is_empty() {
        return Err(DigsError::invariant("empty LFN"));
    }
    if lfn.starts_with('/') || lfn.ends_with('/') {
        return Err(DigsError::invariant(format!(
            "LFN '{lfn}' must not start or end with '/'"
        )));
    }
    if lfn.contains(DIR_TOKEN) {
        return Err(DigsError::invariant(format!(
            "LFN '{lfn}' contains reserved token '{DIR_TOKEN}'"
        )));
    }
    for component in lfn.split('/') {
        if component.is_empty() {
            return Err(DigsError::invariant(format!(
                "LFN '{lfn}' has an empty path component"
            )));
        }
    }
    Ok(())
}

/// Encodes a validated LFN into its inbox staged name.
pub fn encode(lfn: &str) -> Result<String, DigsError> {
    validate_lfn(lfn)?;
    Ok(lfn.replace('/', DIR_TOKEN))
}

/// Decodes an inbox staged name back into an LFN.
pub fn decode(staged_name: &str) -> String {
    staged_name.replace(DIR_TOKEN, "/")
}

/// True if `lfn` lives directly under (or equal to) `prefix` as a
/// directory, for `forEachFile`-style prefix queries (spec section 4.3).
pub fn under_prefix(lfn: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let dir_prefix = format!("{}/", prefix.trim_end_matches('/'));
    lfn.starts_with(&dir_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let lfn = "a/b/c.txt";
        let staged = encode(lfn).unwrap();
        assert_eq!(staged, "a-DIR-b-DIR-c.txt");
        assert_eq!(decode(&staged), lfn);
    }

    #[test]
    fn rejects_reserved_token_in_lfn() {
        assert!(validate_lfn("a-DIR-b").is_err());
    }

    #[test]
    fn rejects_empty_and_slash_bound_lfns() {
        assert!(validate_lfn("").is_err());
        assert!(validate_lfn("/a/b").is_err());
        assert!(validate_lfn("a/b/").is_err());
        assert!(validate_lfn("a//b").is_err());
    }

    #[test]
    fn prefix_matching_is_directory_scoped() {
        assert!(under_prefix("veg/kale", "veg"));
        assert!(under_prefix("veg/root/carrot", "veg"));
        assert!(!under_prefix("vegetable/kale", "veg"));
        assert!(under_prefix("anything", ""));
    }
}
