//! Replica catalogue and attribute store (C3): the authoritative LFN to
//! {PFN} mapping plus per-LFN attributes (spec section 4.3).
//!
//! The original C/mysql implementation carried a static "current position"
//! for `firstLocation`/`nextLocation` iteration inside the catalogue
//! session; here reentrancy is safe because no iteration state lives on
//! `ReplicaCatalogue` itself — callers hold their own explicit iterator
//! (design note: "implicit iteration via static current position").

use std::collections::{BTreeMap, BTreeSet};

use crate::lfn::under_prefix;

/// A physical location: `node:path/to/file`.
pub type Pfn = String;

pub fn make_pfn(node: &str, path: &str) -> Pfn {
    format!("{node}:{path}")
}

/// Sentinel the original implementation returns for both "present but
/// empty" and "missing" attribute values. Open question in spec section 9:
/// implementers should refuse this as a real value. We do both — see
/// `set_attribute`.
pub const NULL_SENTINEL: &str = "(null)";

#[derive(Debug, Default)]
struct FileEntry {
    locations: BTreeSet<Pfn>,
    attributes: BTreeMap<String, String>,
}

/// In-memory replica catalogue. A production deployment backs this with a
/// database; the operations here are the authoritative contract regardless
/// of storage engine (spec section 4.3).
#[derive(Debug, Default)]
pub struct ReplicaCatalogue {
    files: BTreeMap<String, FileEntry>,
}

impl ReplicaCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_locations(&self, lfn: &str) -> BTreeSet<Pfn> {
        self.files
            .get(lfn)
            .map(|e| e.locations.clone())
            .unwrap_or_default()
    }

    /// Idempotent: adding a location already present is a no-op besides
    /// creating the LFN entry if this is its first location.
    pub fn add_location(&mut self, lfn: &str, pfn: impl Into<Pfn>) {
        self.files
            .entry(lfn.to_string())
            .or_default()
            .locations
            .insert(pfn.into());
    }

    /// Idempotent. When the last location is removed, attributes for the
    /// LFN are deleted in the same logical operation (spec invariant).
    pub fn remove_location(&mut self, lfn: &str, pfn: &str) {
        if let Some(entry) = self.files.get_mut(lfn) {
            entry.locations.remove(pfn);
            if entry.locations.is_empty() {
                self.files.remove(lfn);
            }
        }
    }

    /// Removes every location and every attribute for `lfn` (used by the
    /// `remove` command, spec section 4.7).
    pub fn remove_all(&mut self, lfn: &str) {
        self.files.remove(lfn);
    }

    pub fn is_known(&self, lfn: &str) -> bool {
        self.files
            .get(lfn)
            .map(|e| !e.locations.is_empty())
            .unwrap_or(false)
    }

    /// Returns the value for `(lfn, key)`, or the `"(null)"` sentinel if
    /// unset — present-but-empty and missing are indistinguishable by
    /// design (spec section 4.3, section 9 open question).
    pub fn get_attribute(&self, lfn: &str, key: &str) -> String {
        self.files
            .get(lfn)
            .and_then(|e| e.attributes.get(key))
            .cloned()
            .unwrap_or_else(|| NULL_SENTINEL.to_string())
    }

    /// Upsert. Rejects the sentinel value itself as a real attribute
    /// value, resolving the ambiguity the original left open (spec
    /// section 9: "implementers should either refuse... or switch to a
    /// true optional"; we refuse, since many call sites already treat the
    /// sentinel as "unset" and accepting it as data would silently break
    /// them).
    pub fn set_attribute(&mut self, lfn: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        debug_assert_ne!(
            value, NULL_SENTINEL,
            "refusing to store the unset-sentinel as a literal attribute value"
        );
        if value == NULL_SENTINEL {
            log::warn!("set_attribute({lfn}, {key}): refusing literal '(null)' value");
            return;
        }
        self.files
            .entry(lfn.to_string())
            .or_default()
            .attributes
            .insert(key.to_string(), value);
    }

    pub fn clear_attribute(&mut self, lfn: &str, key: &str) {
        if let Some(entry) = self.files.get_mut(lfn) {
            entry.attributes.remove(key);
        }
    }

    /// Iterates all LFNs whose path lives under `prefix`, stopping early
    /// if `callback` returns `false` (spec section 4.3: "continue/stop").
    pub fn for_each_file(&self, prefix: &str, mut callback: impl FnMut(&str) -> bool) {
        for lfn in self.files.keys() {
            if (under_prefix(lfn, prefix) || lfn == prefix) && !callback(lfn) {
                break;
            }
        }
    }

    /// Bulk query optimized for recursive commands: every LFN with `key`
    /// set, mapped to its value.
    pub fn get_all_attribute_values(&self, key: &str) -> BTreeMap<String, String> {
        self.files
            .iter()
            .filter_map(|(lfn, entry)| entry.attributes.get(key).map(|v| (lfn.clone(), v.clone())))
            .collect()
    }

    pub fn all_lfns(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    pub fn replica_count(&self, lfn: &str) -> usize {
        self.files.get(lfn).map(|e| e.locations.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_location_is_idempotent() {
        let mut cat = ReplicaCatalogue::new();
        cat.add_location("fruit/apple", make_pfn("n1", "/data/fruit/apple"));
        cat.add_location("fruit/apple", make_pfn("n1", "/data/fruit/apple"));
        assert_eq!(cat.get_locations("fruit/apple").len(), 1);
    }

    #[test]
    fn removing_last_location_drops_attributes() {
        let mut cat = ReplicaCatalogue::new();
        cat.add_location("f", make_pfn("n1", "/data/f"));
        cat.set_attribute("f", "size", "100");
        cat.remove_location("f", &make_pfn("n1", "/data/f"));
        assert!(!cat.is_known("f"));
        assert_eq!(cat.get_attribute("f", "size"), NULL_SENTINEL);
    }

    #[test]
    fn missing_and_unset_attribute_both_read_as_sentinel() {
        let mut cat = ReplicaCatalogue::new();
        cat.add_location("f", make_pfn("n1", "/data/f"));
        assert_eq!(cat.get_attribute("f", "lockedby"), NULL_SENTINEL);
        assert_eq!(cat.get_attribute("missing-lfn", "lockedby"), NULL_SENTINEL);
    }

    #[test]
    fn set_attribute_twice_is_single_set() {
        let mut cat = ReplicaCatalogue::new();
        cat.add_location("f", make_pfn("n1", "/data/f"));
        cat.set_attribute("f", "group", "ukqcd");
        cat.set_attribute("f", "group", "ukqcd");
        assert_eq!(cat.get_attribute("f", "group"), "ukqcd");
    }

    #[test]
    fn for_each_file_respects_directory_prefix_and_stop() {
        let mut cat = ReplicaCatalogue::new();
        for lfn in ["veg/kale", "veg/root/carrot", "veg/root/potato", "fruit/apple"] {
            cat.add_location(lfn, make_pfn("n1", lfn));
        }
        let mut seen = Vec::new();
        cat.for_each_file("veg", |lfn| {
            seen.push(lfn.to_string());
            true
        });
        seen.sort();
        assert_eq!(seen, vec!["veg/kale", "veg/root/carrot", "veg/root/potato"]);

        let mut count = 0;
        cat.for_each_file("veg", |_| {
            count += 1;
            count < 2
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn get_all_attribute_values_is_bulk_lookup() {
        let mut cat = ReplicaCatalogue::new();
        cat.add_location("a", make_pfn("n1", "a"));
        cat.add_location("b", make_pfn("n1", "b"));
        cat.set_attribute("a", "replcount", "2");
        cat.set_attribute("b", "replcount", "3");
        let all = cat.get_all_attribute_values("replcount");
        assert_eq!(all.get("a").map(String::as_str), Some("2"));
        assert_eq!(all.get("b").map(String::as_str), Some("3"));
    }
}
