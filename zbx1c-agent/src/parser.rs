//! Record parser for rac's `key : value` block output
//!
//! rac prints one block per object, one `key : value` line per field, and a
//! blank line between blocks. Values are kept verbatim (quotes included);
//! typed interpretation happens in [`crate::records`].

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One parsed block: ordered fields, keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value among `keys`, in the order given.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.get(key))
            .find(|value| !value.is_empty())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (key, value) in iter {
            record.push(key, value);
        }
        record
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Repeated keys: the first occurrence is the one `get` sees
        let mut seen: Vec<&str> = Vec::with_capacity(self.fields.len());
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in &self.fields {
            if seen.contains(&key.as_str()) {
                continue;
            }
            seen.push(key);
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Split decoded rac output into records.
pub fn parse(text: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut current = RawRecord::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        current.push(key, value.trim());
    }

    if !current.is_empty() {
        records.push(current);
    }
    records
}
