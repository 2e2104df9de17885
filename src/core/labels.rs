use crate::common::error::RollcallError;
use crate::core::lbph::Label;
use std::collections::{BTreeMap, HashMap};

/// Bijective label <-> identity table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    by_label: BTreeMap<Label, String>,
    by_identity: HashMap<String, Label>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }

    /// Insert a pair. Fails (returning false) when either side is already
    /// mapped, so the table stays bijective.
    pub fn insert(&mut self, label: Label, identity: &str) -> bool {
        if self.by_label.contains_key(&label) || self.by_identity.contains_key(identity) {
            return false;
        }
        self.by_label.insert(label, identity.to_string());
        self.by_identity.insert(identity.to_string(), label);
        true
    }

    pub fn remove_identity(&mut self, identity: &str) -> Option<Label> {
        let label = self.by_identity.remove(identity)?;
        self.by_label.remove(&label);
        Some(label)
    }

    pub fn identity(&self, label: Label) -> Option<&str> {
        self.by_label.get(&label).map(String::as_str)
    }

    pub fn label(&self, identity: &str) -> Option<Label> {
        self.by_identity.get(identity).copied()
    }

    /// Pairs in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, &str)> {
        self.by_label.iter().map(|(l, id)| (*l, id.as_str()))
    }

    pub fn max_label(&self) -> Option<Label> {
        self.by_label.keys().next_back().copied()
    }

    /// One `<label>,<identity>` line per entry, no header.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for (label, identity) in self.iter() {
            out.push_str(&format!("{},{}\n", label, identity));
        }
        out
    }

    /// Parse the line format written by [`LabelMap::to_lines`]. Malformed or
    /// conflicting rows are skipped and reported; the rest still load.
    pub fn parse_lines(text: &str) -> (Self, Vec<RollcallError>) {
        let mut map = Self::new();
        let mut skipped = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let corrupt = || RollcallError::LabelMappingCorruption {
                line: idx + 1,
                content: raw.to_string(),
            };

            let Some((label, identity)) = line.split_once(',') else {
                skipped.push(corrupt());
                continue;
            };
            let identity = identity.trim();
            match label.trim().parse::<Label>() {
                Ok(label) if !identity.is_empty() && map.insert(label, identity) => {}
                _ => skipped.push(corrupt()),
            }
        }

        (map, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_bijection() {
        let mut map = LabelMap::new();
        assert!(map.insert(0, "ada"));
        assert!(map.insert(1, "grace"));
        assert!(!map.insert(1, "linus"));
        assert!(!map.insert(2, "ada"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.identity(1), Some("grace"));
        assert_eq!(map.label("ada"), Some(0));
    }

    #[test]
    fn remove_identity_drops_both_directions() {
        let mut map = LabelMap::new();
        map.insert(0, "ada");
        map.insert(1, "grace");
        assert_eq!(map.remove_identity("ada"), Some(0));
        assert_eq!(map.identity(0), None);
        assert_eq!(map.label("ada"), None);
        assert_eq!(map.remove_identity("ada"), None);
        assert_eq!(map.max_label(), Some(1));
    }

    #[test]
    fn lines_round_trip() {
        let mut map = LabelMap::new();
        map.insert(3, "grace hopper");
        map.insert(0, "ada");
        let text = map.to_lines();
        assert_eq!(text, "0,ada\n3,grace hopper\n");
        let (parsed, skipped) = LabelMap::parse_lines(&text);
        assert!(skipped.is_empty());
        assert_eq!(parsed, map);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let text = "0,ada\nnot a row\nx,bob\n1, grace  \n\n2,\n1,dup\n3,ada\n4,linus,extra\n";
        let (map, skipped) = LabelMap::parse_lines(text);

        assert_eq!(map.identity(0), Some("ada"));
        assert_eq!(map.identity(1), Some("grace"));
        // identity keeps everything after the first comma
        assert_eq!(map.identity(4), Some("linus,extra"));
        assert_eq!(map.len(), 3);

        let lines: Vec<usize> = skipped
            .iter()
            .map(|e| match e {
                RollcallError::LabelMappingCorruption { line, .. } => *line,
                other => panic!("unexpected error {other:?}"),
            })
            .collect();
        assert_eq!(lines, vec![2, 3, 6, 7, 8]);
    }

    #[test]
    fn windows_line_endings_are_trimmed() {
        let (map, skipped) = LabelMap::parse_lines("0,ada\r\n1,grace\r\n");
        assert!(skipped.is_empty());
        assert_eq!(map.identity(1), Some("grace"));
    }
}
