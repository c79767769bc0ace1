use std::fmt;

/// Ordered list of upstream API keys eligible for a request.
///
/// Parsed from a comma-separated source string. Order is significant: it
/// defines rotation order and is stable across requests carrying the same
/// underlying string. Duplicates are allowed. Never empty — `parse` returns
/// `None` instead of an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList {
    keys: Vec<String>,
}

impl KeyList {
    /// Split `source` on commas, trim whitespace, drop empty entries.
    pub fn parse(source: &str) -> Option<KeyList> {
        let keys = source
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        if keys.is_empty() {
            None
        } else {
            Some(KeyList { keys })
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `index`. Callers index modulo `len()`, so this never sees an
    /// out-of-bounds position.
    pub fn key(&self, index: usize) -> &str {
        &self.keys[index]
    }

    /// Stable, order-sensitive content digest identifying this list.
    ///
    /// Two requests presenting byte-identical key lists map to the same
    /// identity; differing order or content produces a different one. The
    /// rotation map is keyed by this digest so raw key material is never
    /// retained as a map key.
    pub fn identity(&self) -> ListIdentity {
        ListIdentity(*blake3::hash(self.keys.join(",").as_bytes()).as_bytes())
    }
}

/// Fixed-size digest identifying a [`KeyList`] for rotation-state lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListIdentity([u8; 32]);

impl fmt::Display for ListIdentity {
    /// Short hex prefix, enough to correlate log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ListIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListIdentity({self})")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn keys_of(list: &KeyList) -> Vec<&str> {
        (0..list.len()).map(|i| list.key(i)).collect()
    }

    #[test]
    fn parse_trims_and_drops_empty_entries() {
        let list = KeyList::parse(" k1 , ,k2,, k3 ").expect("three keys survive");
        assert_eq!(keys_of(&list), vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn parse_preserves_order_and_duplicates() {
        let list = KeyList::parse("b,a,b").expect("parse");
        assert_eq!(keys_of(&list), vec!["b", "a", "b"]);
    }

    #[test]
    fn parse_rejects_sources_with_no_usable_keys() {
        assert_eq!(KeyList::parse(""), None);
        assert_eq!(KeyList::parse(" , , "), None);
    }

    #[test]
    fn identity_is_deterministic() {
        let a = KeyList::parse("a,b").expect("parse");
        let b = KeyList::parse("a,b").expect("parse");
        assert_eq!(a.identity(), b.identity());
        // Whitespace differences disappear during parsing.
        let c = KeyList::parse(" a , b ").expect("parse");
        assert_eq!(a.identity(), c.identity());
    }

    #[test]
    fn identity_is_order_sensitive() {
        let ab = KeyList::parse("a,b").expect("parse");
        let ba = KeyList::parse("b,a").expect("parse");
        assert_ne!(ab.identity(), ba.identity());
    }

    #[test]
    fn identity_differs_for_different_content() {
        let a = KeyList::parse("a").expect("parse");
        let b = KeyList::parse("b").expect("parse");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn identity_display_is_a_short_hex_prefix() {
        let id = KeyList::parse("a,b").expect("parse").identity();
        let shown = id.to_string();
        assert_eq!(shown.len(), 8);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
