use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_IGNORED_RULES: &[&str] =
    &["org.apache.calcite.rel.rules.custom.BestMatchNullifyPullUpRule"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPair {
    pub origin: String,
    pub first: String,
    pub second: String,
}

impl QueryPair {
    #[must_use]
    pub fn new(
        origin: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            first: first.into(),
            second: second.into(),
        }
    }

    #[must_use]
    pub fn has_origin(&self) -> bool {
        !self.origin.is_empty()
    }
}

/// Pairs in first-seen order. Re-inserting an existing pair keeps its slot and
/// replaces the description (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPairs {
    entries: Vec<(QueryPair, String)>,
    index: HashMap<QueryPair, usize>,
    overwritten: usize,
    ignored: usize,
}

impl ParsedPairs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the description that was replaced, if the pair was already present.
    pub fn insert(&mut self, pair: QueryPair, description: String) -> Option<String> {
        if let Some(&slot) = self.index.get(&pair) {
            self.overwritten += 1;
            let previous = std::mem::replace(&mut self.entries[slot].1, description);
            return Some(previous);
        }

        self.index.insert(pair.clone(), self.entries.len());
        self.entries.push((pair, description));
        None
    }

    pub fn record_ignored(&mut self) {
        self.ignored += 1;
    }

    #[must_use]
    pub fn get(&self, pair: &QueryPair) -> Option<&str> {
        self.index
            .get(pair)
            .map(|&slot| self.entries[slot].1.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueryPair, &str)> {
        self.entries
            .iter()
            .map(|(pair, description)| (pair, description.as_str()))
    }

    #[must_use]
    pub fn entries(&self) -> &[(QueryPair, String)] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }

    #[must_use]
    pub fn ignored(&self) -> usize {
        self.ignored
    }
}

/// Rule names whose pairs are never verified. Parsed descriptions carry the
/// trailing newline of their last line, which is not part of the rule name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSet {
    rules: BTreeSet<String>,
}

impl IgnoreSet {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: BTreeSet::new(),
        }
    }

    pub fn from_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, description: &str) -> bool {
        let key = description
            .strip_suffix('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .unwrap_or(description);
        self.rules.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::from_rules(DEFAULT_IGNORED_RULES.iter().copied())
    }
}
