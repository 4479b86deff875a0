//! Policy documents and the canonical policy-name-list parsing rules (§4.3,
//! §9 "Policy string").

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named, versioned Cedar policy source. A single document may hold more
/// than one statement; combining several documents means concatenating
/// their statements into one policy set (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDocument {
    pub name: String,
    /// Cedar policy source text — one or more `permit`/`forbid` statements.
    pub statement: String,
    /// Envelope version, currently always "1".
    pub version: String,
}

impl PolicyDocument {
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            version: "1".to_string(),
        }
    }
}

/// A parsed, de-duplicated, order-insensitive set of policy names, matching
/// the canonicalization rule in §9: split on commas, trim whitespace,
/// discard empties, set semantics throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyNameSet(BTreeSet<String>);

impl PolicyNameSet {
    pub fn parse(raw: &str) -> Self {
        let set = raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Self(set)
    }

    pub fn from_names<I: IntoIterator<Item = String>>(names: I) -> Self {
        Self(names.into_iter().filter(|n| !n.is_empty()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn insert(&mut self, name: String) {
        if !name.is_empty() {
            self.0.insert(name);
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.0.remove(name)
    }

    pub fn extend(&mut self, other: PolicyNameSet) {
        self.0.extend(other.0);
    }

    /// Canonical comma-joined representation, used for the on-disk
    /// `MappedPolicy` record.
    pub fn to_joined_string(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}
