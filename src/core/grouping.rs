use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scope (channel) as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub scope_id: u64,
    /// Parent grouping (category), if the scope has one.
    pub parent_id: Option<u64>,
    /// Top-level container (community) the scope lives in.
    pub container_id: u64,
    pub name: String,
}

/// Append-only memo of scope layout.
///
/// Entries are never invalidated: groupings are treated as fixed for the
/// lifetime of the process. A scope moved to another grouping keeps its old
/// parent here until restart.
#[derive(Debug, Default)]
pub struct GroupingCache {
    scopes: HashMap<u64, ScopeInfo>,
}

impl GroupingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope_id: u64) -> Option<&ScopeInfo> {
        self.scopes.get(&scope_id)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Add scopes not seen before. Returns how many were new.
    pub fn extend<I>(&mut self, scopes: I) -> usize
    where
        I: IntoIterator<Item = ScopeInfo>,
    {
        let mut added = 0;
        for scope in scopes {
            if !self.scopes.contains_key(&scope.scope_id) {
                self.scopes.insert(scope.scope_id, scope);
                added += 1;
            }
        }
        added
    }

    /// Find the scope called `name` inside `grouping_id`.
    pub fn find_in_grouping(&self, grouping_id: u64, name: &str) -> Option<&ScopeInfo> {
        let mut candidates: Vec<&ScopeInfo> = self
            .scopes
            .values()
            .filter(|s| s.parent_id == Some(grouping_id) && s.name == name)
            .collect();
        candidates.sort_by_key(|s| s.scope_id);
        candidates.into_iter().next()
    }
}
