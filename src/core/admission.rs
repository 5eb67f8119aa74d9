use serde::{Deserialize, Serialize};

/// Decides whether a rule key covers a scope or grouping id.
pub trait AdmissionPolicy: Send + Sync {
    fn object_ok(&self, rule_key: &str, object_id: u64) -> bool;
}

/// Rule keys are plain decimal ids and match only that id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactIdPolicy;

impl AdmissionPolicy for ExactIdPolicy {
    fn object_ok(&self, rule_key: &str, object_id: u64) -> bool {
        rule_key.trim().parse::<u64>() == Ok(object_id)
    }
}

/// Rule keys naming the scopes (or parent groupings) that take part in
/// duplicate detection. Stored as one key per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSet {
    rules: Vec<String>,
}

impl AdmissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: &str) -> Self {
        let mut set = Self::new();
        for line in text.lines() {
            set.add(line);
        }
        set
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for rule in &self.rules {
            text.push_str(rule);
            text.push('\n');
        }
        text
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns `false` for blank or already-present keys.
    pub fn add(&mut self, rule: &str) -> bool {
        let rule = rule.trim();
        if rule.is_empty() || self.rules.iter().any(|r| r == rule) {
            return false;
        }
        self.rules.push(rule.to_string());
        true
    }

    pub fn remove(&mut self, rule: &str) -> bool {
        let rule = rule.trim();
        let before = self.rules.len();
        self.rules.retain(|r| r != rule);
        self.rules.len() != before
    }

    /// A scope is admitted when any rule matches it or its parent grouping.
    pub fn admits(
        &self,
        policy: &dyn AdmissionPolicy,
        scope_id: u64,
        parent_id: Option<u64>,
    ) -> bool {
        self.rules.iter().any(|rule| {
            policy.object_ok(rule, scope_id)
                || parent_id.is_some_and(|parent| policy.object_ok(rule, parent))
        })
    }

    /// Like [`admits`](Self::admits) but only considers the scope itself.
    pub fn admits_directly(&self, policy: &dyn AdmissionPolicy, scope_id: u64) -> bool {
        self.admits(policy, scope_id, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip_ignores_blanks_and_duplicates() {
        let set = AdmissionSet::from_text("100\n\n200\n100\n  300  \n");
        assert_eq!(set.rules(), ["100", "200", "300"]);
        assert_eq!(set.to_text(), "100\n200\n300\n");
    }

    #[test]
    fn test_add_and_remove() {
        let mut set = AdmissionSet::new();
        assert!(set.add("5"));
        assert!(!set.add("5"));
        assert!(!set.add("   "));
        assert!(set.remove("5"));
        assert!(!set.remove("5"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_admits_scope_or_parent() {
        let set = AdmissionSet::from_text("10\n20\n");
        let policy = ExactIdPolicy;
        assert!(set.admits(&policy, 10, None));
        assert!(set.admits(&policy, 99, Some(20)));
        assert!(!set.admits(&policy, 99, Some(98)));
        assert!(!set.admits(&policy, 99, None));
        assert!(!set.admits_directly(&policy, 21));
    }

    #[test]
    fn test_exact_policy_rejects_non_numeric_keys() {
        assert!(!ExactIdPolicy.object_ok("general", 1));
        assert!(ExactIdPolicy.object_ok(" 42 ", 42));
    }
}
