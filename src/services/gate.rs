use crate::core::{AdmissionPolicy, AdmissionSet, GroupingCache, ScopeInfo};
use crate::services::gateway::{Gateway, GatewayError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Scope {scope_id} could not be resolved")]
    LookupFailed { scope_id: u64 },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Admission rules plus the scope layout needed to evaluate them.
pub struct AdmissionGate {
    rules: RwLock<AdmissionSet>,
    policy: Arc<dyn AdmissionPolicy>,
    groupings: RwLock<GroupingCache>,
    gateway: Arc<dyn Gateway>,
}

impl AdmissionGate {
    pub fn new(policy: Arc<dyn AdmissionPolicy>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            rules: RwLock::new(AdmissionSet::new()),
            policy,
            groupings: RwLock::new(GroupingCache::new()),
            gateway,
        }
    }

    pub async fn replace_rules(&self, rules: AdmissionSet) {
        *self.rules.write().await = rules;
    }

    pub async fn rules(&self) -> AdmissionSet {
        self.rules.read().await.clone()
    }

    /// Add a rule. Returns the updated set when it changed.
    pub async fn add_rule(&self, rule: &str) -> Option<AdmissionSet> {
        let mut rules = self.rules.write().await;
        rules.add(rule).then(|| rules.clone())
    }

    /// Remove a rule. Returns the updated set when it changed.
    pub async fn remove_rule(&self, rule: &str) -> Option<AdmissionSet> {
        let mut rules = self.rules.write().await;
        rules.remove(rule).then(|| rules.clone())
    }

    /// Pull the full scope layout from the gateway into the cache.
    pub async fn refresh(&self) -> Result<usize, AdmissionError> {
        let scopes = self.gateway.scopes().await?;
        let added = self.groupings.write().await.extend(scopes);
        log::debug!("Grouping cache refreshed, {} new scope(s)", added);
        Ok(added)
    }

    /// Cached scope lookup, refreshing once on a miss.
    pub async fn scope_info(&self, scope_id: u64) -> Result<ScopeInfo, AdmissionError> {
        if let Some(info) = self.groupings.read().await.get(scope_id) {
            return Ok(info.clone());
        }

        self.refresh().await?;
        self.groupings
            .read()
            .await
            .get(scope_id)
            .cloned()
            .ok_or(AdmissionError::LookupFailed { scope_id })
    }

    /// Whether items posted in `scope_id` take part in duplicate detection.
    ///
    /// A direct rule match needs no layout lookup; otherwise the scope's
    /// parent grouping is resolved and checked as well.
    pub async fn admits(&self, scope_id: u64) -> Result<bool, AdmissionError> {
        {
            let rules = self.rules.read().await;
            if rules.is_empty() {
                return Ok(false);
            }
            if rules.admits_directly(self.policy.as_ref(), scope_id) {
                return Ok(true);
            }
        }

        let info = self.scope_info(scope_id).await?;
        let rules = self.rules.read().await;
        Ok(rules.admits(self.policy.as_ref(), scope_id, info.parent_id))
    }

    /// Scope named `name` inside `grouping_id`, from the cache only.
    pub async fn find_in_grouping(&self, grouping_id: u64, name: &str) -> Option<ScopeInfo> {
        self.groupings
            .read()
            .await
            .find_in_grouping(grouping_id, name)
            .cloned()
    }
}
