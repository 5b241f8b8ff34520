//! Hard-block overrides supplied by collaborator systems. Any block forces LOCK.

use crate::config::HardBlockConfig;
use crate::error::{PatrolError, Result};
use crate::features::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HardBlock {
    /// Transaction identifier is on the deny list.
    DeniedTransaction,
    /// Owning account is on the deny list.
    DeniedAccount { account_id: String },
    /// Account already flagged by another system.
    AccountFlagged { account_id: String },
    External { source: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    blocks: Vec<HardBlock>,
}

impl Overrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: HardBlock) {
        if !self.blocks.contains(&block) {
            self.blocks.push(block);
        }
    }

    pub fn merge(&mut self, other: Overrides) {
        for block in other.blocks {
            self.push(block);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[HardBlock] {
        &self.blocks
    }
}

impl From<Vec<HardBlock>> for Overrides {
    fn from(blocks: Vec<HardBlock>) -> Self {
        let mut o = Overrides::none();
        for b in blocks {
            o.push(b);
        }
        o
    }
}

/// Looks up standing overrides for a transaction and its account.
pub trait OverrideSource: Send + Sync {
    fn lookup(&self, transaction_id: &TransactionId, account_id: Option<&str>) -> Overrides;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DenyList {
    transactions: HashSet<String>,
    accounts: HashSet<String>,
}

impl DenyList {
    pub fn new(
        transactions: impl IntoIterator<Item = String>,
        accounts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            transactions: transactions.into_iter().collect(),
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Inline lists plus the optional JSON file, unioned.
    pub fn from_config(config: &HardBlockConfig) -> Result<Self> {
        let mut list = Self::new(config.transactions.clone(), config.accounts.clone());
        if let Some(path) = &config.path {
            let data = std::fs::read_to_string(path)
                .map_err(|e| PatrolError::Config(format!("read deny list {}: {}", path.display(), e)))?;
            let file: DenyList = serde_json::from_str(&data)
                .map_err(|e| PatrolError::Config(format!("parse deny list {}: {}", path.display(), e)))?;
            list.transactions.extend(file.transactions);
            list.accounts.extend(file.accounts);
        }
        tracing::info!(
            transactions = list.transactions.len(),
            accounts = list.accounts.len(),
            "deny list loaded"
        );
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.transactions.len() + self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OverrideSource for DenyList {
    fn lookup(&self, transaction_id: &TransactionId, account_id: Option<&str>) -> Overrides {
        let mut o = Overrides::none();
        if self.transactions.contains(transaction_id.as_str()) {
            o.push(HardBlock::DeniedTransaction);
        }
        if let Some(account) = account_id.filter(|a| self.accounts.contains(*a)) {
            o.push(HardBlock::DeniedAccount {
                account_id: account.to_string(),
            });
        }
        o
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TransactionId {
        TransactionId::new(s).unwrap()
    }

    #[test]
    fn deny_list_matches_transaction_and_account() {
        let list = DenyList::new(vec!["t-bad".to_string()], vec!["acct-bad".to_string()]);
        assert!(list.lookup(&id("t-ok"), Some("acct-ok")).is_empty());
        assert_eq!(
            list.lookup(&id("t-bad"), None).blocks(),
            &[HardBlock::DeniedTransaction]
        );
        let both = list.lookup(&id("t-bad"), Some("acct-bad"));
        assert_eq!(both.blocks().len(), 2);
    }

    #[test]
    fn merge_deduplicates() {
        let mut a = Overrides::from(vec![HardBlock::DeniedTransaction]);
        a.merge(Overrides::from(vec![
            HardBlock::DeniedTransaction,
            HardBlock::AccountFlagged {
                account_id: "u".into(),
            },
        ]));
        assert_eq!(a.blocks().len(), 2);
    }

    #[test]
    fn file_and_inline_lists_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deny.json");
        std::fs::write(&path, r#"{"transactions": ["t-file"], "accounts": ["a-file"]}"#).unwrap();
        let config = HardBlockConfig {
            path: Some(path),
            transactions: vec!["t-inline".into()],
            accounts: vec![],
        };
        let list = DenyList::from_config(&config).unwrap();
        assert_eq!(list.len(), 3);
        assert!(!list.lookup(&id("t-file"), None).is_empty());
        assert!(!list.lookup(&id("t-inline"), None).is_empty());
        assert!(!list.lookup(&id("x"), Some("a-file")).is_empty());
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let config = HardBlockConfig {
            path: Some("nonexistent-deny.json".into()),
            ..HardBlockConfig::default()
        };
        assert!(matches!(DenyList::from_config(&config), Err(PatrolError::Config(_))));
    }
}
