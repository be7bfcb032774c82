use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

use crate::{
    engine::rules::{ActivityRule, RuleDraft},
    utils::clock::Clock,
};

/// Rule persistence per user. The matcher only ever reads; all mutation goes
/// through explicit create/update/delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    async fn list(&self, user_id: &str) -> Result<Vec<ActivityRule>>;

    /// Validates the draft and stores the resulting rule. Malformed drafts are
    /// rejected here, before storage, so the matcher never sees them.
    async fn create(&self, user_id: &str, draft: RuleDraft) -> Result<ActivityRule>;

    async fn update(&self, user_id: &str, id: u64, draft: RuleDraft) -> Result<ActivityRule>;

    async fn delete(&self, user_id: &str, id: u64) -> Result<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesDocument {
    next_id: u64,
    rules: Vec<ActivityRule>,
}

/// JSON-document realization of [RuleStore], one file per user.
pub struct RuleStoreImpl {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl RuleStoreImpl {
    pub fn new(dir: PathBuf, clock: Arc<dyn Clock>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, clock })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("rules-{user_id}.json"))
    }

    async fn with_document<T>(
        &self,
        user_id: &str,
        operation: impl FnOnce(&mut RulesDocument) -> Result<T>,
    ) -> Result<T> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_for(user_id))
            .await?;
        file.lock_exclusive()?;

        let result = Self::with_locked_document(file, operation).await;
        result
    }

    async fn with_locked_document<T>(
        mut file: File,
        operation: impl FnOnce(&mut RulesDocument) -> Result<T>,
    ) -> Result<T> {
        let mut content = String::new();
        file.read_to_string(&mut content).await?;
        let mut document: RulesDocument = if content.trim().is_empty() {
            RulesDocument {
                next_id: 1,
                rules: vec![],
            }
        } else {
            serde_json::from_str(&content)?
        };

        let result = operation(&mut document);

        if result.is_ok() {
            let serialized = serde_json::to_vec_pretty(&document)?;
            file.rewind().await?;
            file.set_len(0).await?;
            file.write_all(&serialized).await?;
            file.flush().await?;
        }

        file.unlock_async().await?;
        result
    }
}

#[async_trait]
impl RuleStore for RuleStoreImpl {
    async fn list(&self, user_id: &str) -> Result<Vec<ActivityRule>> {
        self.with_document(user_id, |document| Ok(document.rules.clone()))
            .await
    }

    async fn create(&self, user_id: &str, draft: RuleDraft) -> Result<ActivityRule> {
        let created_at = self.clock.time();
        self.with_document(user_id, move |document| {
            let rule = draft.validate(document.next_id, created_at)?;
            document.next_id += 1;
            document.rules.push(rule.clone());
            Ok(rule)
        })
        .await
    }

    async fn update(&self, user_id: &str, id: u64, draft: RuleDraft) -> Result<ActivityRule> {
        self.with_document(user_id, move |document| {
            let position = document
                .rules
                .iter()
                .position(|rule| rule.id == id)
                .ok_or_else(|| anyhow!("no rule with id {id}"))?;
            // Creation order survives an update, the matcher contract depends
            // on it.
            let created_at = document.rules[position].created_at;
            let rule = draft.validate(id, created_at)?;
            document.rules[position] = rule.clone();
            Ok(rule)
        })
        .await
    }

    async fn delete(&self, user_id: &str, id: u64) -> Result<bool> {
        self.with_document(user_id, move |document| {
            let before = document.rules.len();
            document.rules.retain(|rule| rule.id != id);
            Ok(document.rules.len() != before)
        })
        .await
    }
}
