use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use fs4::tokio::AsyncFileExt;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::warn;

use crate::engine::category::Category;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CategoryDocument {
    next_id: u64,
    categories: Vec<Category>,
    /// activity signature -> category id
    assignments: Vec<CategoryAssignment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAssignment {
    pub signature: Arc<str>,
    pub category_id: u64,
}

/// Stores the category forest plus the mapping from activity signatures to
/// categories. A signature is a domain for browser activity or the lowercased
/// application name otherwise.
pub struct CategoryStore {
    path: PathBuf,
}

impl CategoryStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("categories.json"),
        })
    }

    pub async fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.load().await?.categories)
    }

    pub async fn assignments(&self) -> Result<Vec<CategoryAssignment>> {
        Ok(self.load().await?.assignments)
    }

    pub async fn add_category(&self, name: &str, parent_id: Option<u64>) -> Result<Category> {
        if name.trim().is_empty() {
            return Err(anyhow!("category name must not be empty"));
        }
        self.with_document(move |document| {
            if let Some(parent) = parent_id {
                if !document.categories.iter().any(|c| c.id == parent) {
                    return Err(anyhow!("no category with id {parent}"));
                }
            }
            let category = Category {
                id: document.next_id,
                name: name.trim().into(),
                parent_id,
            };
            document.next_id += 1;
            document.categories.push(category.clone());
            Ok(category)
        })
        .await
    }

    /// Points an activity signature at a category, replacing any previous
    /// assignment for the same signature.
    pub async fn assign(&self, signature: &str, category_id: u64) -> Result<()> {
        let signature: Arc<str> = signature.to_lowercase().into();
        self.with_document(move |document| {
            if !document.categories.iter().any(|c| c.id == category_id) {
                return Err(anyhow!("no category with id {category_id}"));
            }
            document
                .assignments
                .retain(|assignment| assignment.signature != signature);
            document.assignments.push(CategoryAssignment {
                signature,
                category_id,
            });
            Ok(())
        })
        .await
    }

    async fn load(&self) -> Result<CategoryDocument> {
        let mut file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CategoryDocument {
                    next_id: 1,
                    ..Default::default()
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        read?;
        if content.trim().is_empty() {
            return Ok(CategoryDocument {
                next_id: 1,
                ..Default::default()
            });
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn with_document<T>(
        &self,
        operation: impl FnOnce(&mut CategoryDocument) -> Result<T>,
    ) -> Result<T> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        file.lock_exclusive()?;

        let mut content = String::new();
        file.read_to_string(&mut content).await?;
        let mut document: CategoryDocument = if content.trim().is_empty() {
            CategoryDocument {
                next_id: 1,
                ..Default::default()
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

/// Resolved lookup view over a loaded document. Reports use this to avoid
/// re-reading the file per interval.
pub struct CategoryIndex {
    categories: Vec<Category>,
    assignments: Vec<CategoryAssignment>,
}

impl CategoryIndex {
    pub fn new(categories: Vec<Category>, assignments: Vec<CategoryAssignment>) -> Self {
        Self {
            categories,
            assignments,
        }
    }

    pub async fn load(store: &CategoryStore) -> Result<Self> {
        let document = store.load().await?;
        Ok(Self::new(document.categories, document.assignments))
    }

    /// Root-to-leaf path for an activity signature. Empty when the signature
    /// has no assignment. Cycles (which only a corrupted document can contain)
    /// are cut instead of looping forever.
    pub fn path_for_signature(&self, signature: &str) -> Vec<Category> {
        let signature = signature.to_lowercase();
        let Some(assignment) = self
            .assignments
            .iter()
            .find(|assignment| assignment.signature.as_ref() == signature)
        else {
            return vec![];
        };
        self.path_for(assignment.category_id)
    }

    pub fn path_for(&self, category_id: u64) -> Vec<Category> {
        let mut path = vec![];
        let mut visited = HashSet::new();
        let mut current = Some(category_id);
        while let Some(id) = current {
            if !visited.insert(id) {
                warn!("Category {category_id} participates in a parent cycle");
                break;
            }
            let Some(category) = self.categories.iter().find(|c| c.id == id) else {
                break;
            };
            current = category.parent_id;
            path.push(category.clone());
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_category_paths_resolve_root_first() -> Result<()> {
        let dir = tempdir()?;
        let store = CategoryStore::new(dir.path().to_owned())?;

        let work = store.add_category("Work", None).await?;
        let coding = store.add_category("Coding", Some(work.id)).await?;
        store.assign("github.com", coding.id).await?;

        let index = CategoryIndex::load(&store).await?;
        let path = index.path_for_signature("GitHub.com");
        assert_eq!(
            path.iter().map(|c| c.name.as_ref()).collect::<Vec<_>>(),
            vec!["Work", "Coding"]
        );

        assert!(index.path_for_signature("unknown").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_assign_requires_existing_category() -> Result<()> {
        let dir = tempdir()?;
        let store = CategoryStore::new(dir.path().to_owned())?;
        assert!(store.assign("github.com", 99).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_reassign_replaces_previous_assignment() -> Result<()> {
        let dir = tempdir()?;
        let store = CategoryStore::new(dir.path().to_owned())?;
        let work = store.add_category("Work", None).await?;
        let play = store.add_category("Play", None).await?;

        store.assign("youtube.com", work.id).await?;
        store.assign("youtube.com", play.id).await?;

        let assignments = store.assignments().await?;
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].category_id, play.id);
        Ok(())
    }

    #[test]
    fn test_cycle_in_parents_is_cut() {
        let index = CategoryIndex::new(
            vec![
                Category {
                    id: 1,
                    name: "a".into(),
                    parent_id: Some(2),
                },
                Category {
                    id: 2,
                    name: "b".into(),
                    parent_id: Some(1),
                },
            ],
            vec![],
        );
        let path = index.path_for(1);
        assert_eq!(path.len(), 2);
    }
}
