//! Class Catalog
//!
//! Collaborator interface for class content. The engine only needs to know
//! whether a class exists, is published, how many seats it has, and when it
//! starts - class CRUD lives elsewhere.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// The slice of a class the payment engine cares about
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassSummary {
    pub id: Uuid,
    pub title: String,
    pub capacity: u32,
    pub price_cents: i64,
    pub published: bool,
    pub starts_at: DateTime<Utc>,
}

/// Class catalog collaborator
#[async_trait]
pub trait ClassCatalog: Send + Sync {
    /// Look up a class by id, published or not
    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassSummary>>;

    /// Look up a class that is published, None otherwise
    async fn published_class(&self, class_id: Uuid) -> Result<Option<ClassSummary>> {
        Ok(self
            .find_class(class_id)
            .await?
            .filter(|class| class.published))
    }
}

/// In-memory catalog (for development and tests)
pub struct MemoryClassCatalog {
    classes: RwLock<HashMap<Uuid, ClassSummary>>,
}

impl Default for MemoryClassCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClassCatalog {
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, class: ClassSummary) {
        self.classes.write().unwrap().insert(class.id, class);
    }
}

#[async_trait]
impl ClassCatalog for MemoryClassCatalog {
    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassSummary>> {
        Ok(self.classes.read().unwrap().get(&class_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn class(published: bool) -> ClassSummary {
        ClassSummary {
            id: Uuid::new_v4(),
            title: "Robotics 101".into(),
            capacity: 12,
            price_cents: 150_000,
            published,
            starts_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_published_class_filters_drafts() {
        let catalog = MemoryClassCatalog::new();
        let draft = class(false);
        let live = class(true);
        catalog.insert(draft.clone());
        catalog.insert(live.clone());

        assert!(catalog.published_class(draft.id).await.unwrap().is_none());
        assert!(catalog.published_class(live.id).await.unwrap().is_some());
        assert!(catalog.find_class(draft.id).await.unwrap().is_some());
    }
}
