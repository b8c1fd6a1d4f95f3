//! Capacity Guard
//!
//! Answers whether seats may still be reserved on a class by comparing
//! committed registrations against the class capacity. Attempt creation
//! performs an optimistic check here; it is not a hard reservation. Seats
//! are not pre-held during PENDING attempts, so the reconciliation engine
//! re-validates at the final registration insert.

use std::sync::Arc;

use uuid::Uuid;

use classpay_core::{ClassCatalog, ClassSummary, EngineError, RegistrationStore, Result};

/// Seat-limit check against a class
#[derive(Clone)]
pub struct CapacityGuard {
    catalog: Arc<dyn ClassCatalog>,
    registrations: Arc<dyn RegistrationStore>,
}

impl CapacityGuard {
    pub fn new(catalog: Arc<dyn ClassCatalog>, registrations: Arc<dyn RegistrationStore>) -> Self {
        Self {
            catalog,
            registrations,
        }
    }

    /// Seats still open on a class
    pub async fn remaining_seats(&self, class_id: Uuid) -> Result<u32> {
        let class = self
            .catalog
            .find_class(class_id)
            .await?
            .ok_or(EngineError::ClassNotFound(class_id))?;
        self.remaining_for(&class).await
    }

    /// Seats still open, with the class summary already in hand
    pub async fn remaining_for(&self, class: &ClassSummary) -> Result<u32> {
        let committed = self.registrations.count_for_class(class.id).await?;
        Ok(class.capacity.saturating_sub(committed))
    }

    /// Whether one more seat may be reserved
    pub async fn can_reserve(&self, class_id: Uuid) -> Result<bool> {
        Ok(self.remaining_seats(class_id).await? >= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use classpay_core::{MemoryClassCatalog, MemoryRegistrationStore, Registration};

    fn class(capacity: u32) -> ClassSummary {
        ClassSummary {
            id: Uuid::new_v4(),
            title: "Robotics 101".into(),
            capacity,
            price_cents: 150_000,
            published: true,
            starts_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_remaining_seats_tracks_registrations() {
        let catalog = Arc::new(MemoryClassCatalog::new());
        let registrations = Arc::new(MemoryRegistrationStore::new());
        let guard = CapacityGuard::new(catalog.clone(), registrations.clone());

        let class = class(2);
        catalog.insert(class.clone());

        assert_eq!(guard.remaining_seats(class.id).await.unwrap(), 2);
        assert!(guard.can_reserve(class.id).await.unwrap());

        for _ in 0..2 {
            let reg = Registration::from_attempt(
                class.id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
            );
            registrations.create_within_capacity(reg, 2).await.unwrap();
        }

        assert_eq!(guard.remaining_seats(class.id).await.unwrap(), 0);
        assert!(!guard.can_reserve(class.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_class_errors() {
        let guard = CapacityGuard::new(
            Arc::new(MemoryClassCatalog::new()),
            Arc::new(MemoryRegistrationStore::new()),
        );
        let err = guard.remaining_seats(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::ClassNotFound(_)));
    }
}
