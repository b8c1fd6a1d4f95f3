//! Party Directory
//!
//! Collaborator interface for Parent and Student records. Both lookups are
//! find-or-create, which keeps the reconciliation engine idempotent under
//! retry: a second reconciliation for the same email and student names
//! resolves to the same records instead of creating duplicates.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::attempt::StudentDescriptor;
use crate::error::Result;
use crate::registration::{Parent, Student};

/// Parent identity fields carried on an attempt
#[derive(Clone, Debug)]
pub struct ParentProfile {
    pub name: String,
    pub phone: Option<String>,
    pub city: Option<String>,
}

/// Parent/Student directory collaborator
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Find a parent by email or create one from the profile
    async fn find_or_create_parent(&self, email: &str, profile: &ParentProfile) -> Result<Parent>;

    /// Find a student by (parent, name) or create one from the descriptor
    async fn find_or_create_student(
        &self,
        parent_id: Uuid,
        descriptor: &StudentDescriptor,
    ) -> Result<Student>;

    /// Look up a parent by id (used by the reminder sweep)
    async fn find_parent(&self, parent_id: Uuid) -> Result<Option<Parent>>;
}

/// In-memory directory (for development and tests)
pub struct MemoryPartyDirectory {
    parents: RwLock<HashMap<Uuid, Parent>>,
    parents_by_email: RwLock<HashMap<String, Uuid>>,
    students: RwLock<HashMap<(Uuid, String), Student>>,
}

impl Default for MemoryPartyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPartyDirectory {
    pub fn new() -> Self {
        Self {
            parents: RwLock::new(HashMap::new()),
            parents_by_email: RwLock::new(HashMap::new()),
            students: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PartyDirectory for MemoryPartyDirectory {
    async fn find_or_create_parent(&self, email: &str, profile: &ParentProfile) -> Result<Parent> {
        let key = email.to_lowercase();
        let mut by_email = self.parents_by_email.write().unwrap();
        let mut parents = self.parents.write().unwrap();

        if let Some(id) = by_email.get(&key) {
            if let Some(parent) = parents.get(id) {
                return Ok(parent.clone());
            }
        }

        let parent = Parent {
            id: Uuid::new_v4(),
            name: profile.name.clone(),
            email: key.clone(),
            phone: profile.phone.clone(),
            city: profile.city.clone(),
            created_at: Utc::now(),
        };
        by_email.insert(key, parent.id);
        parents.insert(parent.id, parent.clone());
        Ok(parent)
    }

    async fn find_or_create_student(
        &self,
        parent_id: Uuid,
        descriptor: &StudentDescriptor,
    ) -> Result<Student> {
        let key = (parent_id, descriptor.name.to_lowercase());
        let mut students = self.students.write().unwrap();

        if let Some(student) = students.get(&key) {
            return Ok(student.clone());
        }

        let student = Student {
            id: Uuid::new_v4(),
            parent_id,
            name: descriptor.name.clone(),
            age: descriptor.age,
            school: descriptor.school.clone(),
            created_at: Utc::now(),
        };
        students.insert(key, student.clone());
        Ok(student)
    }

    async fn find_parent(&self, parent_id: Uuid) -> Result<Option<Parent>> {
        Ok(self.parents.read().unwrap().get(&parent_id).cloned())
    }
}
