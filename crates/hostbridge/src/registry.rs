//! Registry of local objects addressable by the remote peer.
//!
//! The registry never owns what it addresses: each entry is a `Weak`
//! reference tagged with the object's concrete type. Owners expose an
//! object and must revoke it when disposing of it; there is no implicit
//! expiry. Lookups check the type tag before downcasting.
//!
//! Every operation takes the single registry lock for its own duration only.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("object {0} is already registered")]
    DuplicateId(String),

    #[error("object {0} is not found")]
    NotFound(String),

    #[error("object {id} is a {actual}, not a {expected}")]
    TypeMismatch {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },
}

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    object: Weak<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<T: Any + Send + Sync>(object: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(object);
        let object: Weak<dyn Any + Send + Sync> = weak;
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            object,
        }
    }
}

#[derive(Default)]
pub struct ObjectRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Object registry mutex poisoned - recovering");
            poisoned.into_inner()
        })
    }

    /// Make `object` addressable as `id`.
    pub fn put<T: Any + Send + Sync>(
        &self,
        id: impl Into<String>,
        object: &Arc<T>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        match self.entries().entry(id) {
            // An id whose object was dropped without a revoke is free again.
            MapEntry::Occupied(mut occupied) if occupied.get().object.strong_count() == 0 => {
                tracing::trace!(id = %occupied.key(), object_type = type_name::<T>(), "Object exposed over stale entry");
                occupied.insert(Entry::new(object));
                Ok(())
            }
            MapEntry::Occupied(occupied) => Err(RegistryError::DuplicateId(occupied.key().clone())),
            MapEntry::Vacant(vacant) => {
                tracing::trace!(id = %vacant.key(), object_type = type_name::<T>(), "Object exposed");
                vacant.insert(Entry::new(object));
                Ok(())
            }
        }
    }

    /// Remove `id`. Removing an unknown id is a no-op; returns whether an entry existed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.entries().remove(id).is_some();
        tracing::trace!(%id, removed, "Object revoked");
        removed
    }

    /// Look up `id` as a `T`.
    ///
    /// An entry whose object has already been dropped by its owner reports
    /// `NotFound`, same as an unknown id.
    pub fn get<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, RegistryError> {
        let entries = self.entries();
        let entry = entries
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if entry.type_id != TypeId::of::<T>() {
            return Err(RegistryError::TypeMismatch {
                id: id.to_string(),
                expected: type_name::<T>(),
                actual: entry.type_name,
            });
        }

        let object = entry
            .object
            .upgrade()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        object
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                id: id.to_string(),
                expected: type_name::<T>(),
                actual: entry.type_name,
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }
}
