//! Object Storage Access
//!
//! The source and destination locations are external collaborators. This
//! module provides an in-process `ObjectStore` for them and `ObjectAccess`,
//! the capability-checked handle the processing function uses.

use crate::capabilities::{Capability, CapabilityError, CapabilitySet};

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("object '{key}' not found in '{location}'")]
    NotFound { location: String, key: String },
    #[error("access denied: {0}")]
    AccessDenied(#[from] CapabilityError),
    #[error("object store '{0}' unavailable")]
    Unavailable(String),
}

/// A named location holding objects by key.
pub struct ObjectStore {
    location: String,
    objects: DashMap<String, Vec<u8>>,
}

impl ObjectStore {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            objects: DashMap::new(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.insert(key.to_string(), bytes);
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ObjectError::NotFound {
                location: self.location.clone(),
                key: key.to_string(),
            })
    }

    /// Returns whether an object was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Capability-checked view of the source and destination locations.
///
/// The source is read-only by construction: no method writes to it.
pub struct ObjectAccess {
    source: Arc<ObjectStore>,
    destination: Arc<ObjectStore>,
    credentials: CapabilitySet,
}

impl ObjectAccess {
    pub fn new(
        source: Arc<ObjectStore>,
        destination: Arc<ObjectStore>,
        credentials: CapabilitySet,
    ) -> Self {
        Self {
            source,
            destination,
            credentials,
        }
    }

    pub fn read_source(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        self.credentials.require(Capability::ReadSource)?;
        self.source.get(key)
    }

    pub fn read_destination(&self, key: &str) -> Result<Vec<u8>, ObjectError> {
        self.credentials.require(Capability::ReadDestination)?;
        self.destination.get(key)
    }

    pub fn write_destination(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectError> {
        self.credentials.require(Capability::WriteDestination)?;
        self.destination.put(key, bytes);
        Ok(())
    }

    pub fn delete_destination(&self, key: &str) -> Result<bool, ObjectError> {
        self.credentials.require(Capability::WriteDestination)?;
        Ok(self.destination.delete(key))
    }
}
