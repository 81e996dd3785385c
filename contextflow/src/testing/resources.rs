//! In-memory cloud resources for cleanup and provisioning tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cleanup::{Owner, ResourceCleanupManager, ResourceError, ResourceHandle, ResourceManager};

/// An in-memory resource store.
///
/// Serves as the [`ResourceManager`] for any number of resource types (see
/// [`InMemoryResources::manager`]) and, with the `builtin` feature, as the
/// data source provisioner of the bundled plugins.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    resources: DashMap<String, ResourceHandle>,
    next_id: AtomicUsize,
    delete_failures: DashMap<String, String>,
    provisioning_failures: DashMap<String, String>,
    delete_calls: AtomicUsize,
}

fn key(resource_type: &str, id: &str) -> String {
    format!("{resource_type}:{id}")
}

impl InMemoryResources {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new resource and returns its handle.
    pub fn create(
        &self,
        resource_type: &str,
        owner: &Owner,
        task_id: &str,
        name: Option<&str>,
    ) -> ResourceHandle {
        let id = format!("{resource_type}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut handle = ResourceHandle::new(resource_type, &id, owner, task_id);
        if let Some(name) = name {
            handle = handle.with_name(name);
        }
        self.resources.insert(key(resource_type, &id), handle.clone());
        handle
    }

    /// Number of live resources of a type.
    #[must_use]
    pub fn count(&self, resource_type: &str) -> usize {
        self.resources
            .iter()
            .filter(|entry| entry.value().resource_type == resource_type)
            .count()
    }

    /// Number of live resources of every type.
    #[must_use]
    pub fn total(&self) -> usize {
        self.resources.len()
    }

    /// Live resources of a type, sorted by id.
    #[must_use]
    pub fn handles(&self, resource_type: &str) -> Vec<ResourceHandle> {
        let mut handles: Vec<ResourceHandle> = self
            .resources
            .iter()
            .filter(|entry| entry.value().resource_type == resource_type)
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    /// Makes every deletion of `resource_id` fail.
    pub fn fail_delete(&self, resource_id: impl Into<String>, message: impl Into<String>) {
        self.delete_failures.insert(resource_id.into(), message.into());
    }

    /// Makes provisioning fail for every owner of `tenant_id`.
    pub fn fail_provisioning_for_tenant(
        &self,
        tenant_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.provisioning_failures.insert(tenant_id.into(), message.into());
    }

    /// Number of delete calls received, failed ones included.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// A [`ResourceManager`] view restricted to one resource type.
    #[must_use]
    pub fn manager(self: &Arc<Self>, resource_type: &str) -> Arc<dyn ResourceManager> {
        Arc::new(TypedResources {
            store: Arc::clone(self),
            resource_type: resource_type.to_string(),
        })
    }

    /// Registers a typed view for each resource type.
    pub fn register_with(self: &Arc<Self>, cleanup: &ResourceCleanupManager, resource_types: &[&str]) {
        for resource_type in resource_types {
            cleanup.register(*resource_type, self.manager(resource_type));
        }
    }

    fn list(&self, resource_type: &str, owner: &Owner, task_id: &str) -> Vec<ResourceHandle> {
        self.resources
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|handle| {
                handle.resource_type == resource_type
                    && handle.task_id == task_id
                    && handle.is_visible_to(owner)
            })
            .collect()
    }

    fn delete(&self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.delete_failures.get(&handle.id).map(|m| m.value().clone()) {
            return Err(ResourceError::failed(message));
        }
        self.resources
            .remove(&key(&handle.resource_type, &handle.id))
            .map(|_| ())
            .ok_or(ResourceError::NotFound)
    }

    #[cfg_attr(not(feature = "builtin"), allow(dead_code))]
    fn check_provisioning(&self, owner: &Owner) -> Result<(), crate::errors::PluginError> {
        match self.provisioning_failures.get(&owner.tenant_id) {
            Some(message) => Err(crate::errors::PluginError::provisioning(message.value().clone())),
            None => Ok(()),
        }
    }
}

struct TypedResources {
    store: Arc<InMemoryResources>,
    resource_type: String,
}

#[async_trait]
impl ResourceManager for TypedResources {
    async fn list(&self, owner: &Owner, task_id: &str) -> Result<Vec<ResourceHandle>, ResourceError> {
        Ok(self.store.list(&self.resource_type, owner, task_id))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        self.store.delete(handle)
    }
}

#[cfg(feature = "builtin")]
mod provisioner {
    use super::InMemoryResources;
    use crate::cleanup::Owner;
    use crate::errors::PluginError;
    use crate::plugins::input_data_sources::{
        DataSourceProvisioner, DataSourceRequest, SwiftFile, DATA_SOURCE, SWIFT_CONTAINER,
        SWIFT_OBJECT,
    };
    use async_trait::async_trait;

    #[async_trait]
    impl DataSourceProvisioner for InMemoryResources {
        async fn create_container(
            &self,
            owner: &Owner,
            task_id: &str,
            name: &str,
        ) -> Result<String, PluginError> {
            self.check_provisioning(owner)?;
            self.create(SWIFT_CONTAINER, owner, task_id, Some(name));
            Ok(name.to_string())
        }

        async fn upload_object(
            &self,
            owner: &Owner,
            task_id: &str,
            container: &str,
            file: &SwiftFile,
        ) -> Result<String, PluginError> {
            self.check_provisioning(owner)?;
            let object = format!("{container}/{}", file.name);
            self.create(SWIFT_OBJECT, owner, task_id, Some(&object));
            Ok(object)
        }

        async fn create_data_source(
            &self,
            owner: &Owner,
            task_id: &str,
            request: &DataSourceRequest,
        ) -> Result<String, PluginError> {
            self.check_provisioning(owner)?;
            Ok(self.create(DATA_SOURCE, owner, task_id, Some(&request.name)).id)
        }
    }
}
