//! Best-effort deletion of the resources a run created.

use super::{Owner, ResourceHandle, TagDependencies};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure reported by a resource collaborator.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The resource no longer exists. Treated as already deleted.
    #[error("resource not found")]
    NotFound,

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl ResourceError {
    /// Creates a generic failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Leaf collaborator able to enumerate and delete one resource type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Lists resources of this type visible to `owner` and created by `task_id`.
    async fn list(&self, owner: &Owner, task_id: &str) -> Result<Vec<ResourceHandle>, ResourceError>;

    /// Deletes one resource.
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ResourceError>;
}

/// Configuration for the resource cleanup manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Clean owners of the same resource type concurrently.
    #[serde(default = "default_concurrent_owners")]
    pub concurrent_owners: bool,
}

fn default_concurrent_owners() -> bool {
    true
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            concurrent_owners: default_concurrent_owners(),
        }
    }
}

impl CleanupConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets owner concurrency.
    #[must_use]
    pub fn with_concurrent_owners(mut self, concurrent: bool) -> Self {
        self.concurrent_owners = concurrent;
        self
    }
}

/// Counters of one cleanup call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Resources deleted.
    pub deleted: usize,
    /// Resources that vanished between listing and deletion.
    pub already_gone: usize,
}

impl CleanupStats {
    fn merge(&mut self, other: Self) {
        self.deleted += other.deleted;
        self.already_gone += other.already_gone;
    }
}

/// One failed listing or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// Resource type tag.
    pub resource_type: String,
    /// The resource id, or `None` if listing failed.
    pub resource_id: Option<String>,
    /// The owner the operation ran as.
    pub owner: String,
    /// Error message.
    pub message: String,
}

impl std::fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource_id {
            Some(id) => write!(
                f,
                "delete {}:{} as {}: {}",
                self.resource_type, id, self.owner, self.message
            ),
            None => write!(f, "list {} as {}: {}", self.resource_type, self.owner, self.message),
        }
    }
}

/// Errors from [`ResourceCleanupManager::cleanup`].
#[derive(Debug, Clone, Error)]
pub enum ResourceCleanupError {
    /// No manager is registered for a requested tag. Nothing was deleted.
    #[error("No resource manager registered for '{0}'")]
    UnknownResourceType(String),

    /// Declared dependencies among tags form a cycle. Nothing was deleted.
    #[error("Resource type dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Cleanup ran to completion but some operations failed.
    #[error("Resource cleanup finished with {} failure(s): {}", .failures.len(), render_failures(.failures))]
    Partial {
        /// What did succeed.
        stats: CleanupStats,
        /// Every failure, in processing order.
        failures: Vec<ResourceFailure>,
    },
}

fn render_failures(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct OwnerOutcome {
    stats: CleanupStats,
    failures: Vec<ResourceFailure>,
}

/// Enumerates and deletes resources created during a run.
///
/// Resource types are processed one after another in dependency order;
/// within a type, owners may be processed concurrently. One failed
/// deletion never stops the others.
#[derive(Default)]
pub struct ResourceCleanupManager {
    managers: RwLock<HashMap<String, Arc<dyn ResourceManager>>>,
    dependencies: TagDependencies,
    config: CleanupConfig,
}

impl ResourceCleanupManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: CleanupConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the collaborator handling `resource_type`.
    pub fn register(&self, resource_type: impl Into<String>, manager: Arc<dyn ResourceManager>) {
        self.managers.write().insert(resource_type.into(), manager);
    }

    /// Declares that `dependent` resources are deleted before `dependency`.
    pub fn declare_dependency(&self, dependent: impl Into<String>, dependency: impl Into<String>) {
        self.dependencies.declare(dependent, dependency);
    }

    /// Returns the registered resource types, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.managers.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Deletes every resource of `resource_types` owned by `owners` and
    /// created by `task_id`.
    ///
    /// Resources are visible per tenant, so only the first owner of each
    /// tenant is used. Calling it again for the same task finds nothing and
    /// does nothing.
    pub async fn cleanup(
        &self,
        resource_types: &[&str],
        owners: &[Owner],
        task_id: &str,
    ) -> Result<CleanupStats, ResourceCleanupError> {
        let ordered = self
            .dependencies
            .order(resource_types)
            .map_err(ResourceCleanupError::DependencyCycle)?;

        let managers = {
            let registered = self.managers.read();
            ordered
                .into_iter()
                .map(|tag| match registered.get(&tag) {
                    Some(manager) => Ok((tag, Arc::clone(manager))),
                    None => Err(ResourceCleanupError::UnknownResourceType(tag)),
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut seen = HashSet::new();
        let owners: Vec<&Owner> = owners
            .iter()
            .filter(|owner| seen.insert(owner.tenant_id.as_str()))
            .collect();

        let mut stats = CleanupStats::default();
        let mut failures = Vec::new();

        for (tag, manager) in managers {
            debug!(resource_type = %tag, owners = owners.len(), task_id, "Cleaning resources");

            let outcomes = if self.config.concurrent_owners {
                join_all(
                    owners
                        .iter()
                        .map(|owner| cleanup_owner(&tag, manager.as_ref(), owner, task_id)),
                )
                .await
            } else {
                let mut outcomes = Vec::with_capacity(owners.len());
                for owner in &owners {
                    outcomes.push(cleanup_owner(&tag, manager.as_ref(), owner, task_id).await);
                }
                outcomes
            };

            for outcome in outcomes {
                stats.merge(outcome.stats);
                failures.extend(outcome.failures);
            }
        }

        if failures.is_empty() {
            info!(
                deleted = stats.deleted,
                already_gone = stats.already_gone,
                task_id,
                "Resource cleanup finished"
            );
            Ok(stats)
        } else {
            warn!(
                deleted = stats.deleted,
                failed = failures.len(),
                task_id,
                "Resource cleanup finished with failures"
            );
            Err(ResourceCleanupError::Partial { stats, failures })
        }
    }
}

async fn cleanup_owner(
    tag: &str,
    manager: &dyn ResourceManager,
    owner: &Owner,
    task_id: &str,
) -> OwnerOutcome {
    let mut outcome = OwnerOutcome::default();

    let resources = match manager.list(owner, task_id).await {
        Ok(resources) => resources,
        Err(ResourceError::NotFound) => return outcome,
        Err(err) => {
            warn!(resource_type = tag, owner = %owner, error = %err, "Failed to list resources");
            outcome.failures.push(ResourceFailure {
                resource_type: tag.to_string(),
                resource_id: None,
                owner: owner.to_string(),
                message: err.to_string(),
            });
            return outcome;
        }
    };

    for handle in resources
        .iter()
        .filter(|handle| handle.task_id == task_id && handle.is_visible_to(owner))
    {
        match manager.delete(handle).await {
            Ok(()) => {
                debug!(resource = %handle, "Deleted resource");
                outcome.stats.deleted += 1;
            }
            Err(ResourceError::NotFound) => outcome.stats.already_gone += 1,
            Err(err) => {
                warn!(resource = %handle, owner = %owner, error = %err, "Failed to delete resource");
                outcome.failures.push(ResourceFailure {
                    resource_type: tag.to_string(),
                    resource_id: Some(handle.id.clone()),
                    owner: owner.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    outcome
}

impl std::fmt::Debug for ResourceCleanupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCleanupManager")
            .field("resource_types", &self.resource_types())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn handle(tag: &str, id: &str, owner: &Owner, task: &str) -> ResourceHandle {
        ResourceHandle::new(tag, id, owner, task)
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_others() {
        let owner = Owner::new("u1", "t1");
        let listed = vec![
            handle("obj", "a", &owner, "task"),
            handle("obj", "b", &owner, "task"),
            handle("obj", "c", &owner, "task"),
        ];

        let mut mock = MockResourceManager::new();
        mock.expect_list()
            .times(1)
            .returning(move |_, _| Ok(listed.clone()));
        mock.expect_delete()
            .times(3)
            .returning(|h| match h.id.as_str() {
                "a" => Err(ResourceError::failed("boom")),
                "b" => Err(ResourceError::NotFound),
                _ => Ok(()),
            });

        let manager = ResourceCleanupManager::new();
        manager.register("obj", Arc::new(mock));

        let err = manager.cleanup(&["obj"], &[owner], "task").await.unwrap_err();
        match err {
            ResourceCleanupError::Partial { stats, failures } => {
                assert_eq!(stats, CleanupStats { deleted: 1, already_gone: 1 });
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].resource_id.as_deref(), Some("a"));
                assert_eq!(failures[0].message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_users_of_one_tenant_share_a_single_pass() {
        let alice = Owner::new("alice", "t1");
        let carol = Owner::new("carol", "t1");
        let listed = vec![handle("container", "c1", &alice, "task")];

        let mut mock = MockResourceManager::new();
        mock.expect_list()
            .withf(|owner, _| owner.user_id == "alice")
            .times(1)
            .returning(move |_, _| Ok(listed.clone()));
        mock.expect_delete()
            .times(1)
            .returning(|_| Err(ResourceError::failed("container not empty")));

        let manager = ResourceCleanupManager::new();
        manager.register("container", Arc::new(mock));

        let err = manager
            .cleanup(&["container"], &[alice, carol], "task")
            .await
            .unwrap_err();
        let ResourceCleanupError::Partial { stats, failures } = err else {
            panic!("expected partial cleanup");
        };
        assert_eq!(stats, CleanupStats::default());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].owner, "alice@t1");
    }

    #[tokio::test]
    async fn test_foreign_task_resources_are_ignored() {
        let owner = Owner::new("u1", "t1");
        let listed = vec![
            handle("obj", "mine", &owner, "task"),
            handle("obj", "theirs", &owner, "other-task"),
        ];

        let mut mock = MockResourceManager::new();
        mock.expect_list().returning(move |_, _| Ok(listed.clone()));
        mock.expect_delete()
            .withf(|h| h.id == "mine")
            .times(1)
            .returning(|_| Ok(()));

        let manager = ResourceCleanupManager::new();
        manager.register("obj", Arc::new(mock));

        let stats = manager.cleanup(&["obj"], &[owner], "task").await.unwrap();
        assert_eq!(stats.deleted, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_collected() {
        let good = Owner::new("u1", "t1");
        let bad = Owner::new("u2", "t2");
        let good_handle = handle("obj", "x", &good, "task");

        let mut mock = MockResourceManager::new();
        mock.expect_list().returning(move |owner, _| {
            if owner.tenant_id == "t2" {
                Err(ResourceError::failed("forbidden"))
            } else {
                Ok(vec![good_handle.clone()])
            }
        });
        mock.expect_delete()
            .with(eq(handle("obj", "x", &Owner::new("u1", "t1"), "task")))
            .times(1)
            .returning(|_| Ok(()));

        let manager = ResourceCleanupManager::new()
            .with_config(CleanupConfig::new().with_concurrent_owners(false));
        manager.register("obj", Arc::new(mock));

        let err = manager
            .cleanup(&["obj"], &[good, bad], "task")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("list obj as u2@t2: forbidden"));
    }

    #[tokio::test]
    async fn test_unknown_type_fails_before_any_work() {
        let mut mock = MockResourceManager::new();
        mock.expect_list().never();

        let manager = ResourceCleanupManager::new();
        manager.register("known", Arc::new(mock));

        let err = manager
            .cleanup(&["known", "unknown"], &[Owner::new("u", "t")], "task")
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceCleanupError::UnknownResourceType(ref t) if t == "unknown"));
    }

    #[tokio::test]
    async fn test_declared_dependency_orders_types() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let manager = ResourceCleanupManager::new();

        for tag in ["container", "object"] {
            let order = Arc::clone(&order);
            let mut mock = MockResourceManager::new();
            mock.expect_list().returning(move |_, _| {
                order.lock().push(tag);
                Ok(Vec::new())
            });
            manager.register(tag, Arc::new(mock));
        }
        manager.declare_dependency("object", "container");

        let stats = manager
            .cleanup(&["container", "object"], &[Owner::new("u", "t")], "task")
            .await
            .unwrap();
        assert_eq!(stats, CleanupStats::default());
        assert_eq!(*order.lock(), vec!["object", "container"]);
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_work() {
        let manager = ResourceCleanupManager::new();
        manager.declare_dependency("a", "b");
        manager.declare_dependency("b", "a");

        let err = manager.cleanup(&["a", "b"], &[], "task").await.unwrap_err();
        assert!(matches!(err, ResourceCleanupError::DependencyCycle(_)));
    }
}
