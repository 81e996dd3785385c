//! End-to-end tests of managed runs with the bundled plugins.

#[cfg(all(test, feature = "builtin"))]
mod tests {
    use crate::cleanup::{Owner, ResourceCleanupError, ResourceCleanupManager};
    use crate::context::{ContextConfig, ContextScope, Credential, RunContext, RunIdentity, User};
    use crate::errors::{ContextError, PluginError};
    use crate::events::CollectingEventSink;
    use crate::manager::{ActionOutcome, ContextManager, RunReport};
    use crate::plugin::{ContextLifecycle, ContextPlugin, ContextSpec, SharedKey};
    use crate::plugins::input_data_sources::{
        self, CLEANUP_TAGS, DATA_SOURCE, SWIFT_CONTAINER, SWIFT_OBJECT,
    };
    use crate::plugins::{existing_users, register_builtin_contexts};
    use crate::registry::ContextRegistry;
    use crate::testing::{InMemoryResources, Journal};
    use async_trait::async_trait;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    struct Cloud {
        registry: Arc<ContextRegistry>,
        resources: Arc<InMemoryResources>,
        cleanup: Arc<ResourceCleanupManager>,
    }

    fn cloud() -> Cloud {
        let registry = Arc::new(ContextRegistry::new());
        let resources = Arc::new(InMemoryResources::new());
        let cleanup = Arc::new(ResourceCleanupManager::new());
        resources.register_with(&cleanup, &CLEANUP_TAGS);
        register_builtin_contexts(&registry, resources.clone(), Arc::clone(&cleanup)).unwrap();
        Cloud {
            registry,
            resources,
            cleanup,
        }
    }

    fn manager(cloud: &Cloud) -> ContextManager {
        ContextManager::for_task(Arc::clone(&cloud.registry), "openstack")
            .with_event_sink(Arc::new(CollectingEventSink::new()))
    }

    fn run_config() -> ContextConfig {
        let mut config = ContextConfig::new();
        config.insert(
            existing_users::NAME.to_string(),
            json!([
                {"tenant_id": "T1", "username": "alice", "password": "a"},
                {"tenant_id": "T1", "username": "carol", "password": "c"},
                {"tenant_id": "T2", "username": "bob", "password": "b"}
            ]),
        );
        config.insert(
            input_data_sources::NAME.to_string(),
            json!({
                "input_type": "swift",
                "input_url": "swift://jobs.sahara/input",
                "swift_files": [{"name": "in.txt", "download_url": "https://example.com/in.txt"}]
            }),
        );
        config
    }

    #[tokio::test]
    async fn test_full_run_provisions_per_tenant_and_cleans_everything() {
        let cloud = cloud();
        let manager = manager(&cloud);
        let mut ctx = RunContext::new(RunIdentity::new_task());

        let report = manager
            .run(&run_config(), &mut ctx, |ctx| {
                async move {
                    let inputs: Vec<String> = ["T1", "T2"]
                        .iter()
                        .filter_map(|tenant| {
                            ctx.tenant_namespace(tenant, input_data_sources::NAME)
                                .and_then(|ns| ns["input"].as_str())
                                .map(str::to_string)
                        })
                        .collect();
                    Ok(inputs)
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(report.setup_order, vec!["existing_users", "input_data_sources"]);
        assert_eq!(report.cleanup_order, vec!["input_data_sources", "existing_users"]);
        assert!(!report.has_cleanup_warnings());
        assert_eq!(report.action.into_result().unwrap().len(), 2);

        assert_eq!(cloud.resources.total(), 0);
        assert!(ctx.users().is_empty());
        assert!(ctx.tenants().is_empty());
    }

    #[tokio::test]
    async fn test_second_resource_cleanup_is_a_no_op() {
        let cloud = cloud();
        let owner = Owner::new("u1", "T1");
        for tag in CLEANUP_TAGS {
            cloud.resources.create(tag, &owner, "task-1", None);
        }
        cloud.resources.create(SWIFT_OBJECT, &owner, "task-2", None);

        let first = cloud
            .cleanup
            .cleanup(&CLEANUP_TAGS, &[owner.clone()], "task-1")
            .await
            .unwrap();
        assert_eq!(first.deleted, 3);
        let calls = cloud.resources.delete_calls();

        let second = cloud
            .cleanup
            .cleanup(&CLEANUP_TAGS, &[owner], "task-1")
            .await
            .unwrap();
        assert_eq!(second.deleted, 0);
        assert_eq!(second.already_gone, 0);
        assert_eq!(cloud.resources.delete_calls(), calls);
        // Resources of other runs are untouched.
        assert_eq!(cloud.resources.count(SWIFT_OBJECT), 1);
    }

    #[tokio::test]
    async fn test_one_failed_deletion_does_not_stop_the_rest() {
        let cloud = cloud();
        let owners = [Owner::new("u1", "T1"), Owner::new("u2", "T2")];
        let mut stuck = Vec::new();
        for owner in &owners {
            for _ in 0..3 {
                cloud.resources.create(DATA_SOURCE, owner, "task", None);
            }
            let handle = cloud.resources.create(SWIFT_CONTAINER, owner, "task", None);
            cloud.resources.fail_delete(&handle.id, "container not empty");
            stuck.push(handle.id);
        }

        let err = cloud
            .cleanup
            .cleanup(&[SWIFT_CONTAINER, DATA_SOURCE], &owners, "task")
            .await
            .unwrap_err();

        let ResourceCleanupError::Partial { stats, failures } = err else {
            panic!("expected partial cleanup");
        };
        assert_eq!(stats.deleted, 6);
        let mut failed: Vec<String> = failures
            .iter()
            .filter_map(|failure| failure.resource_id.clone())
            .collect();
        failed.sort();
        stuck.sort();
        assert_eq!(failed, stuck);
        assert_eq!(cloud.resources.count(DATA_SOURCE), 0);
    }

    #[tokio::test]
    async fn test_stuck_resource_is_reported_once_per_tenant() {
        let cloud = cloud();
        let manager = manager(&cloud);
        let mut config = ContextConfig::new();
        config.insert(
            existing_users::NAME.to_string(),
            json!([
                {"tenant_id": "T1", "username": "alice", "password": "a"},
                {"tenant_id": "T1", "username": "carol", "password": "c"}
            ]),
        );
        config.insert(
            input_data_sources::NAME.to_string(),
            json!({
                "input_type": "swift",
                "input_url": "swift://jobs.sahara/input",
                "swift_files": [{"name": "in.txt", "download_url": "https://example.com/in.txt"}]
            }),
        );
        let resources = Arc::clone(&cloud.resources);
        let mut ctx = RunContext::default();

        let report = manager
            .run(&config, &mut ctx, move |_| {
                async move {
                    for handle in resources.handles(SWIFT_CONTAINER) {
                        resources.fail_delete(&handle.id, "container not empty");
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
            .unwrap();

        assert!(report.action.is_completed());
        assert_eq!(report.cleanup_failures.len(), 1);
        assert_eq!(report.cleanup_failures[0].plugin, "input_data_sources");
        assert!(report.cleanup_failures[0].message.contains("1 failure(s)"));
        assert_eq!(cloud.resources.count(SWIFT_CONTAINER), 1);
        assert_eq!(cloud.resources.count(SWIFT_OBJECT), 0);
        // One object, one data source and one attempt on the container.
        assert_eq!(cloud.resources.delete_calls(), 3);
    }

    #[tokio::test]
    async fn test_validation_collects_every_violation() {
        let cloud = cloud();
        let manager = manager(&cloud);
        let mut config = ContextConfig::new();
        config.insert(existing_users::NAME.to_string(), json!([]));
        config.insert(input_data_sources::NAME.to_string(), json!({"input_type": "swift"}));

        let err = manager.validate(&config).unwrap_err();
        let ContextError::InvalidConfig(invalid) = err else {
            panic!("expected invalid config");
        };
        assert_eq!(invalid.violations.len(), 2);
        assert_eq!(
            invalid.plugins(),
            vec!["existing_users".to_string(), "input_data_sources".to_string()]
        );
        assert!(invalid.violations[1].message.contains("input_url"));
    }

    #[tokio::test]
    async fn test_invalid_config_never_starts_setup() {
        let cloud = cloud();
        let manager = manager(&cloud);
        let mut config = run_config();
        config.insert(input_data_sources::NAME.to_string(), json!({"input_type": "swift"}));
        let mut ctx = RunContext::default();

        let result = manager
            .run(&config, &mut ctx, |_| async { Ok(()) }.boxed())
            .await;
        assert!(matches!(result, Err(ContextError::InvalidConfig(_))));
        assert!(ctx.users().is_empty());
    }

    #[tokio::test]
    async fn test_tenant_failure_rolls_back_users_and_cleans_partial_resources() {
        let cloud = cloud();
        cloud.resources.fail_provisioning_for_tenant("T2", "object store down");
        let manager = manager(&cloud);
        let mut ctx = RunContext::default();

        let err = manager
            .run(&run_config(), &mut ctx, |_| async { Ok(()) }.boxed())
            .await
            .unwrap_err();

        let ContextError::Setup(failure) = err else {
            panic!("expected setup failure");
        };
        assert_eq!(failure.plugin, "input_data_sources");
        assert_eq!(failure.position, 2);
        assert_eq!(failure.config["input_type"], json!("swift"));
        // The failing plugin gets no cleanup, so T1's resources stay behind.
        assert!(cloud.resources.count(SWIFT_CONTAINER) >= 1);
        assert!(ctx.users().is_empty());
    }

    /// Records how many users it sees during cleanup.
    struct UserCounter {
        spec: ContextSpec,
        journal: Journal,
    }

    #[async_trait]
    impl ContextLifecycle for UserCounter {
        async fn setup(&mut self, _scope: ContextScope<'_>) -> Result<(), PluginError> {
            Ok(())
        }

        async fn cleanup(&mut self, scope: ContextScope<'_>) -> Result<(), PluginError> {
            self.journal
                .record(format!("{} saw {} user(s)", self.spec.name, scope.users().len()));
            Ok(())
        }
    }

    /// Adds a temporary user during setup and removes it during cleanup.
    struct TemporaryUser {
        spec: ContextSpec,
    }

    #[async_trait]
    impl ContextLifecycle for TemporaryUser {
        async fn setup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
            scope
                .users_mut()?
                .push(User::new("temp", "T1", Credential::new("temp", "x")));
            Ok(())
        }

        async fn cleanup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
            scope.users_mut()?.retain(|user| user.id != "temp");
            Ok(())
        }
    }

    struct Factory {
        spec: ContextSpec,
        journal: Journal,
    }

    impl ContextPlugin for Factory {
        fn spec(&self) -> &ContextSpec {
            &self.spec
        }

        fn create(&self, _config: serde_json::Value) -> Result<Box<dyn ContextLifecycle>, PluginError> {
            if self.spec.may_write(SharedKey::Users) {
                Ok(Box::new(TemporaryUser {
                    spec: self.spec.clone(),
                }))
            } else {
                Ok(Box::new(UserCounter {
                    spec: self.spec.clone(),
                    journal: self.journal.clone(),
                }))
            }
        }
    }

    #[tokio::test]
    async fn test_reverse_cleanup_undoes_later_mutations_first() {
        let journal = Journal::new();
        let registry = Arc::new(ContextRegistry::new());
        registry
            .register(Arc::new(Factory {
                spec: ContextSpec::new("A", "test", 100),
                journal: journal.clone(),
            }))
            .unwrap();
        registry
            .register(Arc::new(Factory {
                spec: ContextSpec::new("B", "test", 200).with_shared_key(SharedKey::Users),
                journal: journal.clone(),
            }))
            .unwrap();

        let manager = ContextManager::for_task(registry, "test")
            .with_event_sink(Arc::new(CollectingEventSink::new()));
        let mut config = ContextConfig::new();
        config.insert("A".to_string(), json!({}));
        config.insert("B".to_string(), json!({}));
        let mut ctx = RunContext::default().with_users([User::new(
            "u1",
            "T1",
            Credential::new("u1", "p"),
        )]);

        let report: RunReport<usize> = manager
            .run(&config, &mut ctx, |ctx| {
                async move { Ok(ctx.users().len()) }.boxed()
            })
            .await
            .unwrap();

        assert!(matches!(report.action, ActionOutcome::Completed(2)));
        assert_eq!(report.setup_order, vec!["A", "B"]);
        assert_eq!(report.cleanup_order, vec!["B", "A"]);
        assert_eq!(journal.entries(), vec!["A saw 1 user(s)"]);
    }

    #[tokio::test]
    async fn test_concurrent_tenant_writes_are_all_kept() {
        let cloud = cloud();
        let manager = manager(&cloud);
        let mut config = ContextConfig::new();
        config.insert(
            input_data_sources::NAME.to_string(),
            json!({"input_type": "hdfs", "input_url": "hdfs://nn/data"}),
        );
        let users: Vec<User> = (0..8)
            .map(|i| User::new(format!("u{i}"), format!("T{i}"), Credential::new("u", "p")))
            .collect();
        let mut ctx = RunContext::default().with_users(users);

        let report = manager
            .run(&config, &mut ctx, |ctx| {
                async move {
                    Ok((0..8)
                        .filter(|i| {
                            ctx.tenant_namespace(&format!("T{i}"), input_data_sources::NAME)
                                .is_some_and(|ns| ns["input"].is_string())
                        })
                        .count())
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(report.action.into_result().unwrap(), 8);
        assert_eq!(cloud.resources.total(), 0);
    }
}
