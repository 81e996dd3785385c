//! Context that prepares input data sources for data-processing jobs.
//!
//! For every tenant the plugin creates one data source pointing at the
//! configured input. Swift inputs additionally get a container holding the
//! configured files. Results land in
//! `tenants[<id>]["input_data_sources"]`; teardown is delegated to the
//! [`ResourceCleanupManager`].

use crate::cleanup::{Owner, ResourceCleanupManager};
use crate::context::{ContextScope, Credential, TenantSlot};
use crate::errors::PluginError;
use crate::plugin::{ContextLifecycle, ContextPlugin, ContextSpec};
use crate::utils::generate_random_name;
use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

/// Plugin name, also its namespace key.
pub const NAME: &str = "input_data_sources";
/// Platform the plugin is registered for.
pub const PLATFORM: &str = "openstack";
/// Setup order.
pub const ORDER: i32 = 443;

/// Resource type of uploaded objects.
pub const SWIFT_OBJECT: &str = "swift.object";
/// Resource type of containers.
pub const SWIFT_CONTAINER: &str = "swift.container";
/// Resource type of data sources.
pub const DATA_SOURCE: &str = "data_source";

/// Resource types cleaned up by this plugin, objects before containers.
pub const CLEANUP_TAGS: [&str; 3] = [SWIFT_OBJECT, SWIFT_CONTAINER, DATA_SOURCE];

static URL_AUTHORITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://([^/?#]+)").ok());

/// Kind of input storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// Object storage.
    Swift,
    /// HDFS.
    Hdfs,
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swift => write!(f, "swift"),
            Self::Hdfs => write!(f, "hdfs"),
        }
    }
}

/// A file to download into the input container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwiftFile {
    /// Object name.
    pub name: String,
    /// Where to fetch the content from.
    pub download_url: String,
}

/// Parsed plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Input storage kind.
    pub input_type: InputType,
    /// URL of the input.
    pub input_url: String,
    /// Files to upload for swift inputs.
    #[serde(default)]
    pub swift_files: Vec<SwiftFile>,
}

/// A data source to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceRequest {
    /// Generated name, recognisable by run.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Storage kind.
    pub data_source_type: InputType,
    /// URL of the data.
    pub url: String,
    /// Credential the job uses to read swift inputs.
    pub credential: Option<Credential>,
}

impl DataSourceRequest {
    /// Creates a request without a credential.
    #[must_use]
    pub fn new(name: impl Into<String>, data_source_type: InputType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            data_source_type,
            url: url.into(),
            credential: None,
        }
    }

    /// Attaches a credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// Creates the cloud resources backing input data sources.
///
/// Every created resource must be tagged with `task_id` so that the
/// cleanup collaborators can find it later.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataSourceProvisioner: Send + Sync {
    /// Creates a container and returns its name.
    async fn create_container(
        &self,
        owner: &Owner,
        task_id: &str,
        name: &str,
    ) -> Result<String, PluginError>;

    /// Uploads a file into a container and returns the object name.
    async fn upload_object(
        &self,
        owner: &Owner,
        task_id: &str,
        container: &str,
        file: &SwiftFile,
    ) -> Result<String, PluginError>;

    /// Creates a data source and returns its id.
    async fn create_data_source(
        &self,
        owner: &Owner,
        task_id: &str,
        request: &DataSourceRequest,
    ) -> Result<String, PluginError>;
}

/// Name of the input container for `input_url`: `ctx_<host>`, with a
/// trailing `.sahara` removed from the host.
#[must_use]
pub fn container_name(input_url: &str, owner_id: &str) -> String {
    let host = URL_AUTHORITY
        .as_ref()
        .and_then(|pattern| pattern.captures(input_url))
        .and_then(|captures| captures.get(1))
        .map(|authority| {
            let authority = authority.as_str();
            authority.strip_suffix(".sahara").unwrap_or(authority).to_string()
        });

    match host {
        Some(host) if !host.is_empty() => format!("ctx_{host}"),
        _ => generate_random_name(owner_id),
    }
}

fn config_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "input_type": {"enum": ["swift", "hdfs"]},
            "input_url": {"type": "string"},
            "swift_files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "download_url": {"type": "string"}
                    },
                    "additionalProperties": false,
                    "required": ["name", "download_url"]
                }
            }
        },
        "additionalProperties": false,
        "required": ["input_type", "input_url"]
    })
}

/// Registered side of the input data sources context.
pub struct InputDataSourcesPlugin {
    spec: ContextSpec,
    schema: serde_json::Value,
    provisioner: Arc<dyn DataSourceProvisioner>,
    cleanup: Arc<ResourceCleanupManager>,
}

impl InputDataSourcesPlugin {
    /// Creates the plugin around its collaborators.
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn DataSourceProvisioner>,
        cleanup: Arc<ResourceCleanupManager>,
    ) -> Self {
        Self {
            spec: ContextSpec::new(NAME, PLATFORM, ORDER)
                .with_description("Creates input data sources for data-processing jobs"),
            schema: config_schema(),
            provisioner,
            cleanup,
        }
    }
}

impl fmt::Debug for InputDataSourcesPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputDataSourcesPlugin")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl ContextPlugin for InputDataSourcesPlugin {
    fn spec(&self) -> &ContextSpec {
        &self.spec
    }

    fn config_schema(&self) -> Option<&serde_json::Value> {
        Some(&self.schema)
    }

    fn create(&self, config: serde_json::Value) -> Result<Box<dyn ContextLifecycle>, PluginError> {
        let config: InputConfig = serde_json::from_value(config)
            .map_err(|err| PluginError::invalid_state(format!("invalid {NAME} config: {err}")))?;
        Ok(Box::new(InputDataSources {
            config: Arc::new(config),
            provisioner: Arc::clone(&self.provisioner),
            cleanup: Arc::clone(&self.cleanup),
        }))
    }
}

struct InputDataSources {
    config: Arc<InputConfig>,
    provisioner: Arc<dyn DataSourceProvisioner>,
    cleanup: Arc<ResourceCleanupManager>,
}

async fn provision_tenant(
    provisioner: &dyn DataSourceProvisioner,
    config: &InputConfig,
    task_id: &str,
    slot: TenantSlot<'_>,
) -> Result<(), PluginError> {
    let owner = slot.user.owner();
    let mut request = DataSourceRequest::new(
        generate_random_name(task_id),
        config.input_type,
        &config.input_url,
    );

    if config.input_type == InputType::Swift {
        let container = provisioner
            .create_container(&owner, task_id, &container_name(&config.input_url, task_id))
            .await?;
        slot.data["container_name"] = json!(container);
        slot.data["swift_objects"] = json!([]);

        for file in &config.swift_files {
            let object = provisioner
                .upload_object(&owner, task_id, &container, file)
                .await?;
            if let Some(objects) = slot.data["swift_objects"].as_array_mut() {
                objects.push(json!(object));
            }
        }
        request = request.with_credential(slot.user.credential.clone());
    }

    let data_source = provisioner
        .create_data_source(&owner, task_id, &request)
        .await?;
    debug!(tenant = slot.tenant_id, data_source = %data_source, "Created input data source");
    slot.data["input"] = json!(data_source);
    Ok(())
}

#[async_trait]
impl ContextLifecycle for InputDataSources {
    async fn setup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        let task_id: Arc<str> = Arc::from(scope.owner_id());
        let provisioner = Arc::clone(&self.provisioner);
        let config = Arc::clone(&self.config);

        let tenants = scope
            .fan_out_per_tenant(move |slot| {
                let provisioner = Arc::clone(&provisioner);
                let config = Arc::clone(&config);
                let task_id = Arc::clone(&task_id);
                async move { provision_tenant(provisioner.as_ref(), &config, &task_id, slot).await }
                    .boxed()
            })
            .await?;

        let mut container = serde_json::Value::Null;
        let mut objects = Vec::new();
        for tenant in scope.run().tenants().values() {
            let Some(data) = tenant.namespaces.get(NAME) else {
                continue;
            };
            if let Some(name) = data.get("container_name") {
                container = name.clone();
            }
            if let Some(uploaded) = data.get("swift_objects").and_then(serde_json::Value::as_array) {
                objects.extend(uploaded.iter().cloned());
            }
        }
        *scope.namespace_mut() = json!({"container_name": container, "swift_objects": objects});

        info!(
            tenants,
            input_type = %self.config.input_type,
            "Input data sources ready"
        );
        Ok(())
    }

    async fn cleanup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        let owners = scope.tenant_owners();
        let task_id = scope.owner_id();

        let result = self.cleanup.cleanup(&CLEANUP_TAGS, &owners, &task_id).await;
        scope.remove_tenant_namespaces();
        scope.remove_namespace();

        let stats = result?;
        debug!(
            deleted = stats.deleted,
            already_gone = stats.already_gone,
            "Input data sources cleaned up"
        );
        Ok(())
    }
}
