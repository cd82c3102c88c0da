//! Manifest directory application
//!
//! A test dependency (postgres, mysql, cassandra, ...) is a directory of
//! YAML/JSON files. Every document is pointed at the test namespace and
//! created with server-side apply, in kind-priority order so that config
//! and services exist before the workloads that reference them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, info};
use vigil_core::observe::ResourceKind;
use vigil_core::Error;

use crate::observer::api_resource;
use crate::yaml::parse_documents;

/// Field manager recorded on applied objects
pub const FIELD_MANAGER: &str = "vigil";

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Kinds that never carry a namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "ClusterIssuer",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// Apply order: lower first
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "PersistentVolumeClaim" => 6,
        "Service" => 7,
        "Deployment" | "StatefulSet" | "DaemonSet" => 8,
        _ => 10,
    }
}

/// Whether objects of `kind` live in a namespace
pub fn is_namespaced(kind: &str) -> bool {
    !CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// One document ready to apply
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    /// File the document came from
    pub path: PathBuf,
    /// Resource type
    pub kind: ResourceKind,
    /// `metadata.name`
    pub name: String,
    /// Target namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Full object, namespace already rewritten
    pub value: Value,
}

impl Manifest {
    /// Validate a document and point it at `namespace`
    ///
    /// # Errors
    /// [`Error::Manifest`] when `apiVersion`, `kind` or `metadata.name` is missing.
    pub fn from_value(path: &Path, mut value: Value, namespace: &str) -> Result<Self, Error> {
        let field = |pointer: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::manifest(
                        path.display().to_string(),
                        format!("document missing {}", pointer.trim_start_matches('/').replace('/', ".")),
                    )
                })
        };
        let api_version = field("/apiVersion")?;
        let kind = field("/kind")?;
        let name = field("/metadata/name")?;

        let namespace = if is_namespaced(&kind) {
            if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
            }
            Some(namespace.to_string())
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            kind: ResourceKind::new(api_version, kind),
            name,
            namespace,
            value,
        })
    }
}

/// Manifest files directly inside `dir`, sorted by file name
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::manifest(dir.display().to_string(), format!("cannot read directory: {}", e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every document under `dir`, namespaced to `namespace`, in apply order
///
/// # Errors
/// [`Error::Manifest`] for an unreadable directory, a directory without
/// documents, or any malformed document.
pub fn load_manifest_dir(dir: &Path, namespace: &str) -> Result<Vec<Manifest>, Error> {
    let mut manifests = Vec::new();
    for path in manifest_files(dir)? {
        let raw = std::fs::read_to_string(&path)?;
        let documents = parse_documents(&raw)
            .map_err(|e| Error::manifest(path.display().to_string(), e.to_string()))?;
        for document in documents {
            manifests.push(Manifest::from_value(&path, document, namespace)?);
        }
    }

    if manifests.is_empty() {
        return Err(Error::manifest(
            dir.display().to_string(),
            "no manifests found",
        ));
    }

    // Stable: file order is kept within a priority.
    manifests.sort_by_key(|m| kind_priority(&m.kind.kind));
    Ok(manifests)
}

fn apply_error(manifest: &Manifest, err: kube::Error) -> Error {
    let resource = format!("{} {}", manifest.kind, manifest.name);
    match &err {
        kube::Error::Api(_) => Error::manifest(
            manifest.path.display().to_string(),
            format!("failed to apply {}: {}", resource, err),
        ),
        _ => Error::observation(resource, err.to_string()),
    }
}

/// Creates or updates one object in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Apply `manifest` once, returning the first failure unchanged
    async fn apply(&self, manifest: &Manifest) -> Result<(), Error>;
}

/// Server-side apply through a kube client
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    /// Apply with `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestApplier for KubeApplier {
    async fn apply(&self, manifest: &Manifest) -> Result<(), Error> {
        let ar = api_resource(&manifest.kind);
        let api: Api<DynamicObject> = match &manifest.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&manifest.name, &params, &Patch::Apply(&manifest.value))
            .await
            .map_err(|e| apply_error(manifest, e))?;

        debug!(kind = %manifest.kind, name = %manifest.name, "Applied manifest");
        Ok(())
    }
}

/// Apply every manifest under `dir` into `namespace`
///
/// Returns the number of objects applied. Each object is applied once and the
/// first failure stops the run.
pub async fn apply_manifest_dir(
    applier: &dyn ManifestApplier,
    dir: &Path,
    namespace: &str,
) -> Result<usize, Error> {
    let manifests = load_manifest_dir(dir, namespace)?;
    for manifest in &manifests {
        applier.apply(manifest).await?;
    }
    info!(
        dir = %dir.display(),
        namespace,
        count = manifests.len(),
        "Applied manifest directory"
    );
    Ok(manifests.len())
}
