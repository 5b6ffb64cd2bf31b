//! Resource snapshots written as one YAML file per object.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use kube::{
	api::{DynamicObject, ListParams},
	core::TypeMeta,
	Api, Client,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::discovery::{DiscoveryError, DiscoverySnapshot, ResourceInfo, ResourceSpec};

/// Maximum number of objects fetched per resource type. Larger result sets
/// are truncated rather than paged through.
pub const LIST_LIMIT: u32 = 2000;

/// Pods synced by the vCluster syncer carry projected service account tokens
/// in annotations with this prefix. They must never end up in a bundle.
pub const SERVICE_ACCOUNT_TOKEN_ANNOTATION_PREFIX: &str = "vcluster.loft.sh/token-";

/// Errors that can occur while collecting resources.
#[derive(Debug, Error)]
pub enum CollectorError {
	#[error("unable to get discovery information")]
	Discovery(#[from] DiscoveryError),

	#[error("couldn't find group version for resource {0}")]
	Resolution(String),

	#[error("failed to list resource {spec} in namespace {namespace:?}")]
	List {
		spec: ResourceSpec,
		namespace: String,
		#[source]
		source: kube::Error,
	},

	#[error("failed to marshal resource {spec} object {name}")]
	Serialize {
		spec: ResourceSpec,
		name: String,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("failed to write {}", path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Lists resources and stores them below a destination directory.
#[derive(Clone)]
pub struct ResourceCollector {
	client: Client,
	limit: u32,
}

impl ResourceCollector {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			limit: LIST_LIMIT,
		}
	}

	/// Override the per-type list limit.
	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = limit;
		self
	}

	/// Collect every resource token against a single fresh discovery snapshot,
	/// stopping at the first failure.
	///
	/// An empty `namespace` collects from all namespaces.
	#[instrument(skip_all, fields(namespace = %namespace, dest = %dest.display()))]
	pub async fn collect_all<S: AsRef<str>>(
		&self,
		tokens: &[S],
		namespace: &str,
		dest: &Path,
	) -> Result<(), CollectorError> {
		let snapshot = DiscoverySnapshot::fetch(&self.client).await?;
		for token in tokens {
			self.collect_token(&snapshot, token.as_ref(), namespace, dest)
				.await?;
		}
		Ok(())
	}

	/// Resolve `token` against a fresh discovery snapshot and collect the
	/// matching type.
	pub async fn collect(
		&self,
		token: &str,
		namespace: &str,
		dest: &Path,
	) -> Result<usize, CollectorError> {
		let snapshot = DiscoverySnapshot::fetch(&self.client).await?;
		self.collect_token(&snapshot, token, namespace, dest).await
	}

	/// Resolve `token` against `snapshot` and collect the matching type.
	pub async fn collect_token(
		&self,
		snapshot: &DiscoverySnapshot,
		token: &str,
		namespace: &str,
		dest: &Path,
	) -> Result<usize, CollectorError> {
		let (spec, info) = snapshot
			.resolve_info(token)
			.ok_or_else(|| CollectorError::Resolution(token.to_string()))?;
		self.collect_spec(&spec, info, namespace, dest).await
	}

	/// List objects of `spec` and write them to
	/// `dest/<resource>[.<group>]/[<namespace>/]<name>.yaml`.
	///
	/// Returns the number of objects written.
	pub async fn collect_spec(
		&self,
		spec: &ResourceSpec,
		info: &ResourceInfo,
		namespace: &str,
		dest: &Path,
	) -> Result<usize, CollectorError> {
		info!(resource = %spec.resource, "Retrieve {}...", spec.resource);

		let api_resource = spec.api_resource(&info.kind);
		let api: Api<DynamicObject> = if namespace.is_empty() || !info.namespaced {
			Api::all_with(self.client.clone(), &api_resource)
		} else {
			Api::namespaced_with(self.client.clone(), namespace, &api_resource)
		};

		let list = api
			.list(&ListParams::default().limit(self.limit))
			.await
			.map_err(|source| CollectorError::List {
				spec: spec.clone(),
				namespace: namespace.to_string(),
				source,
			})?;

		if list.metadata.continue_.as_deref().is_some_and(|c| !c.is_empty()) {
			warn!(
				resource = %spec,
				limit = self.limit,
				"result truncated, remaining objects are not collected"
			);
		}

		let resource_dir = dest.join(spec.dir_name());
		let mut written = 0;
		for mut object in list.items {
			let Some(name) = object.metadata.name.clone() else {
				warn!(resource = %spec, "skipping object without a name");
				continue;
			};

			if spec.resource == "pods" {
				scrub_service_account_tokens(&mut object);
			}
			if object.types.is_none() {
				object.types = Some(TypeMeta {
					api_version: spec.api_version(),
					kind: info.kind.clone(),
				});
			}

			let path = object_path(&resource_dir, object.metadata.namespace.as_deref(), &name);
			let raw = serde_yaml::to_string(&object).map_err(|source| {
				CollectorError::Serialize {
					spec: spec.clone(),
					name: name.clone(),
					source,
				}
			})?;
			write_file(&path, raw.as_bytes())?;
			written += 1;
		}

		debug!(resource = %spec, count = written, "collected resources");
		Ok(written)
	}
}

/// Remove service account token annotations, returning how many were removed.
pub fn scrub_service_account_tokens(object: &mut DynamicObject) -> usize {
	let Some(annotations) = object.metadata.annotations.as_mut() else {
		return 0;
	};

	let before = annotations.len();
	annotations.retain(|key, _| !key.starts_with(SERVICE_ACCOUNT_TOKEN_ANNOTATION_PREFIX));
	let removed = before - annotations.len();

	if annotations.is_empty() {
		object.metadata.annotations = None;
	}
	removed
}

/// `<resource_dir>/[<namespace>/]<name>.yaml`
pub fn object_path(resource_dir: &Path, namespace: Option<&str>, name: &str) -> PathBuf {
	let dir = match namespace {
		Some(ns) if !ns.is_empty() => resource_dir.join(ns),
		_ => resource_dir.to_path_buf(),
	};
	dir.join(format!("{name}.yaml"))
}

/// Write `content` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, content: &[u8]) -> Result<(), CollectorError> {
	let write_err = |source| CollectorError::Write {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(write_err)?;
	}
	fs::write(path, content).map_err(write_err)
}
