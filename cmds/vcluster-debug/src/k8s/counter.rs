//! Object counts across every fully managed API type.

use std::{
	collections::BTreeMap,
	io,
	path::{Path, PathBuf},
};

use kube::{
	api::{DynamicObject, ListParams},
	Api, Client,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument};

use super::discovery::{DiscoveryError, DiscoverySnapshot, ResourceInfo, ResourceSpec};

/// Verbs a resource must support to be counted.
pub const REQUIRED_VERBS: [&str; 7] = ["get", "watch", "list", "create", "update", "patch", "delete"];

/// Maximum number of objects fetched per resource type.
pub const COUNT_LIMIT: u32 = 6000;

/// File name of the summary written by [`ObjectCounts::write_summary`].
pub const SUMMARY_FILE: &str = "virtual-resource-count.json";

#[derive(Debug, Error)]
pub enum CountError {
	#[error("unable to get discovery information")]
	Discovery(#[from] DiscoveryError),

	#[error("marshal object counts")]
	Encode(#[source] serde_json::Error),

	#[error("write virtual resource count to {}", path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountEntry {
	pub count: usize,
	/// `namespace/name` for namespaced objects, `name` otherwise.
	pub names: Vec<String>,
}

/// Counts keyed by the resource's `"<group>/<version>, Resource=<resource>"` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ObjectCounts(pub BTreeMap<String, CountEntry>);

impl ObjectCounts {
	pub fn get(&self, spec: &ResourceSpec) -> Option<&CountEntry> {
		self.0.get(&spec.to_string())
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Write the counts as pretty JSON to `dir/virtual-resource-count.json`.
	pub fn write_summary(&self, dir: &Path) -> Result<PathBuf, CountError> {
		let raw = serde_json::to_vec_pretty(self).map_err(CountError::Encode)?;
		let path = dir.join(SUMMARY_FILE);
		let write_err = |source| CountError::Write {
			path: path.clone(),
			source,
		};
		std::fs::create_dir_all(dir).map_err(write_err)?;
		std::fs::write(&path, raw).map_err(write_err)?;
		Ok(path)
	}
}

pub struct ObjectCounter {
	client: Client,
	limit: u32,
}

impl ObjectCounter {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			limit: COUNT_LIMIT,
		}
	}

	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = limit;
		self
	}

	/// Count objects of every resource type supporting [`REQUIRED_VERBS`].
	///
	/// Types that fail to list are logged and left out of the result.
	#[instrument(skip_all)]
	pub async fn count_all(&self) -> Result<ObjectCounts, CountError> {
		let snapshot = DiscoverySnapshot::fetch(&self.client).await?;

		let mut counts = BTreeMap::new();
		for (spec, info) in snapshot.resources() {
			if !info.supports_all(&REQUIRED_VERBS) {
				continue;
			}

			info!(resource = %spec.resource, "Count {}", spec.resource);
			match self.count(&spec, info).await {
				Ok(entry) => {
					counts.insert(spec.to_string(), entry);
				}
				Err(e) => error!(resource = %spec, error = %e, "error listing resource"),
			}
		}

		Ok(ObjectCounts(counts))
	}

	async fn count(&self, spec: &ResourceSpec, info: &ResourceInfo) -> Result<CountEntry, kube::Error> {
		let api: Api<DynamicObject> =
			Api::all_with(self.client.clone(), &spec.api_resource(&info.kind));
		let list = api
			.list_metadata(&ListParams::default().limit(self.limit))
			.await?;

		let names: Vec<String> = list
			.items
			.into_iter()
			.map(|object| {
				let name = object.metadata.name.unwrap_or_default();
				match object.metadata.namespace {
					Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
					_ => name,
				}
			})
			.collect();

		Ok(CountEntry {
			count: names.len(),
			names,
		})
	}
}
