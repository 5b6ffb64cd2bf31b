//! Live API discovery and resource name resolution.
//!
//! A [`DiscoverySnapshot`] mirrors what `kubectl api-resources` sees: every
//! group version the server serves together with the names, short names and
//! verbs of its resources. Snapshots are fetched per phase and never cached,
//! so CRDs installed mid-run are picked up by later phases.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use kube::{core::GroupVersionKind, discovery::ApiResource, Client};
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur while fetching discovery information.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("unable to list core API versions")]
	CoreVersions(#[source] kube::Error),

	#[error("unable to list API groups")]
	Groups(#[source] kube::Error),

	#[error("unable to list resources of {group_version}")]
	Resources {
		group_version: String,
		#[source]
		source: kube::Error,
	},
}

/// Group, version and plural resource name of an API type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceSpec {
	pub group: String,
	pub version: String,
	pub resource: String,
}

impl ResourceSpec {
	pub fn new(group: &str, version: &str, resource: &str) -> Self {
		Self {
			group: group.to_string(),
			version: version.to_string(),
			resource: resource.to_string(),
		}
	}

	/// The `apiVersion` objects of this type carry.
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}

	/// Directory name used in the bundle: `<resource>` or `<resource>.<group>`.
	pub fn dir_name(&self) -> String {
		if self.group.is_empty() {
			self.resource.clone()
		} else {
			format!("{}.{}", self.resource, self.group)
		}
	}

	/// Build the kube `ApiResource` needed for dynamic API calls.
	pub fn api_resource(&self, kind: &str) -> ApiResource {
		ApiResource::from_gvk_with_plural(
			&GroupVersionKind::gvk(&self.group, &self.version, kind),
			&self.resource,
		)
	}
}

/// Formats like Kubernetes does for group version resources, e.g.
/// `apps/v1, Resource=deployments` or `/v1, Resource=pods`.
impl fmt::Display for ResourceSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}/{}, Resource={}",
			self.group, self.version, self.resource
		)
	}
}

/// A single resource as reported by discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
	/// Plural name, e.g. `pods`.
	pub name: String,
	pub singular_name: String,
	pub short_names: Vec<String>,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl ResourceInfo {
	/// Whether every verb in `required` is supported.
	pub fn supports_all(&self, required: &[&str]) -> bool {
		required
			.iter()
			.all(|verb| self.verbs.iter().any(|v| v == verb))
	}
}

impl From<APIResource> for ResourceInfo {
	fn from(r: APIResource) -> Self {
		Self {
			name: r.name,
			singular_name: r.singular_name,
			short_names: r.short_names.unwrap_or_default(),
			kind: r.kind,
			namespaced: r.namespaced,
			verbs: r.verbs,
		}
	}
}

/// All resources of one group version, e.g. `apps/v1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredGroup {
	pub group_version: String,
	pub resources: Vec<ResourceInfo>,
}

impl From<APIResourceList> for DiscoveredGroup {
	fn from(list: APIResourceList) -> Self {
		Self {
			group_version: list.group_version,
			resources: list.resources.into_iter().map(ResourceInfo::from).collect(),
		}
	}
}

/// Point-in-time view of the cluster's API surface.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySnapshot {
	groups: Vec<DiscoveredGroup>,
}

impl DiscoverySnapshot {
	pub fn new(groups: Vec<DiscoveredGroup>) -> Self {
		Self { groups }
	}

	/// Query the legacy discovery endpoints: core versions first, then every
	/// version of every named group in server order.
	#[instrument(skip_all)]
	pub async fn fetch(client: &Client) -> Result<Self, DiscoveryError> {
		let mut groups = Vec::new();

		let core = client
			.list_core_api_versions()
			.await
			.map_err(DiscoveryError::CoreVersions)?;
		for version in core.versions {
			let list = client
				.list_core_api_resources(&version)
				.await
				.map_err(|source| DiscoveryError::Resources {
					group_version: version.clone(),
					source,
				})?;
			groups.push(DiscoveredGroup::from(list));
		}

		let api_groups = client
			.list_api_groups()
			.await
			.map_err(DiscoveryError::Groups)?;
		for group in api_groups.groups {
			for version in group.versions {
				let list = client
					.list_api_group_resources(&version.group_version)
					.await
					.map_err(|source| DiscoveryError::Resources {
						group_version: version.group_version.clone(),
						source,
					})?;
				groups.push(DiscoveredGroup::from(list));
			}
		}

		tracing::debug!(group_versions = groups.len(), "fetched discovery snapshot");
		Ok(Self { groups })
	}

	pub fn groups(&self) -> &[DiscoveredGroup] {
		&self.groups
	}

	/// Every resource with a parseable group version, in discovery order.
	pub fn resources(&self) -> impl Iterator<Item = (ResourceSpec, &ResourceInfo)> {
		self.groups.iter().flat_map(|group| {
			let parsed = parse_group_version(&group.group_version);
			group.resources.iter().filter_map(move |info| {
				let (g, v) = parsed?;
				Some((ResourceSpec::new(g, v, &info.name), info))
			})
		})
	}

	/// Resolve a resource token such as `po`, `deployment` or
	/// `leases.coordination.k8s.io` to a concrete API type.
	pub fn resolve(&self, token: &str) -> Option<ResourceSpec> {
		self.resolve_info(token).map(|(spec, _)| spec)
	}

	/// Like [`Self::resolve`], also returning the matched discovery entry.
	///
	/// Within a group version, plural names take precedence over singular
	/// names, which take precedence over short names. The first group version
	/// with any match wins.
	pub fn resolve_info(&self, token: &str) -> Option<(ResourceSpec, &ResourceInfo)> {
		let (name, group_filter) = match token.split_once('.') {
			Some((name, group)) => (name, Some(group)),
			None => (token, None),
		};
		// discovery reports an empty singular name for many built-in types
		if name.is_empty() {
			return None;
		}

		for group in &self.groups {
			let Some((g, v)) = parse_group_version(&group.group_version) else {
				continue;
			};
			if group_filter.is_some_and(|filter| filter != g) {
				continue;
			}

			let found = group
				.resources
				.iter()
				.find(|r| r.name == name)
				.or_else(|| group.resources.iter().find(|r| r.singular_name == name))
				.or_else(|| {
					group
						.resources
						.iter()
						.find(|r| r.short_names.iter().any(|s| s == name))
				});

			if let Some(info) = found {
				return Some((ResourceSpec::new(g, v, &info.name), info));
			}
		}

		None
	}
}

/// Split a `group/version` string. `v1` is the core group, an empty string
/// yields an empty group and version, more than one `/` is invalid.
pub fn parse_group_version(group_version: &str) -> Option<(&str, &str)> {
	if group_version.is_empty() || group_version == "/" {
		return Some(("", ""));
	}
	match group_version.split_once('/') {
		None => Some(("", group_version)),
		Some((_, version)) if version.contains('/') => None,
		Some((group, version)) => Some((group, version)),
	}
}
