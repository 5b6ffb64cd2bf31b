//! Mock Kubernetes API discovery types.

/// Verbs of a fully managed resource.
pub const ALL_VERBS: [&str; 7] = ["create", "delete", "get", "list", "patch", "update", "watch"];

/// Pre-configured discovery responses, in the order the server reports them.
///
/// Group versions without a `/` are served under `/api`, all others under `/apis`.
#[derive(Clone, Debug)]
pub struct MockDiscovery {
	pub groups: Vec<MockGroupVersion>,
}

/// Resources of one group version, e.g. `apps/v1`.
#[derive(Clone, Debug)]
pub struct MockGroupVersion {
	pub group_version: String,
	pub resources: Vec<MockApiResource>,
}

impl MockGroupVersion {
	pub fn new(group_version: &str, resources: Vec<MockApiResource>) -> Self {
		Self {
			group_version: group_version.to_string(),
			resources,
		}
	}

	/// Group and version, the core group being empty.
	pub fn split(&self) -> (&str, &str) {
		self.group_version
			.split_once('/')
			.unwrap_or(("", &self.group_version))
	}

	pub fn is_core(&self) -> bool {
		!self.group_version.contains('/')
	}
}

impl MockDiscovery {
	/// Discovery without any resources.
	pub fn empty() -> Self {
		Self { groups: Vec::new() }
	}

	/// Append a group version.
	pub fn with_group(mut self, group_version: &str, resources: Vec<MockApiResource>) -> Self {
		self.groups
			.push(MockGroupVersion::new(group_version, resources));
		self
	}

	pub fn group(&self, group_version: &str) -> Option<&MockGroupVersion> {
		self.groups
			.iter()
			.find(|g| g.group_version == group_version)
	}

	/// Look up a resource by its plural name.
	pub fn resource(&self, group_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.group(group_version)?
			.resources
			.iter()
			.find(|r| r.name == plural)
	}

	/// Look up a resource by the kind of its objects.
	pub fn resource_for_kind(&self, group_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.group(group_version)?
			.resources
			.iter()
			.find(|r| r.kind == kind)
	}
}

impl Default for MockDiscovery {
	/// The built-in types a vCluster bundle collects, plus `leases`.
	fn default() -> Self {
		use MockApiResource as R;

		Self::empty()
			.with_group(
				"v1",
				vec![
					R::namespaced("configmaps", "ConfigMap").short_names(&["cm"]),
					R::namespaced("endpoints", "Endpoints").short_names(&["ep"]),
					R::namespaced("events", "Event").short_names(&["ev"]),
					R::cluster_scoped("namespaces", "Namespace").short_names(&["ns"]),
					R::namespaced("persistentvolumeclaims", "PersistentVolumeClaim")
						.short_names(&["pvc"]),
					R::cluster_scoped("persistentvolumes", "PersistentVolume").short_names(&["pv"]),
					R::namespaced("pods", "Pod").short_names(&["po"]),
					R::namespaced("secrets", "Secret"),
					R::namespaced("serviceaccounts", "ServiceAccount").short_names(&["sa"]),
					R::namespaced("services", "Service").short_names(&["svc"]),
					R::namespaced("bindings", "Binding").verbs(&["create"]),
				],
			)
			.with_group(
				"apiregistration.k8s.io/v1",
				vec![R::cluster_scoped("apiservices", "APIService")],
			)
			.with_group(
				"apps/v1",
				vec![
					R::namespaced("daemonsets", "DaemonSet").short_names(&["ds"]),
					R::namespaced("deployments", "Deployment").short_names(&["deploy"]),
					R::namespaced("replicasets", "ReplicaSet").short_names(&["rs"]),
					R::namespaced("statefulsets", "StatefulSet").short_names(&["sts"]),
				],
			)
			.with_group(
				"networking.k8s.io/v1",
				vec![
					R::cluster_scoped("ingressclasses", "IngressClass"),
					R::namespaced("ingresses", "Ingress").short_names(&["ing"]),
					R::namespaced("networkpolicies", "NetworkPolicy").short_names(&["netpol"]),
				],
			)
			.with_group(
				"apiextensions.k8s.io/v1",
				vec![R::cluster_scoped("customresourcedefinitions", "CustomResourceDefinition")
					.short_names(&["crd", "crds"])],
			)
			.with_group(
				"storage.k8s.io/v1",
				vec![R::cluster_scoped("storageclasses", "StorageClass").short_names(&["sc"])],
			)
			.with_group(
				"scheduling.k8s.io/v1",
				vec![R::cluster_scoped("priorityclasses", "PriorityClass").short_names(&["pc"])],
			)
			.with_group(
				"coordination.k8s.io/v1",
				vec![R::namespaced("leases", "Lease")],
			)
			.with_group(
				"node.k8s.io/v1",
				vec![R::cluster_scoped("runtimeclasses", "RuntimeClass")],
			)
			.with_group(
				"discovery.k8s.io/v1",
				vec![R::namespaced("endpointslices", "EndpointSlice")],
			)
	}
}

/// A mock API resource definition.
#[derive(Clone, Debug)]
pub struct MockApiResource {
	pub name: String,
	pub singular_name: String,
	pub short_names: Vec<String>,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			singular_name: kind.to_lowercase(),
			short_names: Vec::new(),
			kind: kind.to_string(),
			namespaced,
			verbs: ALL_VERBS.iter().map(|v| v.to_string()).collect(),
		}
	}

	pub fn singular_name(mut self, singular: &str) -> Self {
		self.singular_name = singular.to_string();
		self
	}

	pub fn short_names(mut self, short_names: &[&str]) -> Self {
		self.short_names = short_names.iter().map(|s| s.to_string()).collect();
		self
	}

	pub fn verbs(mut self, verbs: &[&str]) -> Self {
		self.verbs = verbs.iter().map(|v| v.to_string()).collect();
		self
	}

	/// The `APIResource` JSON served by legacy discovery.
	pub fn to_json(&self) -> serde_json::Value {
		serde_json::json!({
			"name": self.name,
			"singularName": self.singular_name,
			"shortNames": self.short_names,
			"namespaced": self.namespaced,
			"kind": self.kind,
			"verbs": self.verbs,
		})
	}
}
