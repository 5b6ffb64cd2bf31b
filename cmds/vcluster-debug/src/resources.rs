//! Default resource lists and user override merging.

/// Resources collected from the vCluster namespace on the host cluster.
pub const DEFAULT_HOST_RESOURCES: &[&str] = &[
	"serviceaccounts",
	"pods",
	"events",
	"statefulsets",
	"networkpolicies",
	"deployments",
	"replicasets",
	"endpoints",
	"endpointslices",
	"services",
	"ingresses",
	"configmaps",
	"pvc",
];

/// Resources collected from every namespace of the virtual cluster.
pub const DEFAULT_VIRTUAL_RESOURCES: &[&str] = &[
	"serviceaccounts",
	"pods",
	"events",
	"statefulsets",
	"networkpolicies",
	"deployments",
	"replicasets",
	"endpoints",
	"endpointslices",
	"services",
	"ingresses",
	"configmaps",
	"pvc",
	"namespaces",
	"persistentvolumes",
	"ingressclasses",
	"storageclasses",
	"priorityclasses",
	"runtimeclasses",
	"customresourcedefinitions",
	"apiservices",
];

/// Merge user overrides into a default resource list.
///
/// An override of the form `-name` removes `name` from the defaults, any
/// other override is appended unless already present.
pub fn merge_resources<D, O>(defaults: &[D], overrides: &[O]) -> Vec<String>
where
	D: AsRef<str>,
	O: AsRef<str>,
{
	let excluded = |resource: &str| {
		overrides
			.iter()
			.any(|o| o.as_ref().strip_prefix('-') == Some(resource))
	};

	let mut merged: Vec<String> = Vec::with_capacity(defaults.len() + overrides.len());
	for resource in defaults.iter().map(AsRef::as_ref) {
		if !excluded(resource) && !merged.iter().any(|m| m == resource) {
			merged.push(resource.to_string());
		}
	}

	for resource in overrides.iter().map(AsRef::as_ref) {
		if resource.starts_with('-') || merged.iter().any(|m| m == resource) {
			continue;
		}
		merged.push(resource.to_string());
	}

	merged
}
