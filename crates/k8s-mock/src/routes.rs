//! Request path parsing.

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route<'a> {
	Version,
	/// `/api`
	CoreVersions,
	/// `/apis`
	Groups,
	/// `/api/v1`, `/apis/<group>/<version>`
	Resources { group_version: String },
	Collection {
		group_version: String,
		namespace: Option<&'a str>,
		resource: &'a str,
	},
	Object {
		group_version: String,
		namespace: Option<&'a str>,
		resource: &'a str,
		name: &'a str,
	},
	Subresource {
		group_version: String,
		namespace: &'a str,
		resource: &'a str,
		name: &'a str,
		subresource: &'a str,
	},
	Unknown,
}

pub(crate) fn parse_route(path: &str) -> Route<'_> {
	let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
	match segments.as_slice() {
		["version"] => Route::Version,
		["api"] => Route::CoreVersions,
		["apis"] => Route::Groups,
		["api", version, rest @ ..] => resource_route(version.to_string(), rest),
		["apis", group, version, rest @ ..] => resource_route(format!("{group}/{version}"), rest),
		_ => Route::Unknown,
	}
}

fn resource_route<'a>(group_version: String, rest: &[&'a str]) -> Route<'a> {
	match *rest {
		[] => Route::Resources { group_version },
		["namespaces", namespace, resource] => Route::Collection {
			group_version,
			namespace: Some(namespace),
			resource,
		},
		["namespaces", namespace, resource, name] => Route::Object {
			group_version,
			namespace: Some(namespace),
			resource,
			name,
		},
		["namespaces", namespace, resource, name, subresource] => Route::Subresource {
			group_version,
			namespace,
			resource,
			name,
			subresource,
		},
		[resource] => Route::Collection {
			group_version,
			namespace: None,
			resource,
		},
		[resource, name] => Route::Object {
			group_version,
			namespace: None,
			resource,
			name,
		},
		_ => Route::Unknown,
	}
}

/// Equality-only label selector, e.g. `app=vcluster,release=my-vcluster`.
pub(crate) fn selector_matches(selector: &str, labels: Option<&serde_json::Value>) -> bool {
	selector
		.split(',')
		.map(str::trim)
		.filter(|term| !term.is_empty())
		.all(|term| {
			let (key, value) = match term.split_once("==").or_else(|| term.split_once('=')) {
				Some(pair) => pair,
				None => return labels.and_then(|l| l.get(term)).is_some(),
			};
			labels
				.and_then(|l| l.get(key))
				.and_then(|v| v.as_str())
				== Some(value)
		})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_route() {
		assert_eq!(parse_route("/version"), Route::Version);
		assert_eq!(parse_route("/api"), Route::CoreVersions);
		assert_eq!(
			parse_route("/apis/apps/v1"),
			Route::Resources {
				group_version: "apps/v1".to_string()
			}
		);
		assert_eq!(
			parse_route("/api/v1/namespaces/vc/pods"),
			Route::Collection {
				group_version: "v1".to_string(),
				namespace: Some("vc"),
				resource: "pods",
			}
		);
		assert_eq!(
			parse_route("/api/v1/namespaces/vc"),
			Route::Object {
				group_version: "v1".to_string(),
				namespace: None,
				resource: "namespaces",
				name: "vc",
			}
		);
		assert_eq!(
			parse_route("/api/v1/namespaces/vc/pods/vc-0/log"),
			Route::Subresource {
				group_version: "v1".to_string(),
				namespace: "vc",
				resource: "pods",
				name: "vc-0",
				subresource: "log",
			}
		);
		assert_eq!(parse_route("/apis/apps"), Route::Unknown);
	}

	#[test]
	fn test_selector_matches() {
		let labels = json!({"app": "vcluster", "release": "demo"});
		assert!(selector_matches("app=vcluster,release=demo", Some(&labels)));
		assert!(selector_matches("app==vcluster", Some(&labels)));
		assert!(selector_matches("release", Some(&labels)));
		assert!(selector_matches("", None));
		assert!(!selector_matches("app=other", Some(&labels)));
		assert!(!selector_matches("app=vcluster", None));
	}
}
