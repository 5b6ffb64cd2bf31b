//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections.

use std::collections::HashMap;

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::{
	discovery::MockDiscovery,
	routes::{parse_route, selector_matches, Route},
};

/// Continue token handed out when a list was cut by `limit`.
pub const CONTINUE_TOKEN: &str = "mock-continue";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery: MockDiscovery,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Current container logs keyed by `<namespace>/<pod>`.
	#[builder(default)]
	pod_logs: HashMap<String, String>,
	/// Logs of the previous container instance keyed by `<namespace>/<pod>`.
	#[builder(default)]
	previous_pod_logs: HashMap<String, String>,
	/// Plural resource names whose list and get requests fail with 500.
	#[builder(default)]
	broken_resources: Vec<String>,
	#[builder(default = "v1.31.0".to_string())]
	git_version: String,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
}

#[derive(Debug)]
struct StoredObject {
	group_version: String,
	resource: String,
	namespace: Option<String>,
	name: String,
	manifest: Value,
}

struct MockApi {
	discovery: MockDiscovery,
	objects: Vec<StoredObject>,
	pod_logs: HashMap<String, String>,
	previous_pod_logs: HashMap<String, String>,
	broken_resources: Vec<String>,
	git_version: String,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut objects: Vec<StoredObject> = self
			.resources
			.into_iter()
			.filter_map(|manifest| store(manifest, &self.discovery))
			.collect();

		let has_default_namespace = objects
			.iter()
			.any(|o| o.resource == "namespaces" && o.name == "default");
		if !has_default_namespace {
			let manifest = json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {"name": "default"}
			});
			objects.extend(store(manifest, &self.discovery));
		}

		objects.sort_by(|a, b| {
			(&a.group_version, &a.resource, &a.namespace, &a.name).cmp(&(
				&b.group_version,
				&b.resource,
				&b.namespace,
				&b.name,
			))
		});

		let api = MockApi {
			discovery: self.discovery,
			objects,
			pod_logs: self.pod_logs,
			previous_pod_logs: self.previous_pod_logs,
			broken_resources: self.broken_resources,
			git_version: self.git_version,
		};

		Mock::given(method("GET"))
			.respond_with(api)
			.mount(&server)
			.await;

		RunningHttpMockK8sServer { server }
	}
}

/// Place a manifest under the API path derived from discovery data.
fn store(manifest: Value, discovery: &MockDiscovery) -> Option<StoredObject> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let metadata = manifest.get("metadata")?;
	let name = metadata.get("name")?.as_str()?.to_string();

	let resource = discovery.resource_for_kind(api_version, kind)?;
	let namespace = resource.namespaced.then(|| {
		metadata
			.get("namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
			.to_string()
	});
	trace!(resource = %resource.name, name = %name, "Registered resource");

	Some(StoredObject {
		group_version: api_version.to_string(),
		resource: resource.name.clone(),
		namespace,
		name,
		manifest,
	})
}

impl Respond for MockApi {
	fn respond(&self, request: &Request) -> ResponseTemplate {
		let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
		trace!(path = %request.url.path(), ?query, "GET");

		match parse_route(request.url.path()) {
			Route::Version => ResponseTemplate::new(200).set_body_json(self.version()),
			Route::CoreVersions => ResponseTemplate::new(200).set_body_json(self.core_versions()),
			Route::Groups => ResponseTemplate::new(200).set_body_json(self.groups()),
			Route::Resources { group_version } => match self.resource_list(&group_version) {
				Some(body) => ResponseTemplate::new(200).set_body_json(body),
				None => not_found(&group_version),
			},
			Route::Collection {
				group_version,
				namespace,
				resource,
			} => self.list(&group_version, namespace, resource, &query, accepts_metadata(request)),
			Route::Object {
				group_version,
				namespace,
				resource,
				name,
			} => self.get(&group_version, namespace, resource, name),
			Route::Subresource {
				group_version,
				namespace,
				resource: "pods",
				name,
				subresource: "log",
			} if group_version == "v1" => self.logs(namespace, name, &query),
			_ => not_found(request.url.path()),
		}
	}
}

impl MockApi {
	fn version(&self) -> Value {
		let mut parts = self.git_version.trim_start_matches('v').split('.');
		json!({
			"major": parts.next().unwrap_or("1"),
			"minor": parts.next().unwrap_or("31"),
			"gitVersion": self.git_version,
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.22.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})
	}

	fn core_versions(&self) -> Value {
		let versions: Vec<&str> = self
			.discovery
			.groups
			.iter()
			.filter(|g| g.is_core())
			.map(|g| g.group_version.as_str())
			.collect();
		json!({
			"kind": "APIVersions",
			"versions": versions,
			"serverAddressByClientCIDRs": []
		})
	}

	fn groups(&self) -> Value {
		let mut groups: Vec<(&str, Vec<Value>)> = Vec::new();
		for gv in self.discovery.groups.iter().filter(|g| !g.is_core()) {
			let (group, version) = gv.split();
			let entry = json!({"groupVersion": gv.group_version, "version": version});
			match groups.iter_mut().find(|(name, _)| *name == group) {
				Some((_, versions)) => versions.push(entry),
				None => groups.push((group, vec![entry])),
			}
		}

		let groups: Vec<Value> = groups
			.into_iter()
			.map(|(name, versions)| {
				json!({
					"name": name,
					"versions": versions,
					"preferredVersion": versions[0],
				})
			})
			.collect();
		json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})
	}

	fn resource_list(&self, group_version: &str) -> Option<Value> {
		let gv = self.discovery.group(group_version)?;
		let resources: Vec<Value> = gv.resources.iter().map(|r| r.to_json()).collect();
		Some(json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": group_version,
			"resources": resources
		}))
	}

	fn list(
		&self,
		group_version: &str,
		namespace: Option<&str>,
		resource: &str,
		query: &HashMap<String, String>,
		metadata_only: bool,
	) -> ResponseTemplate {
		let Some(api_resource) = self.discovery.resource(group_version, resource) else {
			return not_found(resource);
		};
		if self.is_broken(resource) {
			return internal_error(resource);
		}

		let selector = query.get("labelSelector").map(String::as_str).unwrap_or("");
		let mut items: Vec<&StoredObject> = self
			.objects
			.iter()
			.filter(|o| o.group_version == group_version && o.resource == resource)
			.filter(|o| namespace.is_none() || o.namespace.as_deref() == namespace)
			.filter(|o| selector_matches(selector, o.manifest.pointer("/metadata/labels")))
			.collect();

		let mut list_metadata = json!({"resourceVersion": "1"});
		let limit = query
			.get("limit")
			.and_then(|l| l.parse::<usize>().ok())
			.filter(|l| *l > 0);
		if let Some(limit) = limit {
			if items.len() > limit {
				list_metadata["continue"] = json!(CONTINUE_TOKEN);
				list_metadata["remainingItemCount"] = json!(items.len() - limit);
				items.truncate(limit);
			}
		}

		let body = if metadata_only {
			let items: Vec<Value> = items
				.iter()
				.map(|o| {
					json!({
						"apiVersion": "meta.k8s.io/v1",
						"kind": "PartialObjectMetadata",
						"metadata": o.manifest.get("metadata").cloned().unwrap_or_else(|| json!({})),
					})
				})
				.collect();
			json!({
				"apiVersion": "meta.k8s.io/v1",
				"kind": "PartialObjectMetadataList",
				"metadata": list_metadata,
				"items": items
			})
		} else {
			// typed lists omit the type of their items
			let items: Vec<Value> = items
				.iter()
				.map(|o| {
					let mut item = o.manifest.clone();
					if let Some(map) = item.as_object_mut() {
						map.remove("apiVersion");
						map.remove("kind");
					}
					item
				})
				.collect();
			json!({
				"apiVersion": group_version,
				"kind": format!("{}List", api_resource.kind),
				"metadata": list_metadata,
				"items": items
			})
		};
		ResponseTemplate::new(200).set_body_json(body)
	}

	fn get(
		&self,
		group_version: &str,
		namespace: Option<&str>,
		resource: &str,
		name: &str,
	) -> ResponseTemplate {
		if self.is_broken(resource) {
			return internal_error(resource);
		}
		self.objects
			.iter()
			.find(|o| {
				o.group_version == group_version
					&& o.resource == resource
					&& o.namespace.as_deref() == namespace
					&& o.name == name
			})
			.map(|o| ResponseTemplate::new(200).set_body_json(&o.manifest))
			.unwrap_or_else(|| not_found(&format!("{resource} \"{name}\"")))
	}

	fn logs(&self, namespace: &str, pod: &str, query: &HashMap<String, String>) -> ResponseTemplate {
		let previous = query.get("previous").is_some_and(|p| p == "true");
		let source = if previous {
			&self.previous_pod_logs
		} else {
			&self.pod_logs
		};
		match source.get(&format!("{namespace}/{pod}")) {
			Some(logs) => ResponseTemplate::new(200).set_body_string(logs.clone()),
			None => status(
				400,
				"BadRequest",
				format!("container in pod \"{pod}\" has no logs (previous={previous})"),
			),
		}
	}

	fn is_broken(&self, resource: &str) -> bool {
		self.broken_resources.iter().any(|r| r == resource)
	}
}

fn accepts_metadata(request: &Request) -> bool {
	request
		.headers
		.get("accept")
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.contains("PartialObjectMetadata"))
}

fn status(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn not_found(what: &str) -> ResponseTemplate {
	status(404, "NotFound", format!("{what} not found"))
}

fn internal_error(resource: &str) -> ResponseTemplate {
	status(
		500,
		"InternalError",
		format!("an error on the server has prevented listing {resource}"),
	)
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// HTTP methods of all requests received so far.
	pub async fn received_methods(&self) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.map(|r| r.method.to_string())
			.collect()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}
