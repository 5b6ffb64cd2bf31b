//! Shared fixtures for tests running against the HTTP mock server.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_mock::RunningHttpMockK8sServer;
use kube::Client;
use serde_json::{json, Value};
use vcluster_debug::k8s::client::HostConnection;

pub const NAME: &str = "demo";
pub const NAMESPACE: &str = "vcluster-demo";

/// A client for the mock server, as the CLI would build it.
pub async fn client_for(server: &RunningHttpMockK8sServer) -> Client {
	HostConnection::from_kubeconfig(server.kubeconfig(), None)
		.await
		.expect("connection should succeed")
		.client()
		.clone()
}

pub fn pod(namespace: &str, name: &str, labels: Value) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "Pod",
		"metadata": {
			"name": name,
			"namespace": namespace,
			"labels": labels,
			"creationTimestamp": "2026-01-01T00:00:00Z",
		},
		"spec": {"containers": [{"name": "syncer", "image": "ghcr.io/loft-sh/vcluster:0.24.0"}]}
	})
}

/// The control-plane pod of [`NAME`].
pub fn vcluster_pod(name: &str, created: &str, restarts: i32) -> Value {
	let mut pod = pod(NAMESPACE, name, json!({"app": "vcluster", "release": NAME}));
	pod["metadata"]["creationTimestamp"] = json!(created);
	pod["status"] = json!({
		"phase": "Running",
		"containerStatuses": [{
			"name": "syncer",
			"image": "ghcr.io/loft-sh/vcluster:0.24.0",
			"imageID": "",
			"ready": true,
			"restartCount": restarts,
		}]
	});
	pod
}

pub fn config_map(namespace: &str, name: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {"name": name, "namespace": namespace},
		"data": {"Corefile": ".:1053 {\n    errors\n}\n"}
	})
}

pub fn secret(namespace: &str, name: &str, labels: Value, data: &[(&str, &[u8])]) -> Value {
	let data: serde_json::Map<String, Value> = data
		.iter()
		.map(|(k, v)| (k.to_string(), json!(STANDARD.encode(v))))
		.collect();
	json!({
		"apiVersion": "v1",
		"kind": "Secret",
		"metadata": {"name": name, "namespace": namespace, "labels": labels},
		"type": "Opaque",
		"data": data
	})
}

/// The `vc-<name>` secret holding a kubeconfig for the virtual API server.
pub fn virtual_kubeconfig_secret() -> Value {
	let kubeconfig = indoc::indoc! {"
		apiVersion: v1
		kind: Config
		clusters:
		  - name: my-vcluster
		    cluster:
		      server: https://demo.vcluster-demo.svc:443
		      insecure-skip-tls-verify: true
		contexts:
		  - name: my-vcluster
		    context:
		      cluster: my-vcluster
		      user: my-vcluster
		current-context: my-vcluster
		users:
		  - name: my-vcluster
		    user:
		      token: virtual-token
	"};
	secret(
		NAMESPACE,
		&format!("vc-{NAME}"),
		json!({}),
		&[("config", kubeconfig.as_bytes())],
	)
}

/// A Helm release secret, `release` being base64(gzip(json)) like Helm stores it.
pub fn helm_release_secret(revision: i64, status: &str) -> Value {
	use std::io::Write;

	use flate2::{write::GzEncoder, Compression};

	let release = json!({
		"name": NAME,
		"namespace": NAMESPACE,
		"version": revision,
		"info": {"status": status, "description": "Install complete"},
		"chart": {"metadata": {"name": "vcluster", "version": "0.24.0", "appVersion": "0.24.0"}},
		"config": {"sync": {"toHost": {"ingresses": {"enabled": true}}}}
	});
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder
		.write_all(&serde_json::to_vec(&release).unwrap())
		.unwrap();
	let payload = STANDARD.encode(encoder.finish().unwrap());

	secret(
		NAMESPACE,
		&format!("sh.helm.release.v1.{NAME}.v{revision}"),
		json!({"owner": "helm", "name": NAME, "status": status}),
		&[("release", payload.as_bytes())],
	)
}
