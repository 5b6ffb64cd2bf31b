//! The archive name defaults to `vcluster.<name>.debug.<unix>.tar.gz` in the
//! working directory. Kept in its own binary since it changes the process
//! working directory.

mod common;

use common::{client_for, NAME, NAMESPACE};
use k8s_mock::HttpMockK8sServer;
use tempfile::TempDir;
use tokio::net::TcpListener;
use vcluster_debug::{
	collect::{collect_bundle, CollectOptions, CollectTarget},
	k8s::tunnel::{ForwardFuture, PortForwarder, TunnelError},
	resources::{merge_resources, DEFAULT_HOST_RESOURCES, DEFAULT_VIRTUAL_RESOURCES},
};

struct NoForwarding;

impl PortForwarder for NoForwarding {
	fn forward(&self, _pod: &str, _port: u16, _listener: TcpListener) -> ForwardFuture {
		Box::pin(async { Err::<(), _>(TunnelError::Closed) })
	}
}

fn exclude_all(defaults: &[&str]) -> Vec<String> {
	defaults.iter().map(|r| format!("-{r}")).collect()
}

#[tokio::test]
async fn test_all_phases_disabled_writes_default_archive() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let cwd = TempDir::new().unwrap();
	std::env::set_current_dir(cwd.path()).unwrap();

	let options = CollectOptions {
		release: false,
		logs: false,
		host_info: false,
		host_resources: merge_resources(DEFAULT_HOST_RESOURCES, &exclude_all(DEFAULT_HOST_RESOURCES)),
		virtual_info: false,
		virtual_resources: merge_resources(
			DEFAULT_VIRTUAL_RESOURCES,
			&exclude_all(DEFAULT_VIRTUAL_RESOURCES),
		),
		count_virtual_objects: false,
		output: None,
		..Default::default()
	};
	let target = CollectTarget {
		name: NAME.to_string(),
		namespace: NAMESPACE.to_string(),
	};

	assert!(options.host_resources.is_empty());
	assert!(options.virtual_resources.is_empty());

	let written = collect_bundle(&client_for(&server).await, &target, &options, NoForwarding)
		.await
		.expect("collection should succeed");

	let file_name = written.file_name().unwrap().to_string_lossy().into_owned();
	let unix_time = file_name
		.strip_prefix("vcluster.demo.debug.")
		.and_then(|rest| rest.strip_suffix(".tar.gz"))
		.unwrap_or_else(|| panic!("unexpected archive name {file_name}"));
	assert!(unix_time.parse::<u64>().is_ok());
	assert!(cwd.path().join(&written).is_file());
}
