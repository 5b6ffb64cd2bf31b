//! The collection pipeline: every phase writes into a private staging
//! directory which is packaged into a single archive at the end.
//!
//! Phases run strictly in order and the first failure aborts the run. The
//! staging directory is removed whatever the outcome, including when the
//! pipeline future is dropped on interrupt.

use std::{
	fmt, fs, io,
	path::{Path, PathBuf},
	time::{SystemTime, UNIX_EPOCH},
};

use kube::Client;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
	archive::{self, ArchiveError},
	k8s::{
		bootstrap::{
			BootstrapError, BootstrapOptions, ReadinessProbe, ServiceAccountProbe,
			VirtualAccessBootstrapper,
		},
		client::{write_version, VersionError},
		collector::{CollectorError, ResourceCollector},
		counter::{CountError, ObjectCounter},
		logs::{LogCollector, LogsError},
		release::{latest_release, ReleaseError},
		tunnel::PortForwarder,
		vcluster_pod_selector,
	},
	resources::{DEFAULT_HOST_RESOURCES, DEFAULT_VIRTUAL_RESOURCES},
};

/// Kind prefix of generated archive names.
pub const BUNDLE_KIND: &str = "vcluster";

/// A step of the pipeline, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Staging,
	Release,
	Logs,
	HostInfo,
	HostResources,
	Bootstrap,
	VirtualInfo,
	VirtualResources,
	CountObjects,
	Archive,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let what = match self {
			Phase::Staging => "create temp dir",
			Phase::Release => "get vCluster release information",
			Phase::Logs => "get logs",
			Phase::HostInfo => "get host cluster information",
			Phase::HostResources => "get host resources",
			Phase::Bootstrap => "get virtual cluster config",
			Phase::VirtualInfo => "get virtual cluster information",
			Phase::VirtualResources => "get virtual resources",
			Phase::CountObjects => "count virtual resources",
			Phase::Archive => "write archive",
		};
		f.write_str(what)
	}
}

/// Underlying failure of a phase.
#[derive(Debug, Error)]
pub enum PhaseError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Release(#[from] ReleaseError),
	#[error(transparent)]
	Logs(#[from] LogsError),
	#[error(transparent)]
	Version(#[from] VersionError),
	#[error(transparent)]
	Collector(#[from] CollectorError),
	#[error(transparent)]
	Bootstrap(#[from] BootstrapError),
	#[error(transparent)]
	Count(#[from] CountError),
	#[error(transparent)]
	Archive(#[from] ArchiveError),
}

#[derive(Debug, Error)]
#[error("failed to {phase}")]
pub struct CollectError {
	pub phase: Phase,
	#[source]
	pub source: PhaseError,
}

/// Tag an error with the phase it happened in.
fn at<E: Into<PhaseError>>(phase: Phase) -> impl FnOnce(E) -> CollectError {
	move |e| CollectError {
		phase,
		source: e.into(),
	}
}

/// The vCluster to collect from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectTarget {
	pub name: String,
	/// Host namespace the vCluster runs in.
	pub namespace: String,
}

/// Which phases run and where the archive goes.
#[derive(Debug, Clone)]
pub struct CollectOptions {
	pub release: bool,
	pub logs: bool,
	pub host_info: bool,
	/// Resource tokens collected from the vCluster's host namespace.
	pub host_resources: Vec<String>,
	pub virtual_info: bool,
	/// Resource tokens collected from all namespaces of the virtual cluster.
	pub virtual_resources: Vec<String>,
	pub count_virtual_objects: bool,
	/// Defaults to [`default_output_filename`] in the working directory.
	pub output: Option<PathBuf>,
	pub bootstrap: BootstrapOptions,
}

impl Default for CollectOptions {
	fn default() -> Self {
		Self {
			release: true,
			logs: true,
			host_info: true,
			host_resources: DEFAULT_HOST_RESOURCES.iter().map(|r| r.to_string()).collect(),
			virtual_info: true,
			virtual_resources: DEFAULT_VIRTUAL_RESOURCES.iter().map(|r| r.to_string()).collect(),
			count_virtual_objects: true,
			output: None,
			bootstrap: BootstrapOptions::default(),
		}
	}
}

impl CollectOptions {
	fn needs_virtual_access(&self) -> bool {
		self.virtual_info || !self.virtual_resources.is_empty() || self.count_virtual_objects
	}
}

/// `<kind>.<name>.debug.<unix_time>.tar.gz`
pub fn default_output_filename(kind: &str, name: &str, unix_time: u64) -> String {
	format!("{kind}.{name}.debug.{unix_time}.tar.gz")
}

/// Collect a debug bundle, probing virtual cluster readiness through its
/// `default/default` service account.
pub async fn collect_bundle<F: PortForwarder>(
	host: &Client,
	target: &CollectTarget,
	options: &CollectOptions,
	forwarder: F,
) -> Result<PathBuf, CollectError> {
	collect_bundle_with_probe(host, target, options, forwarder, ServiceAccountProbe).await
}

/// Collect a debug bundle and return the path of the written archive.
#[instrument(skip_all, fields(name = %target.name, namespace = %target.namespace))]
pub async fn collect_bundle_with_probe<F: PortForwarder, P: ReadinessProbe>(
	host: &Client,
	target: &CollectTarget,
	options: &CollectOptions,
	forwarder: F,
	probe: P,
) -> Result<PathBuf, CollectError> {
	let output = match &options.output {
		Some(path) => path.clone(),
		None => {
			let now = SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.unwrap_or_default()
				.as_secs();
			PathBuf::from(default_output_filename(BUNDLE_KIND, &target.name, now))
		}
	};

	let staging = TempDir::new().map_err(at(Phase::Staging))?;
	debug!(staging = %staging.path().display(), "created staging directory");

	collect_host(host, target, options, &staging.path().join("host")).await?;

	if options.needs_virtual_access() {
		let access = VirtualAccessBootstrapper::new(
			host.clone(),
			&target.name,
			&target.namespace,
			forwarder,
		)
		.with_options(options.bootstrap.clone())
		.with_probe(probe)
		.bootstrap()
		.await
		.map_err(at(Phase::Bootstrap))?;

		let virtual_dir = staging.path().join("virtual");
		let result = collect_virtual(&access.client, options, &virtual_dir).await;
		access.close().await;
		result?;
	}

	write_archive(staging.path(), &output)?;
	if let Err(e) = staging.close() {
		debug!(error = %e, "failed to remove staging directory");
	}

	info!("Wrote debug information to file {}", output.display());
	Ok(output)
}

/// Package `staging` into `output`, leaving no partial archive behind.
fn write_archive(staging: &Path, output: &Path) -> Result<(), CollectError> {
	if let Err(e) = archive::compress(staging, output) {
		if let Err(remove) = fs::remove_file(output) {
			if remove.kind() != io::ErrorKind::NotFound {
				debug!(error = %remove, "failed to remove partial archive");
			}
		}
		return Err(at(Phase::Archive)(e));
	}
	Ok(())
}

async fn collect_host(
	host: &Client,
	target: &CollectTarget,
	options: &CollectOptions,
	host_dir: &Path,
) -> Result<(), CollectError> {
	if options.release {
		info!("Get vCluster release information");
		let release = latest_release(host, &target.name, &target.namespace)
			.await
			.map_err(at(Phase::Release))?;
		match release {
			Some(release) => {
				release.write_to(host_dir).map_err(at(Phase::Release))?;
			}
			None => info!("Couldn't find vCluster release"),
		}
	}

	if options.logs {
		info!("Get vCluster logs...");
		LogCollector::new(host.clone(), &target.namespace)
			.capture(
				&target.name,
				&vcluster_pod_selector(&target.name),
				&host_dir.join("logs"),
			)
			.await
			.map_err(at(Phase::Logs))?;
	}

	if options.host_info {
		info!("Get host cluster information");
		write_version(host, host_dir)
			.await
			.map_err(at(Phase::HostInfo))?;
	}

	if !options.host_resources.is_empty() {
		info!("Collect host cluster resources");
		ResourceCollector::new(host.clone())
			.collect_all(
				options.host_resources.as_slice(),
				&target.namespace,
				&host_dir.join("resources"),
			)
			.await
			.map_err(at(Phase::HostResources))?;
	}

	Ok(())
}

pub(crate) async fn collect_virtual(
	client: &Client,
	options: &CollectOptions,
	virtual_dir: &Path,
) -> Result<(), CollectError> {
	if options.virtual_info {
		info!("Get virtual cluster information");
		write_version(client, virtual_dir)
			.await
			.map_err(at(Phase::VirtualInfo))?;
	}

	if !options.virtual_resources.is_empty() {
		info!("Collect virtual cluster resources");
		ResourceCollector::new(client.clone())
			.collect_all(
				options.virtual_resources.as_slice(),
				"",
				&virtual_dir.join("resources"),
			)
			.await
			.map_err(at(Phase::VirtualResources))?;
	}

	if options.count_virtual_objects {
		info!("Count virtual cluster resources");
		let counts = ObjectCounter::new(client.clone())
			.count_all()
			.await
			.map_err(at(Phase::CountObjects))?;
		counts
			.write_summary(virtual_dir)
			.map_err(at(Phase::CountObjects))?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use k8s_mock::HttpMockK8sServer;
	use serde_json::{json, Value};

	use super::*;
	use crate::k8s::{client::HostConnection, counter::SUMMARY_FILE};

	fn config_map(namespace: &str, name: &str) -> Value {
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": name, "namespace": namespace},
			"data": {"Corefile": ".:53 {\n    errors\n}\n"}
		})
	}

	#[tokio::test]
	async fn test_virtual_phases_write_outputs() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![
				config_map("kube-system", "coredns"),
				config_map("default", "kube-root-ca.crt"),
			])
			.build()
			.start()
			.await;
		let client = HostConnection::from_kubeconfig(server.kubeconfig(), None)
			.await
			.unwrap()
			.client()
			.clone();
		let staging = TempDir::new().unwrap();
		let virtual_dir = staging.path().join("virtual");
		let options = CollectOptions {
			virtual_resources: vec!["configmaps".to_string()],
			..Default::default()
		};

		collect_virtual(&client, &options, &virtual_dir)
			.await
			.expect("virtual phases should succeed");

		let version: Value =
			serde_json::from_str(&fs::read_to_string(virtual_dir.join("version.json")).unwrap())
				.unwrap();
		assert_eq!(version["gitVersion"], "v1.31.0");

		let resources = virtual_dir.join("resources").join("configmaps");
		assert!(resources.join("kube-system").join("coredns.yaml").is_file());
		assert!(resources.join("default").join("kube-root-ca.crt.yaml").is_file());

		let summary: Value =
			serde_json::from_str(&fs::read_to_string(virtual_dir.join(SUMMARY_FILE)).unwrap())
				.unwrap();
		assert_eq!(summary["/v1, Resource=configmaps"]["count"], 2);
		assert_eq!(
			summary["/v1, Resource=namespaces"]["names"],
			json!(["default"])
		);

		assert!(server.received_methods().await.iter().all(|m| m == "GET"));
	}

	#[tokio::test]
	async fn test_virtual_phases_skip_disabled_outputs() {
		let server = HttpMockK8sServer::builder().build().start().await;
		let client = HostConnection::from_kubeconfig(server.kubeconfig(), None)
			.await
			.unwrap()
			.client()
			.clone();
		let staging = TempDir::new().unwrap();
		let virtual_dir = staging.path().join("virtual");
		let options = CollectOptions {
			virtual_info: false,
			virtual_resources: Vec::new(),
			count_virtual_objects: true,
			..Default::default()
		};

		collect_virtual(&client, &options, &virtual_dir).await.unwrap();

		assert!(virtual_dir.join(SUMMARY_FILE).is_file());
		assert!(!virtual_dir.join("version.json").exists());
		assert!(!virtual_dir.join("resources").exists());
	}

	#[cfg(unix)]
	#[test]
	fn test_failed_archive_is_removed() {
		let staging = TempDir::new().unwrap();
		fs::create_dir_all(staging.path().join("host")).unwrap();
		fs::write(staging.path().join("host/version.json"), "{}").unwrap();
		// a dangling link cannot be archived
		std::os::unix::fs::symlink(
			staging.path().join("gone"),
			staging.path().join("host/zz-broken"),
		)
		.unwrap();
		let out = TempDir::new().unwrap();
		let output = out.path().join("bundle.tar.gz");

		let error = write_archive(staging.path(), &output).unwrap_err();

		assert_eq!(error.phase, Phase::Archive);
		assert!(!output.exists());
	}

	#[test]
	fn test_written_archive_is_kept() {
		let staging = TempDir::new().unwrap();
		fs::write(staging.path().join("release.json"), "{}").unwrap();
		let out = TempDir::new().unwrap();
		let output = out.path().join("bundle.tar.gz");

		write_archive(staging.path(), &output).unwrap();

		assert!(output.is_file());
	}

	#[test]
	fn test_default_output_filename() {
		assert_eq!(
			default_output_filename(BUNDLE_KIND, "my-vcluster", 1_767_225_600),
			"vcluster.my-vcluster.debug.1767225600.tar.gz"
		);
	}

	#[test]
	fn test_virtual_access_needed() {
		let mut options = CollectOptions {
			virtual_info: false,
			virtual_resources: Vec::new(),
			count_virtual_objects: false,
			..Default::default()
		};
		assert!(!options.needs_virtual_access());

		options.count_virtual_objects = true;
		assert!(options.needs_virtual_access());

		options.count_virtual_objects = false;
		options.virtual_resources = vec!["pods".to_string()];
		assert!(options.needs_virtual_access());
	}

	#[test]
	fn test_error_names_phase() {
		let error = at::<io::Error>(Phase::Staging)(io::Error::other("disk full"));
		assert_eq!(error.to_string(), "failed to create temp dir");
		assert_eq!(error.phase, Phase::Staging);
		assert_eq!(
			std::error::Error::source(&error).map(|e| e.to_string()),
			Some("disk full".to_string())
		);
	}
}
