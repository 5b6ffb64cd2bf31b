//! Collect command handler.
//!
//! Gathers release metadata, logs, resources and object counts of a vCluster
//! and writes them into a single `.tar.gz` bundle.

use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use tracing::{info, instrument};

use crate::{
	collect::{collect_bundle, CollectOptions, CollectTarget},
	config::DebugConfig,
	k8s::{client::HostConnection, tunnel::PodPortForwarder},
	resources::{merge_resources, DEFAULT_HOST_RESOURCES, DEFAULT_VIRTUAL_RESOURCES},
};

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
	/// Name of the vCluster
	pub name: String,

	/// Collect vCluster release info
	#[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
	pub release: bool,

	/// Collect vCluster logs
	#[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
	pub logs: bool,

	/// Collect virtual cluster info
	#[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
	pub virtual_info: bool,

	/// Collect virtual cluster resources. Prefix a resource with '-' to skip a default one
	#[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
	pub virtual_resources: Vec<String>,

	/// Collect host cluster info
	#[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
	pub host_info: bool,

	/// Collect how many objects are in the vCluster
	#[arg(long, action = ArgAction::Set, default_value_t = true, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
	pub count_virtual_cluster_objects: bool,

	/// Collect host resources in vCluster namespace. Prefix a resource with '-' to skip a default one
	#[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
	pub host_resources: Vec<String>,

	/// If specified, will write to the given filename
	#[arg(long)]
	pub output_filename: Option<PathBuf>,

	/// Namespace of the vCluster. Defaults to the namespace of the kube context
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// Kubeconfig context to use
	#[arg(long)]
	pub context: Option<String>,

	/// Config file to use instead of searching for .vcluster-debug.yaml
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// Log level (trace, debug, info, warn, error). Defaults to RUST_LOG, then info
	#[arg(long)]
	pub log_level: Option<String>,
}

/// Run the collect command.
pub fn run<W: Write>(args: CollectArgs, writer: W) -> Result<()> {
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(args, writer))
}

#[instrument(skip_all, fields(name = %args.name))]
async fn run_async<W: Write>(args: CollectArgs, mut writer: W) -> Result<()> {
	let file_config = load_config(&args)?;
	let options = build_options(&args, &file_config);

	let host = HostConnection::connect(args.context.as_deref())
		.await
		.context("connecting to host cluster")?;
	let target = CollectTarget {
		name: args.name.clone(),
		namespace: args
			.namespace
			.clone()
			.unwrap_or_else(|| host.default_namespace().to_string()),
	};
	info!(context = %host.context(), namespace = %target.namespace, "collecting vCluster {}", target.name);

	let forwarder = PodPortForwarder::new(host.client().clone(), &target.namespace);
	let path = tokio::select! {
		result = collect_bundle(host.client(), &target, &options, forwarder) => {
			result.with_context(|| format!("collecting debug information of vCluster {}", target.name))?
		}
		_ = tokio::signal::ctrl_c() => {
			anyhow::bail!("interrupted, no debug information written");
		}
	};

	writeln!(writer, "{}", path.display())?;
	Ok(())
}

fn load_config(args: &CollectArgs) -> Result<DebugConfig> {
	let config = match &args.config {
		Some(path) => Some(DebugConfig::load_from_file(path)?),
		None => {
			let cwd = std::env::current_dir().context("getting current directory")?;
			DebugConfig::load_from_directory(&cwd)?
		}
	};
	Ok(config.unwrap_or_default())
}

/// Combine defaults, file overrides and flag overrides, in that order.
pub fn build_options(args: &CollectArgs, file_config: &DebugConfig) -> CollectOptions {
	let host_overrides: Vec<&String> = file_config
		.host_resources
		.iter()
		.chain(&args.host_resources)
		.collect();
	let virtual_overrides: Vec<&String> = file_config
		.virtual_resources
		.iter()
		.chain(&args.virtual_resources)
		.collect();

	let mut options = CollectOptions {
		release: args.release,
		logs: args.logs,
		host_info: args.host_info,
		host_resources: merge_resources(DEFAULT_HOST_RESOURCES, &host_overrides),
		virtual_info: args.virtual_info,
		virtual_resources: merge_resources(DEFAULT_VIRTUAL_RESOURCES, &virtual_overrides),
		count_virtual_objects: args.count_virtual_cluster_objects,
		output: args.output_filename.clone(),
		..Default::default()
	};
	file_config.apply_to(&mut options.bootstrap);
	options
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use clap::Parser;

	use super::*;

	#[derive(Parser)]
	struct TestCli {
		#[command(flatten)]
		args: CollectArgs,
	}

	fn parse(argv: &[&str]) -> CollectArgs {
		TestCli::parse_from(std::iter::once("vcluster-debug").chain(argv.iter().copied())).args
	}

	#[test]
	fn test_defaults() {
		let args = parse(&["my-vcluster"]);
		assert_eq!(args.name, "my-vcluster");
		assert!(args.release && args.logs && args.virtual_info && args.host_info);
		assert!(args.count_virtual_cluster_objects);
		assert!(args.host_resources.is_empty());
		assert!(args.output_filename.is_none());

		let options = build_options(&args, &DebugConfig::default());
		assert_eq!(options.host_resources, DEFAULT_HOST_RESOURCES);
		assert_eq!(options.virtual_resources, DEFAULT_VIRTUAL_RESOURCES);
	}

	#[test]
	fn test_bool_flags() {
		let args = parse(&[
			"my-vcluster",
			"--release=false",
			"--logs",
			"--virtual-info=false",
			"--host-info=true",
			"--count-virtual-cluster-objects=false",
		]);
		assert!(!args.release);
		assert!(args.logs);
		assert!(!args.virtual_info);
		assert!(args.host_info);
		assert!(!args.count_virtual_cluster_objects);
	}

	#[test]
	fn test_bare_bool_flag_leaves_next_argument() {
		let args = parse(&["--logs", "my-vcluster"]);
		assert_eq!(args.name, "my-vcluster");
		assert!(args.logs);

		let args = parse(&["--release", "my-vcluster", "--virtual-info"]);
		assert_eq!(args.name, "my-vcluster");
		assert!(args.release && args.virtual_info);
	}

	#[test]
	fn test_bool_value_requires_equals() {
		// `false` becomes the vCluster name, the flag stays set
		let args = parse(&["--release", "false"]);
		assert_eq!(args.name, "false");
		assert!(args.release);

		assert!(TestCli::try_parse_from(["vcluster-debug", "my-vcluster", "--logs", "no"]).is_err());
	}

	#[test]
	fn test_resource_overrides() {
		let args = parse(&[
			"my-vcluster",
			"--host-resources=-events,-pvc,secrets",
			"--virtual-resources",
			"leases.coordination.k8s.io",
		]);
		assert_eq!(args.host_resources, ["-events", "-pvc", "secrets"]);

		let options = build_options(&args, &DebugConfig::default());
		assert!(!options.host_resources.contains(&"events".to_string()));
		assert!(!options.host_resources.contains(&"pvc".to_string()));
		assert_eq!(options.host_resources.last().map(String::as_str), Some("secrets"));
		assert_eq!(
			options.virtual_resources.last().map(String::as_str),
			Some("leases.coordination.k8s.io")
		);
	}

	#[test]
	fn test_file_config_is_applied_before_flags() {
		let args = parse(&["my-vcluster", "--host-resources=configmaps,-pods,leases"]);
		let file_config = DebugConfig {
			host_resources: vec!["secrets".to_string(), "-services".to_string()],
			readiness_timeout_seconds: Some(30),
			..Default::default()
		};

		let options = build_options(&args, &file_config);

		assert!(!options.host_resources.contains(&"services".to_string()));
		assert!(!options.host_resources.contains(&"pods".to_string()));
		assert_eq!(
			&options.host_resources[options.host_resources.len() - 2..],
			["secrets", "leases"]
		);
		assert_eq!(options.bootstrap.readiness_timeout, Duration::from_secs(30));
		assert_eq!(options.bootstrap.pod_locate_timeout, Duration::from_secs(30));
	}

	#[test]
	fn test_namespace_and_output() {
		let args = parse(&[
			"my-vcluster",
			"-n",
			"vcluster-my-vcluster",
			"--output-filename",
			"/tmp/bundle.tar.gz",
		]);
		assert_eq!(args.namespace.as_deref(), Some("vcluster-my-vcluster"));

		let options = build_options(&args, &DebugConfig::default());
		assert_eq!(options.output, Some(PathBuf::from("/tmp/bundle.tar.gz")));
	}
}
