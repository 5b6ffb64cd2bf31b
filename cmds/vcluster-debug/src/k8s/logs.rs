//! Capture of vCluster control-plane pod logs.

use std::{
	io,
	path::{Path, PathBuf},
};

use k8s_openapi::api::core::v1::Pod;
use kube::{
	api::{ListParams, LogParams},
	Api, Client,
};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum LogsError {
	#[error("failed to list pods in vCluster {name}")]
	ListPods {
		name: String,
		#[source]
		source: kube::Error,
	},

	#[error("failed to write {}", path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Files written for one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedLogs {
	pub current: PathBuf,
	pub previous: Option<PathBuf>,
}

/// Writes logs of every pod matching a label selector into one directory.
///
/// A failing log request does not fail the capture: the error text is
/// written to `<pod>.error.log` instead of `<pod>.log`.
pub struct LogCollector {
	pods: Api<Pod>,
}

impl LogCollector {
	pub fn new(client: Client, namespace: &str) -> Self {
		Self {
			pods: Api::namespaced(client, namespace),
		}
	}

	#[instrument(skip_all, fields(selector = %selector, dir = %dir.display()))]
	pub async fn capture(
		&self,
		name: &str,
		selector: &str,
		dir: &Path,
	) -> Result<Vec<CapturedLogs>, LogsError> {
		let write_err = |path: &Path, source: io::Error| LogsError::Write {
			path: path.to_path_buf(),
			source,
		};
		std::fs::create_dir_all(dir).map_err(|e| write_err(dir, e))?;

		let list = self
			.pods
			.list(&ListParams::default().labels(selector))
			.await
			.map_err(|source| LogsError::ListPods {
				name: name.to_string(),
				source,
			})?;

		let mut captured = Vec::with_capacity(list.items.len());
		for pod in &list.items {
			let Some(pod_name) = pod.metadata.name.as_deref() else {
				continue;
			};
			let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

			info!(pod = %pod_name, "Capture pod {namespace}/{pod_name} logs");
			let current = self
				.capture_one(pod_name, false, dir)
				.await
				.map_err(|(path, e)| write_err(&path, e))?;

			let previous = if restarted(pod) {
				info!(pod = %pod_name, "Capture previous pod {namespace}/{pod_name} logs");
				Some(
					self.capture_one(pod_name, true, dir)
						.await
						.map_err(|(path, e)| write_err(&path, e))?,
				)
			} else {
				None
			};

			captured.push(CapturedLogs { current, previous });
		}
		Ok(captured)
	}

	/// Write the logs, or the error fetching them, to a file named after the pod.
	async fn capture_one(
		&self,
		pod: &str,
		previous: bool,
		dir: &Path,
	) -> Result<PathBuf, (PathBuf, io::Error)> {
		let params = LogParams {
			previous,
			..Default::default()
		};
		let (suffix, content) = match self.pods.logs(pod, &params).await {
			Ok(logs) => ("log", logs),
			Err(e) => ("error.log", e.to_string()),
		};

		let path = dir.join(log_file_name(pod, previous, suffix));
		std::fs::write(&path, content).map_err(|e| (path.clone(), e))?;
		Ok(path)
	}
}

fn log_file_name(pod: &str, previous: bool, suffix: &str) -> String {
	if previous {
		format!("{pod}.previous.{suffix}")
	} else {
		format!("{pod}.{suffix}")
	}
}

/// Whether the first container of `pod` has restarted at least once.
fn restarted(pod: &Pod) -> bool {
	pod.status
		.as_ref()
		.and_then(|status| status.container_statuses.as_ref())
		.and_then(|statuses| statuses.first())
		.is_some_and(|status| status.restart_count > 0)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(false, "log", "vc-0.log")]
	#[case(false, "error.log", "vc-0.error.log")]
	#[case(true, "log", "vc-0.previous.log")]
	#[case(true, "error.log", "vc-0.previous.error.log")]
	fn test_log_file_name(#[case] previous: bool, #[case] suffix: &str, #[case] expected: &str) {
		assert_eq!(log_file_name("vc-0", previous, suffix), expected);
	}

	#[rstest]
	#[case(serde_json::json!({}), false)]
	#[case(serde_json::json!({"containerStatuses": []}), false)]
	#[case(serde_json::json!({"containerStatuses": [{"name": "syncer", "image": "vcluster", "imageID": "", "ready": true, "restartCount": 0}]}), false)]
	#[case(serde_json::json!({"containerStatuses": [{"name": "syncer", "image": "vcluster", "imageID": "", "ready": true, "restartCount": 2}]}), true)]
	#[case(
		serde_json::json!({"containerStatuses": [
			{"name": "syncer", "image": "vcluster", "imageID": "", "ready": true, "restartCount": 0},
			{"name": "sidecar", "image": "busybox", "imageID": "", "ready": true, "restartCount": 5},
		]}),
		false
	)]
	fn test_restarted(#[case] status: serde_json::Value, #[case] expected: bool) {
		let pod: Pod = serde_json::from_value(serde_json::json!({
			"metadata": {"name": "vc-0"},
			"status": status,
		}))
		.unwrap();
		assert_eq!(restarted(&pod), expected);
	}
}
