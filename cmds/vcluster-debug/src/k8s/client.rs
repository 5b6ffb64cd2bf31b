//! Host cluster connection and server version capture.

use std::{
	io,
	path::{Path, PathBuf},
	time::Duration,
};

use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::{debug, instrument};

/// Timeout for establishing connections to the API server.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Errors that can occur while capturing the server version.
#[derive(Debug, Error)]
pub enum VersionError {
	#[error("failed to get server version")]
	Fetch(#[source] kube::Error),

	#[error("failed to encode server version")]
	Encode(#[source] serde_json::Error),

	#[error("failed to write {}", path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// A client for the host cluster, which runs the vCluster control plane.
#[derive(Clone)]
pub struct HostConnection {
	client: Client,
	/// Context name or `current-context` when none was requested.
	context: String,
}

impl std::fmt::Debug for HostConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HostConnection")
			.field("context", &self.context)
			.field("namespace", &self.default_namespace())
			.finish_non_exhaustive()
	}
}

impl HostConnection {
	/// Connect using `$KUBECONFIG` or `~/.kube/config`.
	#[instrument(skip_all)]
	pub async fn connect(context: Option<&str>) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_kubeconfig(kubeconfig, context).await
	}

	/// Connect with a provided kubeconfig, optionally selecting a context.
	#[instrument(skip_all, fields(context = ?context))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		if let Some(name) = context {
			if !kubeconfig.contexts.iter().any(|c| c.name == name) {
				return Err(ConnectionError::ContextNotFound(name.to_string()));
			}
		}
		let identifier = context
			.map(str::to_string)
			.or_else(|| kubeconfig.current_context.clone())
			.unwrap_or_else(|| "current-context".to_string());

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context.map(str::to_string),
				..Default::default()
			},
		)
		.await?;
		config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);

		let client = Client::try_from(config)?;
		debug!(context = %identifier, namespace = %client.default_namespace(), "connected to host cluster");

		Ok(Self {
			client,
			context: identifier,
		})
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Namespace of the selected context, `default` when unset.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	pub fn context(&self) -> &str {
		&self.context
	}
}

/// Write the API server version as pretty JSON to `dir/version.json`.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn write_version(client: &Client, dir: &Path) -> Result<PathBuf, VersionError> {
	let info = client.apiserver_version().await.map_err(VersionError::Fetch)?;
	let raw = serde_json::to_vec_pretty(&info).map_err(VersionError::Encode)?;

	let path = dir.join("version.json");
	let write_err = |source| VersionError::Write {
		path: path.clone(),
		source,
	};
	std::fs::create_dir_all(dir).map_err(write_err)?;
	std::fs::write(&path, raw).map_err(write_err)?;

	debug!(major = %info.major, minor = %info.minor, git_version = %info.git_version, "wrote server version");
	Ok(path)
}
