//! Access to a virtual cluster's API server through its control-plane pod.
//!
//! Bootstrapping runs in fixed stages: locate the newest running vCluster
//! pod, read the kubeconfig the vCluster stored in its `vc-<name>` secret,
//! open a local tunnel to the pod, point the kubeconfig at that tunnel and
//! finally wait until the virtual API server answers authenticated requests.
//! Every stage fails with its own [`BootstrapError`] variant.

use std::{future::Future, str::Utf8Error, sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::{Pod, Secret, ServiceAccount};
use kube::{
	api::ListParams,
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Api, Client, Config,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{
	tunnel::{PortForwarder, TunnelFailure, TunnelHandle},
	vcluster_pod_selector,
};
use crate::poll::poll_until;

/// Port the virtual API server listens on inside the control-plane pod.
pub const VIRTUAL_API_SERVER_PORT: u16 = 8443;

/// Key of the kubeconfig inside the `vc-<name>` secret.
pub const KUBECONFIG_SECRET_KEY: &str = "config";

/// Errors that can occur while reading the stored virtual kubeconfig.
#[derive(Debug, Error)]
pub enum VirtualKubeconfigError {
	#[error("failed to get secret {secret}")]
	Secret {
		secret: String,
		#[source]
		source: kube::Error,
	},

	#[error("secret {secret} has no key {key}")]
	MissingKey { secret: String, key: &'static str },

	#[error("kubeconfig in secret {secret} is not valid UTF-8")]
	Encoding {
		secret: String,
		#[source]
		source: Utf8Error,
	},

	#[error("failed to parse kubeconfig from secret {secret}")]
	Parse {
		secret: String,
		#[source]
		source: KubeconfigError,
	},
}

/// Errors that can occur while bootstrapping virtual cluster access.
#[derive(Debug, Error)]
pub enum BootstrapError {
	#[error("failed to list pods in namespace {namespace}")]
	ListPods {
		namespace: String,
		#[source]
		source: kube::Error,
	},

	#[error("can't find a running vcluster pod in namespace {namespace} (selector {selector})")]
	PodNotFound { namespace: String, selector: String },

	#[error("newest vcluster pod {namespace}/{pod} is terminating")]
	PodTerminating { namespace: String, pod: String },

	#[error("failed to read virtual cluster kubeconfig")]
	Kubeconfig(#[from] VirtualKubeconfigError),

	#[error("port forwarding to the virtual cluster failed")]
	Tunnel(#[source] TunnelFailure),

	#[error("virtual cluster did not become ready within {timeout:?}")]
	ReadinessTimeout { timeout: Duration },

	#[error("failed to build virtual cluster config")]
	Config(#[source] KubeconfigError),

	#[error("failed to create virtual cluster client")]
	Client(#[source] kube::Error),
}

/// Checks whether the virtual API server is ready to serve requests.
pub trait ReadinessProbe: Send + Sync {
	/// `client` and `config` both target the tunneled API server.
	fn probe(&self, client: &Client, config: &Config) -> impl Future<Output = bool> + Send;
}

/// Ready once the `default/default` service account can be read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAccountProbe;

impl ReadinessProbe for ServiceAccountProbe {
	fn probe(&self, client: &Client, _config: &Config) -> impl Future<Output = bool> + Send {
		let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), "default");
		async move {
			match accounts.get("default").await {
				Ok(_) => true,
				Err(e) => {
					debug!(error = %e, "virtual cluster not ready yet");
					false
				}
			}
		}
	}
}

/// Timing and addressing of the bootstrap stages.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
	pub pod_poll_interval: Duration,
	pub pod_locate_timeout: Duration,
	pub readiness_interval: Duration,
	pub readiness_timeout: Duration,
	/// Overrides `app=vcluster,release=<name>`.
	pub label_selector: Option<String>,
	pub remote_port: u16,
}

impl Default for BootstrapOptions {
	fn default() -> Self {
		Self {
			pod_poll_interval: Duration::from_secs(1),
			pod_locate_timeout: Duration::from_secs(30),
			readiness_interval: Duration::from_millis(200),
			readiness_timeout: Duration::from_secs(3 * 60),
			label_selector: None,
			remote_port: VIRTUAL_API_SERVER_PORT,
		}
	}
}

/// Working access to a virtual cluster. The tunnel lives as long as this value.
pub struct VirtualAccess {
	pub config: Config,
	pub client: Client,
	pub tunnel: TunnelHandle,
}

impl std::fmt::Debug for VirtualAccess {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("VirtualAccess")
			.field("cluster_url", &self.config.cluster_url)
			.field("local_port", &self.tunnel.local_port())
			.finish_non_exhaustive()
	}
}

impl VirtualAccess {
	/// Stop the tunnel.
	pub async fn close(self) {
		self.tunnel.shutdown().await;
	}
}

/// Outcome of the most recent pod lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PodSearch {
	Missing,
	Terminating(String),
	Running(String),
}

pub struct VirtualAccessBootstrapper<F, P = ServiceAccountProbe> {
	host: Client,
	name: String,
	namespace: String,
	forwarder: F,
	probe: P,
	options: BootstrapOptions,
}

impl<F: PortForwarder> VirtualAccessBootstrapper<F> {
	pub fn new(host: Client, name: &str, namespace: &str, forwarder: F) -> Self {
		Self {
			host,
			name: name.to_string(),
			namespace: namespace.to_string(),
			forwarder,
			probe: ServiceAccountProbe,
			options: BootstrapOptions::default(),
		}
	}
}

impl<F: PortForwarder, P: ReadinessProbe> VirtualAccessBootstrapper<F, P> {
	pub fn with_options(mut self, options: BootstrapOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_probe<Q: ReadinessProbe>(self, probe: Q) -> VirtualAccessBootstrapper<F, Q> {
		VirtualAccessBootstrapper {
			host: self.host,
			name: self.name,
			namespace: self.namespace,
			forwarder: self.forwarder,
			probe,
			options: self.options,
		}
	}

	fn selector(&self) -> String {
		self.options
			.label_selector
			.clone()
			.unwrap_or_else(|| vcluster_pod_selector(&self.name))
	}

	#[instrument(skip_all, fields(name = %self.name, namespace = %self.namespace))]
	pub async fn bootstrap(&self) -> Result<VirtualAccess, BootstrapError> {
		let pod = self.locate_pod().await?;
		debug!(%pod, "found vcluster pod");

		let kubeconfig = self.read_kubeconfig().await?;

		info!("Start port-forwarding to virtual cluster");
		let tunnel = TunnelHandle::open(&self.forwarder, &pod, self.options.remote_port)
			.await
			.map_err(|e| BootstrapError::Tunnel(Arc::new(e)))?;

		match self.connect(kubeconfig, &tunnel).await {
			Ok((config, client)) => Ok(VirtualAccess {
				config,
				client,
				tunnel,
			}),
			Err(e) => {
				tunnel.shutdown().await;
				Err(e)
			}
		}
	}

	/// Poll for the newest vCluster pod until it is not terminating.
	async fn locate_pod(&self) -> Result<String, BootstrapError> {
		let pods: Api<Pod> = Api::namespaced(self.host.clone(), &self.namespace);
		let selector = self.selector();
		let params = ListParams::default().labels(&selector);
		let last = Mutex::new(PodSearch::Missing);

		let (pods, params, last_ref, namespace) = (&pods, &params, &last, &self.namespace);
		let found = poll_until(
			self.options.pod_poll_interval,
			self.options.pod_locate_timeout,
			|| async move {
				let list = pods
					.list(params)
					.await
					.map_err(|source| BootstrapError::ListPods {
						namespace: namespace.clone(),
						source,
					})?;
				let search = newest_pod(list.items);
				let running = matches!(search, PodSearch::Running(_));
				if !running {
					debug!(%namespace, ?search, "can't find a running vcluster pod");
				}
				*last_ref.lock().await = search;
				Ok::<_, BootstrapError>(running)
			},
		)
		.await?;

		match last.into_inner() {
			PodSearch::Running(pod) if found => Ok(pod),
			PodSearch::Terminating(pod) => Err(BootstrapError::PodTerminating {
				namespace: self.namespace.clone(),
				pod,
			}),
			_ => Err(BootstrapError::PodNotFound {
				namespace: self.namespace.clone(),
				selector,
			}),
		}
	}

	async fn read_kubeconfig(&self) -> Result<Kubeconfig, VirtualKubeconfigError> {
		let secrets: Api<Secret> = Api::namespaced(self.host.clone(), &self.namespace);
		let secret = format!("vc-{}", self.name);

		let object = secrets
			.get(&secret)
			.await
			.map_err(|source| VirtualKubeconfigError::Secret {
				secret: secret.clone(),
				source,
			})?;
		let raw = object
			.data
			.as_ref()
			.and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
			.ok_or_else(|| VirtualKubeconfigError::MissingKey {
				secret: secret.clone(),
				key: KUBECONFIG_SECRET_KEY,
			})?;
		let text = std::str::from_utf8(&raw.0).map_err(|source| VirtualKubeconfigError::Encoding {
			secret: secret.clone(),
			source,
		})?;

		Kubeconfig::from_yaml(text).map_err(|source| VirtualKubeconfigError::Parse { secret, source })
	}

	/// Build the tunneled client and wait until the virtual cluster answers.
	async fn connect(
		&self,
		kubeconfig: Kubeconfig,
		tunnel: &TunnelHandle,
	) -> Result<(Config, Client), BootstrapError> {
		let config = rewrite_config(kubeconfig, tunnel.local_port())
			.await
			.map_err(BootstrapError::Config)?;
		let client = Client::try_from(config.clone()).map_err(BootstrapError::Client)?;

		let (probe, client_ref, config_ref) = (&self.probe, &client, &config);
		let ready = poll_until(
			self.options.readiness_interval,
			self.options.readiness_timeout,
			|| async move {
				if let Some(failure) = tunnel.failure() {
					return Err(BootstrapError::Tunnel(failure));
				}
				tokio::select! {
					biased;
					failure = tunnel.failed() => Err(BootstrapError::Tunnel(failure)),
					ready = probe.probe(client_ref, config_ref) => Ok(ready),
				}
			},
		)
		.await?;

		if !ready {
			return Err(BootstrapError::ReadinessTimeout {
				timeout: self.options.readiness_timeout,
			});
		}
		Ok((config, client))
	}
}

/// Pick the newest pod by creation time and classify it.
fn newest_pod(pods: Vec<Pod>) -> PodSearch {
	let Some(newest) = pods
		.into_iter()
		.max_by_key(|pod| pod.metadata.creation_timestamp.clone())
	else {
		return PodSearch::Missing;
	};
	let name = newest.metadata.name.unwrap_or_default();
	if newest.metadata.deletion_timestamp.is_some() {
		PodSearch::Terminating(name)
	} else {
		PodSearch::Running(name)
	}
}

/// Point every cluster of `kubeconfig` at `https://localhost:<port>` and turn
/// it into a client config.
pub async fn rewrite_config(mut kubeconfig: Kubeconfig, port: u16) -> Result<Config, KubeconfigError> {
	let server = format!("https://localhost:{port}");
	for named in &mut kubeconfig.clusters {
		if let Some(cluster) = named.cluster.as_mut() {
			cluster.server = Some(server.clone());
		}
	}
	Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await
}
