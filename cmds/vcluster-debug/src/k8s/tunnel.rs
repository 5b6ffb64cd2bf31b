//! Local TCP tunnel to a pod port.
//!
//! A [`TunnelHandle`] owns a listener on an ephemeral localhost port and the
//! background task serving it. The task's terminal outcome is published into
//! a single-slot cell that callers can inspect without blocking, so a dead
//! tunnel is noticed on the next poll tick instead of after a timeout.

use std::{future::Future, io, net::Ipv4Addr, pin::Pin, sync::Arc};

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use thiserror::Error;
use tokio::{
	net::{TcpListener, TcpStream},
	sync::watch,
	task::JoinHandle,
};
use tracing::{debug, instrument, warn};

/// Errors that terminate a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("failed to bind local port")]
	Bind(#[source] io::Error),

	#[error("failed to accept local connection")]
	Accept(#[source] io::Error),

	#[error("failed to forward to port {port} of pod {pod}")]
	Forward {
		pod: String,
		port: u16,
		#[source]
		source: kube::Error,
	},

	#[error("port {port} of pod {pod} is not available on the forwarded connection")]
	MissingStream { pod: String, port: u16 },

	#[error("tunnel closed")]
	Closed,
}

/// Shared terminal outcome of a tunnel task.
pub type TunnelFailure = Arc<TunnelError>;

/// Future serving a tunnel listener until a fatal error occurs.
pub type ForwardFuture = Pin<Box<dyn Future<Output = Result<(), TunnelError>> + Send + 'static>>;

/// Forwards connections accepted on a local listener to a pod port.
pub trait PortForwarder: Send + Sync {
	/// The returned future runs as a detached task.
	fn forward(&self, pod: &str, port: u16, listener: TcpListener) -> ForwardFuture;
}

/// Forwards through the pod `portforward` subresource of the API server.
#[derive(Clone)]
pub struct PodPortForwarder {
	pods: Api<Pod>,
}

impl PodPortForwarder {
	pub fn new(client: Client, namespace: &str) -> Self {
		Self {
			pods: Api::namespaced(client, namespace),
		}
	}
}

impl PortForwarder for PodPortForwarder {
	fn forward(&self, pod: &str, port: u16, listener: TcpListener) -> ForwardFuture {
		Box::pin(serve_pod(self.pods.clone(), pod.to_string(), port, listener))
	}
}

async fn serve_pod(
	pods: Api<Pod>,
	pod: String,
	port: u16,
	listener: TcpListener,
) -> Result<(), TunnelError> {
	loop {
		let (conn, peer) = listener.accept().await.map_err(TunnelError::Accept)?;
		debug!(%peer, pod = %pod, "accepted tunnel connection");

		// An unreachable pod is fatal, a broken individual stream is not.
		let mut forwarder =
			pods.portforward(&pod, &[port])
				.await
				.map_err(|source| TunnelError::Forward {
					pod: pod.clone(),
					port,
					source,
				})?;
		let upstream = forwarder
			.take_stream(port)
			.ok_or_else(|| TunnelError::MissingStream {
				pod: pod.clone(),
				port,
			})?;

		tokio::spawn(async move {
			if let Err(e) = pipe(conn, upstream).await {
				debug!(error = %e, "tunnel connection ended");
			}
			if let Err(e) = forwarder.join().await {
				debug!(error = %e, "port forward ended");
			}
		});
	}
}

async fn pipe<S>(mut conn: TcpStream, mut upstream: S) -> io::Result<()>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	tokio::io::copy_bidirectional(&mut conn, &mut upstream).await?;
	Ok(())
}

/// A running tunnel. Dropping the handle stops the tunnel.
pub struct TunnelHandle {
	local_port: u16,
	failure: watch::Receiver<Option<TunnelFailure>>,
	task: JoinHandle<()>,
}

impl TunnelHandle {
	/// Bind an ephemeral localhost port and start forwarding it to `port` on `pod`.
	#[instrument(skip(forwarder))]
	pub async fn open<F: PortForwarder>(
		forwarder: &F,
		pod: &str,
		port: u16,
	) -> Result<Self, TunnelError> {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
			.await
			.map_err(TunnelError::Bind)?;
		let local_port = listener.local_addr().map_err(TunnelError::Bind)?.port();

		let (report, failure) = watch::channel(None);
		let serve = forwarder.forward(pod, port, listener);
		let task = tokio::spawn(async move {
			let error = match serve.await {
				Ok(()) => TunnelError::Closed,
				Err(e) => e,
			};
			warn!(error = %error, "tunnel stopped");
			report.send_replace(Some(Arc::new(error)));
		});

		debug!(local_port, "tunnel opened");
		Ok(Self {
			local_port,
			failure,
			task,
		})
	}

	pub fn local_port(&self) -> u16 {
		self.local_port
	}

	/// Non-blocking check whether the tunnel task has terminated.
	pub fn failure(&self) -> Option<TunnelFailure> {
		self.failure.borrow().clone()
	}

	/// Wait until the tunnel task terminates.
	pub async fn failed(&self) -> TunnelFailure {
		let mut receiver = self.failure.clone();
		let failure = match receiver.wait_for(Option::is_some).await {
			Ok(state) => state.clone().unwrap_or_else(|| Arc::new(TunnelError::Closed)),
			// the task was aborted or panicked before reporting
			Err(_) => Arc::new(TunnelError::Closed),
		};
		failure
	}

	/// Stop the tunnel and wait for its task to finish.
	pub async fn shutdown(mut self) {
		self.task.abort();
		let _ = (&mut self.task).await;
	}
}

impl Drop for TunnelHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	use super::*;

	/// Echoes every byte back, standing in for a pod.
	struct EchoForwarder;

	impl PortForwarder for EchoForwarder {
		fn forward(&self, _pod: &str, _port: u16, listener: TcpListener) -> ForwardFuture {
			Box::pin(echo(listener))
		}
	}

	async fn echo(listener: TcpListener) -> Result<(), TunnelError> {
		loop {
			let (mut conn, _) = listener.accept().await.map_err(TunnelError::Accept)?;
			tokio::spawn(async move {
				let (mut read, mut write) = conn.split();
				let _ = tokio::io::copy(&mut read, &mut write).await;
			});
		}
	}

	struct FailingForwarder;

	impl PortForwarder for FailingForwarder {
		fn forward(&self, pod: &str, port: u16, _listener: TcpListener) -> ForwardFuture {
			let pod = pod.to_string();
			Box::pin(async move { Err::<(), _>(TunnelError::MissingStream { pod, port }) })
		}
	}

	#[tokio::test]
	async fn test_tunnel_forwards_traffic() {
		let tunnel = TunnelHandle::open(&EchoForwarder, "vc-0", 8443).await.unwrap();
		assert_ne!(tunnel.local_port(), 0);

		let mut conn = TcpStream::connect((Ipv4Addr::LOCALHOST, tunnel.local_port()))
			.await
			.unwrap();
		conn.write_all(b"ping").await.unwrap();
		let mut buf = [0u8; 4];
		conn.read_exact(&mut buf).await.unwrap();

		assert_eq!(&buf, b"ping");
		assert!(tunnel.failure().is_none());
	}

	#[tokio::test]
	async fn test_tunnel_failure_is_reported() {
		let tunnel = TunnelHandle::open(&FailingForwarder, "vc-0", 8443).await.unwrap();

		let failure = tokio::time::timeout(Duration::from_secs(5), tunnel.failed())
			.await
			.expect("failure should be reported");

		assert!(matches!(
			*failure,
			TunnelError::MissingStream { ref pod, port: 8443 } if pod == "vc-0"
		));
		assert!(tunnel.failure().is_some());
	}

	#[tokio::test]
	async fn test_shutdown_closes_listener() {
		let tunnel = TunnelHandle::open(&EchoForwarder, "vc-0", 8443).await.unwrap();
		let port = tunnel.local_port();

		tunnel.shutdown().await;

		assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_err());
	}
}
