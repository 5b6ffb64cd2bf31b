//! Kubernetes access for the host cluster and the virtual cluster.
//!
//! Everything here talks to API servers through kube-rs and only ever reads.

pub mod bootstrap;
pub mod client;
pub mod collector;
pub mod counter;
pub mod discovery;
pub mod logs;
pub mod release;
pub mod tunnel;

/// Label selector matching the control-plane pods of vCluster `name`.
pub fn vcluster_pod_selector(name: &str) -> String {
	format!("app=vcluster,release={name}")
}
