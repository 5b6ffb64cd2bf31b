//! Mock Kubernetes API server for testing.
//!
//! Serves version, legacy discovery, label-selector and `limit` aware lists,
//! single objects and pod logs over real HTTP, so clients can connect through
//! an ordinary kubeconfig. The server is read-only: any non-GET request is
//! answered with 404.

pub mod discovery;
pub mod http;
mod routes;

pub use discovery::{MockApiResource, MockDiscovery, MockGroupVersion};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
