//! Helm release metadata of a vCluster.
//!
//! Helm 3 keeps every revision of a release in a secret labeled
//! `owner=helm,name=<release>`. The `release` key holds base64 text of a JSON
//! document that is gzip-compressed by every recent Helm version.

use std::{
	collections::BTreeMap,
	io::{self, Read},
	path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::ListParams, Api, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Release statuses that never describe the deployed state.
const INACTIVE_STATUSES: [&str; 2] = ["superseded", "uninstalled"];

#[derive(Debug, Error)]
pub enum ReleaseError {
	#[error("failed to list release secrets of {name} in namespace {namespace}")]
	List {
		name: String,
		namespace: String,
		#[source]
		source: kube::Error,
	},

	#[error("marshalling release {name}")]
	Encode {
		name: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to write {}", path.display())]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Reasons a single release secret is skipped.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("secret has no release data")]
	Missing,

	#[error("release data is not valid base64")]
	Base64(#[from] base64::DecodeError),

	#[error("unexpected release content of {0} bytes")]
	TooShort(usize),

	#[error("failed to decompress release")]
	Gzip(#[source] io::Error),

	#[error("failed to decode release JSON")]
	Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub info: Option<ReleaseInfo>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub chart: Option<Chart>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub config: BTreeMap<String, Value>,
	#[serde(default, skip_serializing_if = "is_zero")]
	pub version: i64,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub first_deployed: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_deployed: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted: Option<String>,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub description: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub status: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub notes: String,
}

/// Only the metadata of the chart is kept, templates and files are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<ChartMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub name: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub version: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub app_version: String,
	/// Remaining Chart.yaml fields, kept verbatim.
	#[serde(flatten)]
	pub other: BTreeMap<String, Value>,
}

fn is_zero(v: &i64) -> bool {
	*v == 0
}

impl Release {
	fn is_complete(&self) -> bool {
		self.info.is_some() && self.chart.as_ref().is_some_and(|c| c.metadata.is_some())
	}

	fn is_active(&self) -> bool {
		self.info
			.as_ref()
			.is_none_or(|info| !INACTIVE_STATUSES.contains(&info.status.as_str()))
	}

	/// Write the release as pretty JSON to `dir/release.json`.
	pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReleaseError> {
		let raw = serde_json::to_vec_pretty(self).map_err(|source| ReleaseError::Encode {
			name: self.name.clone(),
			source,
		})?;
		let path = dir.join("release.json");
		let write_err = |source| ReleaseError::Write {
			path: path.clone(),
			source,
		};
		std::fs::create_dir_all(dir).map_err(write_err)?;
		std::fs::write(&path, raw).map_err(write_err)?;
		Ok(path)
	}
}

/// Decode the `release` payload of a Helm release secret.
pub fn decode_release(data: &[u8]) -> Result<Release, DecodeError> {
	let text: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
	let mut raw = STANDARD.decode(text)?;
	if raw.len() < GZIP_MAGIC.len() {
		return Err(DecodeError::TooShort(raw.len()));
	}

	if raw.starts_with(&GZIP_MAGIC) {
		let mut decompressed = Vec::new();
		GzDecoder::new(raw.as_slice())
			.read_to_end(&mut decompressed)
			.map_err(DecodeError::Gzip)?;
		raw = decompressed;
	}

	Ok(serde_json::from_slice(&raw)?)
}

/// Find the deployed release `name` in `namespace`: the highest revision
/// that decodes, is complete and is neither superseded nor uninstalled.
#[instrument(skip(client))]
pub async fn latest_release(
	client: &Client,
	name: &str,
	namespace: &str,
) -> Result<Option<Release>, ReleaseError> {
	let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
	let params = ListParams::default().labels(&format!("owner=helm,name={name}"));
	let list = secrets
		.list(&params)
		.await
		.map_err(|source| ReleaseError::List {
			name: name.to_string(),
			namespace: namespace.to_string(),
			source,
		})?;

	let latest = list
		.items
		.into_iter()
		.filter_map(|secret| {
			let secret_name = secret.metadata.name.clone().unwrap_or_default();
			let decoded = secret
				.data
				.as_ref()
				.and_then(|data| data.get("release"))
				.ok_or(DecodeError::Missing)
				.and_then(|data| decode_release(&data.0));
			match decoded {
				Ok(release) if release.is_complete() => Some(release),
				Ok(release) => {
					debug!(secret = %secret_name, release = %release.name, "metadata info is empty for release");
					None
				}
				Err(e) => {
					debug!(secret = %secret_name, error = %e, "failed to decode release");
					None
				}
			}
		})
		.filter(Release::is_active)
		.max_by_key(|release| release.version);

	Ok(latest)
}
