//! Packaging of the staging directory into a `.tar.gz` bundle.

use std::{
	fs::File,
	io::{self, BufWriter, Write},
	path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Errors that can occur while writing a bundle.
#[derive(Debug, Error)]
pub enum ArchiveError {
	#[error("failed to walk {}", path.display())]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	#[error("failed to archive {}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Write every entry below `source_dir` into a gzip-compressed tarball at `dest_file`.
///
/// Entries are visited in file-name order and named relative to `source_dir`,
/// which itself is not part of the archive.
#[instrument(skip_all, fields(source = %source_dir.display(), dest = %dest_file.display()))]
pub fn compress(source_dir: &Path, dest_file: &Path) -> Result<(), ArchiveError> {
	let io_err = |path: &Path| {
		let path = path.to_path_buf();
		move |source| ArchiveError::Io { path, source }
	};

	let file = File::create(dest_file).map_err(io_err(dest_file))?;
	let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
	let mut builder = tar::Builder::new(encoder);

	for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
		let entry = entry.map_err(|source| ArchiveError::Walk {
			path: source_dir.to_path_buf(),
			source,
		})?;
		let name = entry_name(source_dir, entry.path());

		if entry.file_type().is_dir() {
			builder
				.append_dir(&name, entry.path())
				.map_err(io_err(entry.path()))?;
		} else {
			builder
				.append_path_with_name(entry.path(), &name)
				.map_err(io_err(entry.path()))?;
		}
		debug!(entry = %name, "archived");
	}

	let mut writer = builder
		.into_inner()
		.and_then(GzEncoder::finish)
		.map_err(io_err(dest_file))?;
	writer.flush().map_err(io_err(dest_file))?;

	Ok(())
}

/// Archive entry name: `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> String {
	let relative = path.strip_prefix(root).unwrap_or(path);
	relative
		.components()
		.map(|c| c.as_os_str().to_string_lossy())
		.collect::<Vec<_>>()
		.join("/")
}
