use std::process::Command;

fn main() {
	println!("cargo:rerun-if-changed=.git/HEAD");
	println!("cargo:rerun-if-changed=.git/refs/");

	println!("cargo:rustc-env=VCLUSTER_DEBUG_VERSION={}", version());
}

/// Release builds carry the Cargo.toml version, dev builds a short commit hash.
fn version() -> String {
	let cargo_version = env!("CARGO_PKG_VERSION");
	if cargo_version != "0.1.0" {
		return cargo_version.to_string();
	}

	git(&["describe", "--tags", "--exact-match", "HEAD"])
		.map(|tag| tag.trim_start_matches('v').to_string())
		.or_else(|| git(&["rev-parse", "--short", "HEAD"]))
		.unwrap_or_else(|| cargo_version.to_string())
}

fn git(args: &[&str]) -> Option<String> {
	let output = Command::new("git").args(args).output().ok()?;
	if !output.status.success() {
		return None;
	}
	let out = String::from_utf8(output.stdout).ok()?;
	Some(out.trim().to_string())
}
