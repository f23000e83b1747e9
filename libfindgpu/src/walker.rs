//! Synchronous depth-first directory walker (§10.4). No pipelining with the GPU dispatch stage:
//! the whole tree is gathered into a flat path list first, matching §5's "host is single-threaded
//! per dispatch... no pipelining of walker and GPU" scheduling model.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::glob::{self, MatchOptions};

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
	pub max_depth: Option<usize>,
	pub min_depth: usize,
	/// Glob pattern (already validated) matched against a directory's path before descending
	/// into it. A match prunes descent but never suppresses emission of the directory entry
	/// itself (§10.4: "without emitting the directory itself unless it would otherwise match" —
	/// emission is decided later by the name/path predicate, not by the walker).
	pub prune: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct WalkResult {
	pub paths: Vec<Vec<u8>>,
	pub had_error: bool,
}

fn path_bytes(path: &Path) -> Vec<u8> {
	#[cfg(unix)]
	{
		use std::os::unix::ffi::OsStrExt;
		path.as_os_str().as_bytes().to_vec()
	}
	#[cfg(not(unix))]
	{
		path.to_string_lossy().into_owned().into_bytes()
	}
}

fn is_pruned(options: &WalkOptions, path: &Path) -> bool {
	match &options.prune {
		Some(pattern) => glob::glob_match(pattern, &path_bytes(path), MatchOptions::MATCH_PATH),
		None => false,
	}
}

fn walk_dir(dir: &Path, depth: usize, options: &WalkOptions, out: &mut WalkResult) {
	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) => {
			// A root path failing is reported by `walk`; failures here are a subdirectory that
			// became unreadable mid-walk, which GNU find skips silently.
			if depth > 0 {
				out.had_error = true;
			} else {
				warn!("{}: {e}", dir.display());
				out.had_error = true;
			}
			return;
		}
	};

	for entry in entries {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				warn!("{}: {e}", dir.display());
				out.had_error = true;
				continue;
			}
		};
		let path = entry.path();
		let child_depth = depth + 1;

		if child_depth >= options.min_depth {
			out.paths.push(path_bytes(&path));
		}

		let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
		if !is_dir {
			continue;
		}

		if let Some(max_depth) = options.max_depth {
			if child_depth >= max_depth {
				continue;
			}
		}

		if is_pruned(options, &path) {
			continue;
		}

		walk_dir(&path, child_depth, options, out);
	}
}

/// Walks every root in `roots`, returning the flattened path list in depth-first, directory-
/// iterator emission order (§5: "not sorted"). A root that can't even be read contributes to
/// `had_error` but does not stop the other roots from being walked (§7, §10.4).
pub fn walk(roots: &[PathBuf], options: &WalkOptions) -> WalkResult {
	let mut out = WalkResult::default();

	for root in roots {
		let metadata = match fs::symlink_metadata(root) {
			Ok(m) => m,
			Err(e) => {
				warn!("{}: {e}", root.display());
				out.had_error = true;
				continue;
			}
		};

		if options.min_depth == 0 {
			out.paths.push(path_bytes(root));
		}

		if metadata.is_dir() {
			let within_depth = options.max_depth.map(|d| d > 0).unwrap_or(true);
			if within_depth && !is_pruned(options, root) {
				walk_dir(root, 0, options, &mut out);
			}
		}
	}

	out
}

#[cfg(test)]
mod test {
	use super::*;

	fn make_tree() -> tempfile::TempDir {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir_all(dir.path().join("src")).unwrap();
		fs::create_dir_all(dir.path().join("target/debug")).unwrap();
		fs::write(dir.path().join("src/main.rs"), b"").unwrap();
		fs::write(dir.path().join("Cargo.toml"), b"").unwrap();
		fs::write(dir.path().join("target/debug/out"), b"").unwrap();
		dir
	}

	#[test]
	fn test_walk_collects_all_entries() {
		let dir = make_tree();
		let result = walk(&[dir.path().to_path_buf()], &WalkOptions::default());
		assert!(!result.had_error);
		// 6 tree entries plus the root itself, since min_depth defaults to 0 (mirroring `find .`
		// printing `.`).
		assert_eq!(result.paths.len(), 7);
	}

	#[test]
	fn test_walk_respects_maxdepth() {
		let dir = make_tree();
		let options = WalkOptions { max_depth: Some(1), ..Default::default() };
		let result = walk(&[dir.path().to_path_buf()], &options);
		let names: Vec<_> = result.paths.iter().map(|p| String::from_utf8_lossy(p).into_owned()).collect();
		assert!(names.iter().any(|n| n.ends_with("src")));
		assert!(!names.iter().any(|n| n.ends_with("main.rs")));
	}

	#[test]
	fn test_walk_respects_mindepth() {
		let dir = make_tree();
		let options = WalkOptions { min_depth: 1, ..Default::default() };
		let result = walk(&[dir.path().to_path_buf()], &options);
		let root_bytes = path_bytes(dir.path());
		assert!(!result.paths.iter().any(|p| *p == root_bytes));
	}

	#[test]
	fn test_walk_prune_skips_descent_but_not_emission() {
		let dir = make_tree();
		let options = WalkOptions { prune: Some(b"*/target".to_vec()), ..Default::default() };
		let result = walk(&[dir.path().to_path_buf()], &options);
		let names: Vec<_> = result.paths.iter().map(|p| String::from_utf8_lossy(p).into_owned()).collect();
		assert!(names.iter().any(|n| n.ends_with("target")));
		assert!(!names.iter().any(|n| n.ends_with("debug")));
	}

	#[test]
	fn test_walk_reports_missing_root() {
		let missing = PathBuf::from("/nonexistent-path-for-findgpu-test");
		let result = walk(&[missing], &WalkOptions::default());
		assert!(result.had_error);
		assert!(result.paths.is_empty());
	}
}
