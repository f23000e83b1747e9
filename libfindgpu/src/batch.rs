//! Batch orchestration (§4.6): chunks walker output into GPU-sized batches, drives each through a
//! dispatch state machine, and falls back to CPU on backend failure. Mirrors the way the teacher's
//! `search.rs` sequences a `Searcher` over successive chunks of file data, generalized from one
//! streaming byte buffer to many independent path strings.

use log::{debug, warn};

use crate::error::Error;
use crate::glob::{self, MatchOptions};
use crate::gpu::{Backend, Driver};
use crate::regex::compile::CompiledRegex;
use crate::regex::exec;

/// Maximum paths per batch (§4.6)
pub const MAX_BATCH_PATHS: usize = 64 * 1024;
/// Maximum packed `names_data` bytes per batch (§4.6)
pub const MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// The flattened GPU-side representation of a batch of paths (§3): concatenated bytes plus
/// per-path offset/length indirection. Holds owned byte data since paths are gathered from a
/// transient directory walk and must outlive it.
#[derive(Debug, Default, Clone)]
pub struct PathBatch {
	pub names_data: Vec<u8>,
	pub offsets: Vec<u32>,
	pub lengths: Vec<u32>,
}

impl PathBatch {
	pub fn len(&self) -> usize {
		self.offsets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.offsets.is_empty()
	}

	fn push(&mut self, path: &[u8]) {
		let offset = self.names_data.len() as u32;
		self.names_data.extend_from_slice(path);
		self.offsets.push(offset);
		self.lengths.push(path.len() as u32);
	}

	pub fn path_at(&self, idx: usize) -> &[u8] {
		let start = self.offsets[idx] as usize;
		let len = self.lengths[idx] as usize;
		&self.names_data[start..start + len]
	}

	fn would_overflow(&self, path: &[u8]) -> bool {
		self.len() + 1 > MAX_BATCH_PATHS || self.names_data.len() + path.len() > MAX_BATCH_BYTES
	}
}

/// Splits `paths` into batches respecting the §4.6 size limits, preserving input order
pub fn chunk_paths<'a>(paths: impl IntoIterator<Item = &'a [u8]>) -> Vec<PathBatch> {
	let mut batches = Vec::new();
	let mut current = PathBatch::default();

	for path in paths {
		if !current.is_empty() && current.would_overflow(path) {
			batches.push(std::mem::take(&mut current));
		}
		current.push(path);
	}
	if !current.is_empty() {
		batches.push(current);
	}
	batches
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
	Building,
	Packed,
	Encoded,
	Submitted,
	Complete,
	Readback,
	Done,
}

/// Runs a glob match over every batch in `paths`, preferring `driver`/`backend` when `backend` is
/// a GPU variant and falling back to CPU on any dispatch failure (§4.6, §7: "no double-counting" —
/// a failed dispatch contributes no partial results before the retry).
pub fn match_all_glob(paths: &[Vec<u8>], pattern: &[u8], options: MatchOptions, backend: Backend, driver: Option<&mut (dyn Driver + 'static)>) -> Result<Vec<bool>, Error> {
	let batches = chunk_paths(paths.iter().map(|p| p.as_slice()));
	let mut results = Vec::with_capacity(paths.len());
	let mut driver = driver;

	for batch in &batches {
		debug!("dispatch: batch of {} paths, state={:?}", batch.len(), DispatchState::Building);
		debug!("dispatch state={:?}", DispatchState::Packed);

		let batch_results = match (backend, driver.as_deref_mut()) {
			(Backend::Metal | Backend::Vulkan, Some(driver)) => {
				debug!("dispatch state={:?}", DispatchState::Encoded);
				debug!("dispatch state={:?}", DispatchState::Submitted);
				match driver.match_names(batch, pattern, options) {
					Ok(r) => {
						debug!("dispatch state={:?}", DispatchState::Complete);
						debug!("dispatch state={:?}", DispatchState::Readback);
						r
					}
					Err(e) => {
						warn!("GPU dispatch failed ({e}), retrying batch on CPU");
						run_glob_cpu(batch, pattern, options)
					}
				}
			}
			_ => run_glob_cpu(batch, pattern, options),
		};
		debug!("dispatch state={:?}", DispatchState::Done);

		results.extend(batch_results);
	}

	Ok(results)
}

/// Runs a regex match over every batch, the GPU/CPU split mirroring `match_all_glob`
pub fn match_all_regex(paths: &[Vec<u8>], regex: &CompiledRegex, whole_match: bool, backend: Backend, driver: Option<&mut (dyn Driver + 'static)>) -> Result<Vec<bool>, Error> {
	let batches = chunk_paths(paths.iter().map(|p| p.as_slice()));
	let mut results = Vec::with_capacity(paths.len());
	let mut driver = driver;

	for batch in &batches {
		let batch_results = match (backend, driver.as_deref_mut()) {
			(Backend::Metal | Backend::Vulkan, Some(driver)) => match driver.regex_match_names(batch, regex, whole_match) {
				Ok(r) => r,
				Err(e) => {
					warn!("GPU dispatch failed ({e}), retrying batch on CPU");
					run_regex_cpu(batch, regex, whole_match)
				}
			},
			_ => run_regex_cpu(batch, regex, whole_match),
		};
		results.extend(batch_results);
	}

	Ok(results)
}

fn run_glob_cpu(batch: &PathBatch, pattern: &[u8], options: MatchOptions) -> Vec<bool> {
	(0..batch.len()).map(|i| glob::glob_match(pattern, batch.path_at(i), options)).collect()
}

fn run_regex_cpu(batch: &PathBatch, regex: &CompiledRegex, whole_match: bool) -> Vec<bool> {
	(0..batch.len())
		.map(|i| {
			let path = batch.path_at(i);
			if whole_match { exec::is_match_whole(regex, path) } else { exec::is_match_scanning(regex, path) }
		})
		.collect()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_chunk_paths_respects_max_count() {
		let paths: Vec<Vec<u8>> = (0..10).map(|i| format!("file{i}.txt").into_bytes()).collect();
		let batches = chunk_paths(paths.iter().map(|p| p.as_slice()));
		assert_eq!(batches.len(), 1);
		assert_eq!(batches[0].len(), 10);
	}

	#[test]
	fn test_batch_offsets_and_lengths() {
		let paths: Vec<&[u8]> = vec![b"a.txt", b"bb.txt"];
		let batches = chunk_paths(paths);
		let batch = &batches[0];
		assert_eq!(batch.path_at(0), b"a.txt");
		assert_eq!(batch.path_at(1), b"bb.txt");
		assert_eq!(batch.offsets, vec![0, 5]);
	}

	#[test]
	fn test_match_all_glob_cpu_fallback() {
		let paths: Vec<Vec<u8>> = vec![b"hello.txt".to_vec(), b"world.txt".to_vec(), b"hello.txt".to_vec()];
		let results = match_all_glob(&paths, b"hello.txt", MatchOptions::empty(), Backend::Scalar, None).unwrap();
		assert_eq!(results, vec![true, false, true]);
	}

	#[test]
	fn test_match_all_regex_cpu_fallback() {
		let paths: Vec<Vec<u8>> = vec![b"/p/src/a.c".to_vec(), b"/p/src/a.h".to_vec(), b"/src/q/b.c".to_vec(), b"/q/b.c".to_vec()];
		let regex = CompiledRegex { ..crate::regex::compile::parse_and_compile(br".*/src/.*\.c", false).unwrap() };
		let results = match_all_regex(&paths, &regex, true, Backend::Scalar, None).unwrap();
		assert_eq!(results.iter().filter(|&&m| m).count(), 2);
	}
}
