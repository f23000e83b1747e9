//! Auto-selector (§4.5): picks a backend from workload size, pattern complexity, and the
//! capabilities probed at driver init. A forced-backend CLI flag bypasses this entirely.

use super::{Backend, DeviceCaps};

/// `num_paths < GPU_WORTHWHILE_THRESHOLD` always stays on CPU: GPU setup overhead dwarfs the work
pub const GPU_WORTHWHILE_THRESHOLD: usize = 1024;

/// A rough score of how much a glob/regex pattern benefits from GPU parallelism: every wildcard
/// or character class adds backtracking cost that's cheap to parallelize but expensive to run
/// serially on CPU (§4.5)
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternComplexity {
	pub num_wildcards: u32,
	pub num_classes: u32,
}

impl PatternComplexity {
	pub fn of_glob(pattern: &[u8]) -> Self {
		let mut complexity = PatternComplexity::default();
		let mut i = 0;
		while i < pattern.len() {
			match pattern[i] {
				b'*' | b'?' => complexity.num_wildcards += 1,
				b'[' => complexity.num_classes += 1,
				_ => {}
			}
			i += 1;
		}
		complexity
	}

	fn score(&self) -> u32 {
		self.num_wildcards + self.num_classes * 2
	}
}

/// Which GPU backends the caller successfully initialized (probed once at startup)
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailableBackends {
	pub metal: Option<DeviceCaps>,
	pub vulkan: Option<DeviceCaps>,
}

/// Chooses a backend for a given workload. `forced` bypasses the policy outright when the CLI
/// specified `--gpu`/`--cpu`/`--metal`/`--vulkan` explicitly.
pub fn select_backend(num_paths: usize, complexity: PatternComplexity, available: AvailableBackends, forced: Option<Backend>) -> Backend {
	if let Some(forced) = forced {
		return forced;
	}

	if num_paths < GPU_WORTHWHILE_THRESHOLD {
		return if complexity.score() > 0 { Backend::Simd } else { Backend::Scalar };
	}

	// Prefer the native backend for the host: Metal on Apple, else Vulkan
	if cfg!(target_os = "macos") && available.metal.is_some() {
		return Backend::Metal;
	}
	if available.vulkan.is_some() {
		return Backend::Vulkan;
	}

	// No GPU available: fall back, favoring SIMD once the pattern is complex enough to have
	// wanted GPU parallelism in the first place
	if complexity.score() > 0 { Backend::Simd } else { Backend::Scalar }
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_small_workload_stays_on_cpu() {
		let backend = select_backend(100, PatternComplexity::default(), AvailableBackends { metal: None, vulkan: Some(DeviceCaps::default()) }, None);
		assert_eq!(backend, Backend::Scalar);
	}

	#[test]
	fn test_small_complex_workload_prefers_simd() {
		let complexity = PatternComplexity::of_glob(b"*.{txt,doc}[a-z]");
		let backend = select_backend(100, complexity, AvailableBackends::default(), None);
		assert_eq!(backend, Backend::Simd);
	}

	#[test]
	fn test_large_workload_prefers_vulkan_when_available() {
		let backend = select_backend(2000, PatternComplexity::default(), AvailableBackends { metal: None, vulkan: Some(DeviceCaps::default()) }, None);
		assert_eq!(backend, Backend::Vulkan);
	}

	#[test]
	fn test_large_workload_without_gpu_falls_back() {
		let backend = select_backend(2000, PatternComplexity::default(), AvailableBackends::default(), None);
		assert_eq!(backend, Backend::Scalar);
	}

	#[test]
	fn test_forced_backend_bypasses_policy() {
		let backend = select_backend(2000, PatternComplexity::default(), AvailableBackends::default(), Some(Backend::Vulkan));
		assert_eq!(backend, Backend::Vulkan);
	}
}
