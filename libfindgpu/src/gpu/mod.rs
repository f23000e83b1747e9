//! GPU dispatch layer (§4.3, §9): buffer packing, capability probing, and the backend drivers
//! themselves. Global state from the teacher's Vulkan-only `pfac_gpu` is replaced by owned driver
//! objects: `init` builds one, `Driver::match_names`/`regex_match_names` run one dispatch, and
//! the driver (and everything it allocated) drops at the end of its scope — no process-wide
//! singleton survives a dispatch.

pub mod select;

#[cfg(feature = "gpu")]
pub mod vulkan;

#[cfg(all(feature = "metal", target_os = "macos"))]
pub mod metal;

use crate::batch::PathBatch;
use crate::error::Error;
use crate::glob::MatchOptions;
use crate::regex::compile::CompiledRegex;

/// The sum type described in §9: dynamic backend selection is a plain enum plus a scoring
/// function, not runtime polymorphism over a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
	Scalar,
	Simd,
	Metal,
	Vulkan,
}

/// The `config` uniform buffer laid out exactly as §4.3 specifies: 32 bytes, std140-compatible,
/// identical across the glob and regex kernels
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpuConfig {
	pub num_names: u32,
	pub pattern_len: u32,
	pub flags: u32,
	pub max_name_len: u32,
	pub names_offset: u32,
	pub lengths_offset: u32,
	pub _pad0: u32,
	pub _pad1: u32,
}

/// The regex header buffer (binding 7 for the regex kernel): `num_states`/`start_state`/
/// `num_groups` plus the anchor/whole-match flags folded in for the kernel's benefit
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RegexHeader {
	pub num_states: u32,
	pub start_state: u32,
	pub num_groups: u32,
	pub regex_flags: u32,
}

pub const REGEX_FLAG_ANCHORED_START: u32 = 1 << 0;
pub const REGEX_FLAG_ANCHORED_END: u32 = 1 << 1;
pub const REGEX_FLAG_WHOLE_MATCH: u32 = 1 << 2;

/// Per-path result record (§3): `name_idx` is implicit in array position, so only `matched`
/// actually needs to round-trip; kept as a named field to match the spec's record shape
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MatchResult {
	pub name_idx: u32,
	pub matched: u32,
}

/// Capabilities recorded at driver init (§4.3), feeding the auto-selector's "high-performance"
/// classification
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCaps {
	pub max_threads_per_workgroup: u32,
	pub max_buffer_size: u64,
	pub device_local_memory: u64,
	pub unified_memory: bool,
}

impl DeviceCaps {
	/// Apple Silicon with unified memory and >= 1024 max threads is "high-performance" (§4.3)
	pub fn is_high_performance(&self) -> bool {
		self.unified_memory && self.max_threads_per_workgroup >= 1024
	}
}

/// A GPU backend driver. One instance owns everything a dispatch needs (device handle, command
/// queue, allocators); nothing outlives the driver (§9's "no cyclic ownership" / "scoped resource
/// acquisition").
pub trait Driver {
	fn caps(&self) -> DeviceCaps;

	/// Runs the glob kernel over one batch, returning a `matched` flag per path in batch order
	fn match_names(&mut self, batch: &PathBatch, pattern: &[u8], options: MatchOptions) -> Result<Vec<bool>, Error>;

	/// Runs the regex kernel over one batch against a compiled NFA, `whole_match` selecting
	/// between the scanning and whole-input policies described in §4.2
	fn regex_match_names(&mut self, batch: &PathBatch, regex: &CompiledRegex, whole_match: bool) -> Result<Vec<bool>, Error>;
}

pub fn glob_options_to_flags(options: MatchOptions) -> u32 {
	options.bits()
}

/// Packs a `CompiledRegex`'s state table into the three-`u32`-per-state wire format §9 calls for:
/// little-endian packing performed explicitly on the host so both shaders agree on layout
/// regardless of target endianness
pub fn pack_regex_states(regex: &CompiledRegex) -> Vec<u32> {
	let mut out = Vec::with_capacity(regex.states.len() * 3);
	for s in &regex.states {
		let word0 = (s.ty as u32) | ((s.flags as u32) << 8) | ((s.out as u32) << 16);
		let word1 = (s.out2 as u32) | ((s.literal as u32) << 16) | ((s.group_idx as u32) << 24);
		let word2 = s.bitmap_offset;
		out.push(word0);
		out.push(word1);
		out.push(word2);
	}
	out
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_high_performance_classification() {
		let caps = DeviceCaps { max_threads_per_workgroup: 1024, unified_memory: true, ..Default::default() };
		assert!(caps.is_high_performance());

		let caps = DeviceCaps { max_threads_per_workgroup: 256, unified_memory: true, ..Default::default() };
		assert!(!caps.is_high_performance());
	}

	#[test]
	fn test_pack_regex_states_roundtrips_out_fields() {
		let re = crate::regex::compile::parse_and_compile(b"ab", false).unwrap();
		let packed = pack_regex_states(&re);
		assert_eq!(packed.len(), re.states.len() * 3);
		let word0 = packed[0];
		assert_eq!(word0 & 0xFF, re.states[0].ty as u32);
		assert_eq!((word0 >> 16) & 0xFFFF, re.states[0].out as u32);
	}
}
