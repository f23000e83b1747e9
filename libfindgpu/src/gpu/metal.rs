//! Metal backend driver, grounded on the `metal` crate usage pattern shown in the
//! `VLTier` example's `gpu_worker_loop`: `Device::system_default`, compile-source-at-runtime
//! via `new_library_with_source`, a persistent `CommandQueue`, and shared-storage-mode buffers
//! read directly through `contents()` after `wait_until_completed`. Generalized here from a
//! fixed Ed25519 batch kernel to the glob/regex buffer-binding convention in §4.3.

use metal::{CompileOptions, Device, MTLResourceOptions, MTLSize};

use crate::batch::PathBatch;
use crate::error::{Error, GpuError};
use crate::glob::MatchOptions;
use crate::gpu::{pack_regex_states, DeviceCaps, Driver, REGEX_FLAG_ANCHORED_END, REGEX_FLAG_ANCHORED_START, REGEX_FLAG_WHOLE_MATCH};
use crate::regex::compile::{CompiledRegex, RegexFlags};

const WORKGROUP_SIZE: u64 = 256;

/// Metal Shading Language port of `shaders/glob_match.comp`. Metal has no `std140`/`std430`
/// distinction, so the buffer layouts are plain `uint`/`uchar` structs read at fixed offsets,
/// matching §6's "Metal uses `uchar`/`uint`, Vulkan uses `uint` with manual byte packing".
const GLOB_SHADER: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct Config {
	uint num_names;
	uint pattern_len;
	uint flags;
	uint max_name_len;
	uint names_offset;
	uint lengths_offset;
	uint _pad0;
	uint _pad1;
};

constant uint FLAG_CASE_INSENSITIVE = 1;
constant uint FLAG_MATCH_PATH = 2;
constant uint FLAG_PERIOD = 4;

inline uchar fold(uchar b) {
	return (b >= 65 && b <= 90) ? b + 32 : b;
}

inline bool chars_equal(uchar a, uchar b, bool ci) {
	return ci ? fold(a) == fold(b) : a == b;
}

// pi points just after '['. Mirrors glob_match.comp's match_class / glob.rs's match_class.
inline bool match_class(constant uchar* pattern, uint pattern_len, thread uint& pi, uint tb, bool have_tb, bool ci, thread bool& consumed) {
	uint start_pi = pi;
	bool negated = false;
	if (pattern[pi] == '!' || pattern[pi] == '^') { negated = true; pi++; }
	bool first = true;
	bool matched_any = false;

	while (true) {
		if (pi >= pattern_len) { consumed = false; pi = start_pi; return false; }
		uchar c = pattern[pi];
		if (c == ']' && !first) { pi++; break; }
		first = false;
		uchar lo = c;
		pi++;
		uchar hi = lo;
		if (pi + 1 < pattern_len && pattern[pi] == '-' && pattern[pi + 1] != ']') {
			pi++;
			hi = pattern[pi];
			pi++;
		}
		if (have_tb) {
			uchar folded_tb = ci ? fold(tb) : tb;
			uchar folded_lo = ci ? fold(lo) : lo;
			uchar folded_hi = ci ? fold(hi) : hi;
			if (folded_tb >= folded_lo && folded_tb <= folded_hi) { matched_any = true; }
		}
	}

	consumed = true;
	if (!have_tb) { return false; }
	return matched_any != negated;
}

kernel void match_names(
	constant Config& config [[buffer(0)]],
	constant uchar* pattern [[buffer(1)]],
	constant uchar* names [[buffer(2)]],
	constant uint* offsets [[buffer(3)]],
	constant uint* lengths [[buffer(4)]],
	device uint* results [[buffer(5)]],
	device atomic_uint* counter [[buffer(6)]],
	uint gid [[thread_position_in_grid]])
{
	if (gid >= config.num_names) { return; }

	uint base = offsets[gid];
	uint len = lengths[gid];
	bool ci = (config.flags & FLAG_CASE_INSENSITIVE) != 0;
	bool match_path = (config.flags & FLAG_MATCH_PATH) != 0;
	bool period = (config.flags & FLAG_PERIOD) != 0;

	uint seg_start = 0;
	if (!match_path) {
		for (uint i = 0; i < len; i++) {
			if (names[base + i] == '/') { seg_start = i + 1; }
		}
	}

	uint pi = 0, ni = 0;
	bool has_star = false;
	uint star_pi = 0, star_ni = 0;

	while (ni < len) {
		bool at_start = (ni == seg_start) || (ni > 0 && names[base + ni - 1] == '/');
		bool blocked = period && at_start && names[base + ni] == '.';

		bool advanced = false;
		if (pi < config.pattern_len) {
			uchar pc = pattern[pi];
			if (pc == '*') {
				has_star = true; star_pi = pi; star_ni = ni; pi++; advanced = true;
			} else if (pc == '?') {
				if (!blocked) { pi++; ni++; advanced = true; }
			} else if (pc == '[') {
				uint save_pi = pi;
				pi++;
				bool consumed;
				bool have_tb = ni < len;
				uchar tb = have_tb ? names[base + ni] : 0;
				bool ok = match_class(pattern, config.pattern_len, pi, tb, have_tb, ci, consumed);
				if (consumed) {
					if (ok && !blocked) { ni++; advanced = true; }
					// fall through to backtrack otherwise
				} else {
					pi = save_pi;
					if (!blocked && chars_equal(pattern[pi], names[base + ni], ci)) { pi++; ni++; advanced = true; }
				}
			} else {
				// a literal '.' in the pattern is exempt from the leading-period rule, matching
				// glob.rs's leading_period_blocks(..., pattern_byte_is_dot, ...)
				if ((!blocked || pc == '.') && chars_equal(pc, names[base + ni], ci)) { pi++; ni++; advanced = true; }
			}
		}

		if (!advanced) {
			if (has_star) { pi = star_pi + 1; star_ni++; ni = star_ni; continue; }
			results[gid] = 0;
			return;
		}
	}

	while (pi < config.pattern_len && pattern[pi] == '*') { pi++; }
	bool is_match = (pi == config.pattern_len);
	results[gid] = is_match ? 1 : 0;
	if (is_match) { atomic_fetch_add_explicit(counter, 1, memory_order_relaxed); }
}
"#;

/// Metal Shading Language port of `shaders/regex_match.comp` (bitset NFA simulation).
const REGEX_SHADER: &str = r#"
#include <metal_stdlib>
using namespace metal;

struct Config {
	uint num_names;
	uint pattern_len;
	uint flags;
	uint max_name_len;
	uint names_offset;
	uint lengths_offset;
	uint _pad0;
	uint _pad1;
};

struct RegexHeader {
	uint num_states;
	uint start_state;
	uint num_groups;
	uint regex_flags;
};

constant uint FLAG_ANCHORED_START = 1;
constant uint FLAG_WHOLE_MATCH = 4;
constant uint TY_LITERAL = 0, TY_CHAR_CLASS = 1, TY_DOT = 2, TY_SPLIT = 3, TY_MATCH = 4;
constant uint TY_GROUP_START = 5, TY_GROUP_END = 6, TY_WORD_BOUNDARY = 7, TY_NOT_WORD_BOUNDARY = 8;
constant uint TY_LINE_START = 9, TY_LINE_END = 10, TY_ANY = 11;
constant uint NO_STATE = 0xFFFFu;

inline bool is_word_byte(bool in_bounds, uchar b) {
	if (!in_bounds) return false;
	return (b >= '0' && b <= '9') || (b >= 'A' && b <= 'Z') || (b >= 'a' && b <= 'z') || b == '_';
}

kernel void regex_match_names(
	constant Config& config [[buffer(0)]],
	constant uint* state_table [[buffer(1)]],
	constant uchar* names [[buffer(2)]],
	constant uint* offsets [[buffer(3)]],
	constant uint* lengths [[buffer(4)]],
	device uint* results [[buffer(5)]],
	device atomic_uint* counter [[buffer(6)]],
	constant RegexHeader& header [[buffer(7)]],
	constant uint* bitmap_pool [[buffer(8)]],
	uint gid [[thread_position_in_grid]])
{
	if (gid >= config.num_names) { return; }

	uint base = offsets[gid];
	uint len = lengths[gid];

	thread uint current[8];
	thread uint next[8];
	for (int i = 0; i < 8; i++) { current[i] = 0; }

	thread uint stack[256];
	auto add_closure = [&](thread uint* set_words, uint start_id, uint pos) {
		int sp = 0;
		stack[sp++] = start_id;
		while (sp > 0) {
			sp--;
			uint id = stack[sp];
			if (id == NO_STATE) continue;
			uint word_idx = id / 32, bit = id % 32;
			if ((set_words[word_idx] >> bit) & 1) continue;
			set_words[word_idx] |= (1u << bit);

			uint w0 = state_table[id * 3], w1 = state_table[id * 3 + 1];
			uint ty = w0 & 0xFF;
			uint out = (w0 >> 16) & 0xFFFF;
			uint out2 = w1 & 0xFFFF;

			if (ty == TY_SPLIT) { stack[sp++] = out; stack[sp++] = out2; }
			else if (ty == TY_GROUP_START || ty == TY_GROUP_END) { stack[sp++] = out; }
			else if (ty == TY_LINE_START) { if (pos == 0) stack[sp++] = out; }
			else if (ty == TY_LINE_END) { if (pos == len) stack[sp++] = out; }
			else if (ty == TY_WORD_BOUNDARY || ty == TY_NOT_WORD_BOUNDARY) {
				bool before = is_word_byte(pos > 0, pos > 0 ? names[base + pos - 1] : 0);
				bool after = is_word_byte(pos < len, pos < len ? names[base + pos] : 0);
				bool boundary = before != after;
				if ((ty == TY_WORD_BOUNDARY) == boundary) { stack[sp++] = out; }
			}
		}
	};

	add_closure(current, header.start_state, (config.flags & FLAG_WHOLE_MATCH) != 0 ? 0 : 0);

	bool whole = (header.regex_flags & FLAG_WHOLE_MATCH) != 0;
	bool is_match = false;

	for (uint pos = 0; pos < len; pos++) {
		bool any = false;
		for (int i = 0; i < 8; i++) { if (current[i] != 0) any = true; }
		if (!any && whole) break;

		uchar b = names[base + pos];
		for (int i = 0; i < 8; i++) { next[i] = 0; }
		for (uint id = 0; id < header.num_states; id++) {
			uint word_idx = id / 32, bit = id % 32;
			if (!((current[word_idx] >> bit) & 1)) continue;

			uint w0 = state_table[id * 3], w1 = state_table[id * 3 + 1], w2 = state_table[id * 3 + 2];
			uint ty = w0 & 0xFF;
			uint flags = (w0 >> 8) & 0xFF;
			uint out = (w0 >> 16) & 0xFFFF;
			uint literal = (w1 >> 16) & 0xFF;

			bool advances = false;
			if (ty == TY_LITERAL) { advances = literal == b; }
			else if (ty == TY_CHAR_CLASS) {
				uint bit_word = bitmap_pool[w2 + b / 32];
				bool set = ((bit_word >> (b % 32)) & 1) != 0;
				advances = set != ((flags & 1) != 0);
			}
			else if (ty == TY_DOT) { advances = b != '\n'; }
			else if (ty == TY_ANY) { advances = true; }

			if (advances) { add_closure(next, out, pos + 1); }
		}
		for (int i = 0; i < 8; i++) { current[i] = next[i]; }

		for (uint id = 0; id < header.num_states; id++) {
			uint word_idx = id / 32, bit = id % 32;
			if (((current[word_idx] >> bit) & 1) && (state_table[id * 3] & 0xFF) == TY_MATCH) { is_match = true; }
		}
		if (is_match && !whole) break;
	}

	results[gid] = is_match ? 1 : 0;
	if (is_match) { atomic_fetch_add_explicit(counter, 1, memory_order_relaxed); }
}
"#;

pub struct MetalDriver {
	device: Device,
	queue: metal::CommandQueue,
	glob_pipeline: metal::ComputePipelineState,
	regex_pipeline: metal::ComputePipelineState,
	caps: DeviceCaps,
}

impl MetalDriver {
	pub fn new() -> Result<Self, Error> {
		let device = Device::system_default().ok_or(GpuError::NoSuitableDevice)?;
		let queue = device.new_command_queue();
		let options = CompileOptions::new();

		let glob_library = device.new_library_with_source(GLOB_SHADER, &options).map_err(GpuError::MetalError)?;
		let glob_fn = glob_library.get_function("match_names", None).map_err(GpuError::MetalError)?;
		let glob_pipeline = device.new_compute_pipeline_state_with_function(&glob_fn).map_err(GpuError::MetalError)?;

		let regex_library = device.new_library_with_source(REGEX_SHADER, &options).map_err(GpuError::MetalError)?;
		let regex_fn = regex_library.get_function("regex_match_names", None).map_err(GpuError::MetalError)?;
		let regex_pipeline = device.new_compute_pipeline_state_with_function(&regex_fn).map_err(GpuError::MetalError)?;

		let caps = DeviceCaps {
			max_threads_per_workgroup: glob_pipeline.max_total_threads_per_threadgroup() as u32,
			max_buffer_size: device.max_buffer_length(),
			device_local_memory: device.recommended_max_working_set_size(),
			unified_memory: device.has_unified_memory(),
		};

		Ok(MetalDriver { device, queue, glob_pipeline, regex_pipeline, caps })
	}

	fn shared_buffer(&self, bytes: &[u8]) -> metal::Buffer {
		let len = bytes.len().max(4) as u64;
		let buffer = self.device.new_buffer(len, MTLResourceOptions::StorageModeShared);
		unsafe {
			std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.contents() as *mut u8, bytes.len());
		}
		buffer
	}

	fn dispatch(&self, pipeline: &metal::ComputePipelineState, buffers: &[&metal::Buffer], num_names: u32, results_idx: usize) -> (Vec<u32>, u32) {
		let command_buffer = self.queue.new_command_buffer();
		let encoder = command_buffer.new_compute_command_encoder();
		encoder.set_compute_pipeline_state(pipeline);
		for (i, buffer) in buffers.iter().enumerate() {
			encoder.set_buffer(i as u64, Some(buffer), 0);
		}

		let thread_group_size = (WORKGROUP_SIZE).min(pipeline.max_total_threads_per_threadgroup());
		let num_groups = (num_names as u64).div_ceil(thread_group_size).max(1);

		encoder.dispatch_thread_groups(MTLSize::new(num_groups, 1, 1), MTLSize::new(thread_group_size, 1, 1));
		encoder.end_encoding();

		command_buffer.commit();
		command_buffer.wait_until_completed();

		let results_buffer = buffers[results_idx];
		let counter_buffer = buffers[buffers.len() - 1];

		let results = unsafe { std::slice::from_raw_parts(results_buffer.contents() as *const u32, num_names as usize) }.to_vec();
		let count = unsafe { *(counter_buffer.contents() as *const u32) };

		(results, count)
	}
}

fn u32s_to_le_bytes(words: &[u32]) -> Vec<u8> {
	words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn pack_config(num_names: u32, pattern_len: u32, flags: u32, max_name_len: u32) -> Vec<u8> {
	u32s_to_le_bytes(&[num_names, pattern_len, flags, max_name_len, 0, 0, 0, 0])
}

impl Driver for MetalDriver {
	fn caps(&self) -> DeviceCaps {
		self.caps
	}

	fn match_names(&mut self, batch: &PathBatch, pattern: &[u8], options: MatchOptions) -> Result<Vec<bool>, Error> {
		let max_name_len = batch.lengths.iter().copied().max().unwrap_or(0);
		let config_bytes = pack_config(batch.len() as u32, pattern.len() as u32, options.bits(), max_name_len);

		let config_buf = self.shared_buffer(&config_bytes);
		let pattern_buf = self.shared_buffer(pattern);
		let names_buf = self.shared_buffer(&batch.names_data);
		let offsets_buf = self.shared_buffer(&u32s_to_le_bytes(&batch.offsets));
		let lengths_buf = self.shared_buffer(&u32s_to_le_bytes(&batch.lengths));
		let results_buf = self.shared_buffer(&vec![0u8; batch.len() * 4]);
		let counter_buf = self.shared_buffer(&[0u8; 4]);

		let buffers = [&config_buf, &pattern_buf, &names_buf, &offsets_buf, &lengths_buf, &results_buf, &counter_buf];
		let (results, _count) = self.dispatch(&self.glob_pipeline, &buffers, batch.len() as u32, 5);

		Ok(results.into_iter().map(|v| v != 0).collect())
	}

	fn regex_match_names(&mut self, batch: &PathBatch, regex: &CompiledRegex, whole_match: bool) -> Result<Vec<bool>, Error> {
		let max_name_len = batch.lengths.iter().copied().max().unwrap_or(0);
		let config_bytes = pack_config(batch.len() as u32, 0, 0, max_name_len);

		let mut regex_flags = 0u32;
		if regex.flags.contains(RegexFlags::ANCHORED_START) {
			regex_flags |= REGEX_FLAG_ANCHORED_START;
		}
		if regex.flags.contains(RegexFlags::ANCHORED_END) {
			regex_flags |= REGEX_FLAG_ANCHORED_END;
		}
		if whole_match {
			regex_flags |= REGEX_FLAG_WHOLE_MATCH;
		}
		let header_bytes = u32s_to_le_bytes(&[regex.states.len() as u32, regex.start_state as u32, regex.num_groups as u32, regex_flags]);
		let state_bytes = u32s_to_le_bytes(&pack_regex_states(regex));
		let bitmap_bytes = u32s_to_le_bytes(&regex.bitmap_pool);

		let config_buf = self.shared_buffer(&config_bytes);
		let state_buf = self.shared_buffer(&state_bytes);
		let names_buf = self.shared_buffer(&batch.names_data);
		let offsets_buf = self.shared_buffer(&u32s_to_le_bytes(&batch.offsets));
		let lengths_buf = self.shared_buffer(&u32s_to_le_bytes(&batch.lengths));
		let results_buf = self.shared_buffer(&vec![0u8; batch.len() * 4]);
		let counter_buf = self.shared_buffer(&[0u8; 4]);
		let header_buf = self.shared_buffer(&header_bytes);
		let bitmap_buf = self.shared_buffer(&bitmap_bytes);

		let buffers = [&config_buf, &state_buf, &names_buf, &offsets_buf, &lengths_buf, &results_buf, &counter_buf, &header_buf, &bitmap_buf];
		let (results, _count) = self.dispatch(&self.regex_pipeline, &buffers, batch.len() as u32, 5);

		Ok(results.into_iter().map(|v| v != 0).collect())
	}
}
