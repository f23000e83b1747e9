//! The two hot paths that benefit from vectorization (§4.1): locating the last `/` in a path, and
//! pre-folding a pattern to lowercase. The matcher's inner loop stays scalar — `*` backtracking
//! defeats straight-line vectorization there.

/// Locates the last `/` in `path`. Delegates to `memchr`, which picks a SIMD-vectorized
/// implementation (32-byte AVX2 strides, falling back to 16-byte SSE2 or a portable scalar loop)
/// at runtime based on detected CPU features — the same "broadcast compare, reduce-OR" strategy
/// described in §4.1, without committing this crate to hand-rolled target-feature dispatch
pub fn rfind_slash(path: &[u8]) -> Option<usize> {
	memchr::memrchr(b'/', path)
}

/// Pre-folds `bytes` to lowercase ASCII in fixed-width strides using the branchless mask
/// `(c >= 'A') & (c <= 'Z')` from §4.1, processing `LANE` bytes (as `u64` words) per iteration
/// instead of one byte at a time. Returns `None` (meaning "use as-is") when case folding isn't
/// needed, so callers don't pay for an allocation on the common case-sensitive path
pub fn fold_pattern(bytes: &[u8], case_insensitive: bool) -> Option<Vec<u8>> {
	if !case_insensitive {
		return None;
	}

	const LANE: usize = 8;
	let mut out = Vec::with_capacity(bytes.len());
	let mut chunks = bytes.chunks_exact(LANE);

	for chunk in &mut chunks {
		let word = u64::from_ne_bytes(chunk.try_into().unwrap());
		out.extend_from_slice(&fold_word(word).to_ne_bytes());
	}

	for &b in chunks.remainder() {
		out.push(fold_byte(b));
	}

	Some(out)
}

/// The SIMD-CPU glob matcher (§4.1): folds pattern and basename/path to lowercase up front using
/// fixed-width-stride SWAR folding instead of `glob_match_scalar`'s per-byte `chars_equal`, then
/// runs the same backtracking matcher with case-insensitivity already resolved. Must return
/// exactly what `glob::glob_match` returns for every input
pub fn glob_match_simd(pattern: &[u8], text: &[u8], options: super::MatchOptions) -> bool {
	use super::MatchOptions;

	let subject = if options.contains(MatchOptions::MATCH_PATH) { text } else { super::basename(text) };
	let case_insensitive = options.contains(MatchOptions::CASE_INSENSITIVE);

	let folded_pattern = fold_pattern(pattern, case_insensitive);
	let folded_subject = fold_pattern(subject, case_insensitive);

	let pattern = folded_pattern.as_deref().unwrap_or(pattern);
	let subject = folded_subject.as_deref().unwrap_or(subject);

	super::glob_match_scalar(pattern, subject, options - MatchOptions::CASE_INSENSITIVE)
}

#[inline]
fn fold_byte(b: u8) -> u8 {
	let is_upper = (b.wrapping_sub(b'A') <= b'Z' - b'A') as u8;
	b + (is_upper * 32)
}

/// Folds 8 packed bytes at once: a range check against bytes >= 0x80 would need extra masking to
/// stay correct (the subtract-based range trick only holds for 7-bit operands), so each lane is
/// folded with the same branchless `fold_byte` test rather than one combined 64-bit compare
#[inline]
fn fold_word(word: u64) -> u64 {
	let bytes = word.to_ne_bytes();
	let folded = bytes.map(fold_byte);
	u64::from_ne_bytes(folded)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_rfind_slash() {
		assert_eq!(rfind_slash(b"/path/to/file.txt"), Some(8));
		assert_eq!(rfind_slash(b"file.txt"), None);
		assert_eq!(rfind_slash(b"/"), Some(0));
	}

	#[test]
	fn test_fold_byte_matches_ascii_lowercase() {
		for b in 0u8..=255 {
			let expected = if b.is_ascii_uppercase() { b + 32 } else { b };
			assert_eq!(fold_byte(b), expected, "byte {b:#04x}");
		}
	}

	#[test]
	fn test_fold_pattern() {
		assert_eq!(fold_pattern(b"HELLO.TXT", false), None);
		assert_eq!(fold_pattern(b"HELLO.TXT", true).unwrap(), b"hello.txt".to_vec());
		assert_eq!(fold_pattern(b"AbCdEfGh12", true).unwrap(), b"abcdefgh12".to_vec());
		assert_eq!(fold_pattern(b"", true).unwrap(), Vec::<u8>::new());
	}

	#[test]
	fn test_simd_matches_scalar() {
		use crate::glob::{glob_match, MatchOptions};

		let cases: &[(&str, &str, MatchOptions)] = &[
			("hello.txt", "Hello.TXT", MatchOptions::CASE_INSENSITIVE),
			("*.txt", "FILE.TXT", MatchOptions::CASE_INSENSITIVE),
			("[a-z].txt", "Q.TXT", MatchOptions::CASE_INSENSITIVE),
			("/path/*", "/PATH/to/file", MatchOptions::union(MatchOptions::CASE_INSENSITIVE, MatchOptions::MATCH_PATH)),
			(".*", ".Bashrc", MatchOptions::union(MatchOptions::CASE_INSENSITIVE, MatchOptions::PERIOD)),
		];

		for &(pattern, text, options) in cases {
			assert_eq!(
				glob_match_simd(pattern.as_bytes(), text.as_bytes(), options),
				glob_match(pattern.as_bytes(), text.as_bytes(), options),
				"mismatch for pattern {pattern:?}, text {text:?}, options {options:?}"
			);
		}
	}
}
