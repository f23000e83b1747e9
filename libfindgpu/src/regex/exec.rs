//! Bitset NFA simulation (§4.2): the same algorithm `defuz-regex`'s `nfa.rs` runs on the CPU,
//! generalized to drive over the packed state table from `compile` and sized for the 256-state
//! ceiling instead of a growable `Vec<bool>`. This is also the reference the GPU kernels are
//! checked against, since the kernel executes the identical table one thread per path.

use super::compile::{CompiledRegex, RegexFlags, StateFlags, StateType};

const WORDS: usize = super::MAX_STATES / 64;

#[derive(Clone, Copy, Default)]
struct StateSet([u64; WORDS]);

impl StateSet {
	fn is_set(&self, id: u16) -> bool {
		self.0[id as usize / 64] & (1 << (id as usize % 64)) != 0
	}

	fn set(&mut self, id: u16) {
		self.0[id as usize / 64] |= 1 << (id as usize % 64);
	}

	fn clear(&mut self) {
		self.0 = [0; WORDS];
	}

	fn is_empty(&self) -> bool {
		self.0.iter().all(|w| *w == 0)
	}
}

fn is_word_byte(b: Option<u8>) -> bool {
	matches!(b, Some(b) if b.is_ascii_alphanumeric() || b == b'_')
}

fn class_matches(re: &CompiledRegex, bitmap_offset: u32, flags: u8, b: u8) -> bool {
	let words = &re.bitmap_pool[bitmap_offset as usize..bitmap_offset as usize + 8];
	let set = words[(b as usize) / 32] & (1 << ((b as usize) % 32)) != 0;
	set != StateFlags::from_bits_truncate(flags).contains(StateFlags::NEGATED)
}

/// Adds `id` and every state reachable from it via zero-width transitions (splits, group
/// markers, anchors, word boundaries) to `set`, evaluated against the text surrounding position
/// `pos` in `text`
fn add_closure(re: &CompiledRegex, set: &mut StateSet, id: u16, text: &[u8], pos: usize) {
	if id == u16::MAX || set.is_set(id) {
		return;
	}
	set.set(id);

	let state = &re.states[id as usize];
	match state_type_of(state.ty) {
		StateType::Split => {
			add_closure(re, set, state.out, text, pos);
			add_closure(re, set, state.out2, text, pos);
		}
		StateType::GroupStart | StateType::GroupEnd => {
			add_closure(re, set, state.out, text, pos);
		}
		StateType::LineStart if pos == 0 => {
			add_closure(re, set, state.out, text, pos);
		}
		StateType::LineEnd if pos == text.len() => {
			add_closure(re, set, state.out, text, pos);
		}
		StateType::LineStart | StateType::LineEnd => {}
		StateType::WordBoundary | StateType::NotWordBoundary => {
			let before = pos.checked_sub(1).map(|i| text[i]);
			let after = text.get(pos).copied();
			let boundary = is_word_byte(before) != is_word_byte(after);
			let take = if state_type_of(state.ty) == StateType::WordBoundary { boundary } else { !boundary };
			if take {
				add_closure(re, set, state.out, text, pos);
			}
		}
		_ => {}
	}
}

fn state_type_of(ty: u8) -> StateType {
	match ty {
		0 => StateType::Literal,
		1 => StateType::CharClass,
		2 => StateType::Dot,
		3 => StateType::Split,
		4 => StateType::Match,
		5 => StateType::GroupStart,
		6 => StateType::GroupEnd,
		7 => StateType::WordBoundary,
		8 => StateType::NotWordBoundary,
		9 => StateType::LineStart,
		10 => StateType::LineEnd,
		_ => StateType::Any,
	}
}

fn has_match(re: &CompiledRegex, set: &StateSet) -> bool {
	set_states(set).any(|id| re.states[id as usize].ty == StateType::Match as u8)
}

fn set_states(set: &StateSet) -> impl Iterator<Item = u16> + '_ {
	(0..super::MAX_STATES as u16).filter(move |&id| set.is_set(id))
}

/// Runs the NFA over `text` starting a single thread-set at `start_pos`, returning whether a
/// `Match` state becomes live at any point. Doesn't track *where* the match ends, since callers
/// only need a yes/no predicate
fn run_from(re: &CompiledRegex, text: &[u8], start_pos: usize) -> bool {
	let mut current = StateSet::default();
	let mut next = StateSet::default();
	add_closure(re, &mut current, re.start_state, text, start_pos);

	if has_match(re, &current) {
		return true;
	}

	for pos in start_pos..text.len() {
		let b = text[pos];
		next.clear();
		for id in set_states(&current) {
			let state = &re.states[id as usize];
			let advances = match state_type_of(state.ty) {
				StateType::Literal => state.literal == b,
				StateType::CharClass => class_matches(re, state.bitmap_offset, state.flags, b),
				StateType::Dot => b != b'\n',
				StateType::Any => true,
				_ => false,
			};
			if advances {
				add_closure(re, &mut next, state.out, text, pos + 1);
			}
		}
		std::mem::swap(&mut current, &mut next);
		if current.is_empty() {
			return false;
		}
		if has_match(re, &current) {
			return true;
		}
	}

	false
}

/// Scanning match (§4.2's general predicate): tries successive start offsets unless the header
/// carries `ANCHORED_START`, in which case only offset 0 is tried. Used for `-name`/`-path`-style
/// substring-anywhere regex semantics
pub fn is_match_scanning(re: &CompiledRegex, text: &[u8]) -> bool {
	if re.flags.contains(RegexFlags::ANCHORED_START) {
		return run_from(re, text, 0);
	}
	for start in 0..=text.len() {
		if run_from(re, text, start) {
			return true;
		}
	}
	false
}

/// Whole-input match: always starts at offset 0 and only accepts if `Match` is live after the
/// entire input has been consumed, regardless of any anchors the pattern itself carries. This is
/// the predicate `-regex`/`-iregex` use (§8): they match the complete path, anchored at both
/// ends, independent of `^`/`$` inside the pattern
pub fn is_match_whole(re: &CompiledRegex, text: &[u8]) -> bool {
	let mut current = StateSet::default();
	let mut next = StateSet::default();
	add_closure(re, &mut current, re.start_state, text, 0);

	for pos in 0..text.len() {
		if current.is_empty() {
			return false;
		}
		let b = text[pos];
		next.clear();
		for id in set_states(&current) {
			let state = &re.states[id as usize];
			let advances = match state_type_of(state.ty) {
				StateType::Literal => state.literal == b,
				StateType::CharClass => class_matches(re, state.bitmap_offset, state.flags, b),
				StateType::Dot => b != b'\n',
				StateType::Any => true,
				_ => false,
			};
			if advances {
				add_closure(re, &mut next, state.out, text, pos + 1);
			}
		}
		std::mem::swap(&mut current, &mut next);
	}

	has_match(re, &current)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::regex::compile::parse_and_compile;

	#[test]
	fn test_scanning_match() {
		let re = parse_and_compile(b"abc", false).unwrap();
		assert!(is_match_scanning(&re, b"xxabcxx"));
		assert!(!is_match_scanning(&re, b"xxabxx"));
	}

	#[test]
	fn test_anchored_scanning_match() {
		let re = parse_and_compile(b"^abc", false).unwrap();
		assert!(is_match_scanning(&re, b"abcxx"));
		assert!(!is_match_scanning(&re, b"xabcxx"));
	}

	#[test]
	fn test_whole_match_ignores_lack_of_anchors() {
		let re = parse_and_compile(b"abc", false).unwrap();
		assert!(is_match_whole(&re, b"abc"));
		assert!(!is_match_whole(&re, b"xabcx"));
	}

	#[test]
	fn test_alternation_and_star() {
		let re = parse_and_compile(b"a(b|c)*d", false).unwrap();
		assert!(is_match_whole(&re, b"ad"));
		assert!(is_match_whole(&re, b"abcbcd"));
		assert!(!is_match_whole(&re, b"abce"));
	}

	#[test]
	fn test_case_insensitive_class_fold() {
		let re = parse_and_compile(b"README", true).unwrap();
		assert!(is_match_whole(&re, b"readme"));
		assert!(is_match_whole(&re, b"ReadMe"));
	}

	/// The concrete scenario from §8: a regex matching `.c` files somewhere under a `src` directory
	#[test]
	fn test_src_c_files_scenario() {
		// Only a.c and /src/q/b.c both contain /src/ and end in .c; a.h ends wrong and
		// /q/b.c never contains /src/ at all.
		let re = parse_and_compile(br".*/src/.*\.c", false).unwrap();
		let paths: &[&[u8]] = &[b"/p/src/a.c", b"/p/src/a.h", b"/src/q/b.c", b"/q/b.c"];
		let matches = paths.iter().filter(|p| is_match_whole(&re, p)).count();
		assert_eq!(matches, 2);
	}

	#[test]
	fn test_word_boundary() {
		let re = parse_and_compile(br"\bfoo\b", false).unwrap();
		assert!(is_match_scanning(&re, b"a foo b"));
		assert!(!is_match_scanning(&re, b"a foobar b"));
	}
}
