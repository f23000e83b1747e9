//! Lowers a parsed `Ast` to the packed Thompson-NFA state table described in §3/§4.4: a flat
//! array of 12-byte state records plus a pool of 256-bit character-class bitmaps. Compilation
//! uses the classic continuation-passing construction (`compile(ast, next) -> start_state`,
//! building backward from the accepting state) rather than Thompson's original patch-list
//! approach, since it needs no backpatching except for the two looping constructs (`*`, `+`).

use bitflags::bitflags;

use crate::error::Error;

use super::{Ast, MAX_STATES};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
	Literal = 0,
	CharClass = 1,
	Dot = 2,
	Split = 3,
	Match = 4,
	GroupStart = 5,
	GroupEnd = 6,
	WordBoundary = 7,
	NotWordBoundary = 8,
	LineStart = 9,
	LineEnd = 10,
	Any = 11,
}

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct StateFlags: u8 {
		const NEGATED = 1 << 0;
	}
}

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct RegexFlags: u32 {
		const ANCHORED_START   = 1 << 0;
		const ANCHORED_END     = 1 << 1;
		const CASE_INSENSITIVE = 1 << 2;
	}
}

/// One 12-byte on-wire state record: `{type, flags, out, out2, literal, group_idx, bitmap_offset}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PackedState {
	pub ty: u8,
	pub flags: u8,
	pub out: u16,
	pub out2: u16,
	pub literal: u8,
	pub group_idx: u8,
	pub bitmap_offset: u32,
}

const NO_STATE: u16 = u16::MAX;

impl PackedState {
	fn new(ty: StateType) -> Self {
		PackedState { ty: ty as u8, flags: 0, out: NO_STATE, out2: NO_STATE, literal: 0, group_idx: 0, bitmap_offset: u32::MAX }
	}
}

/// An immutable, owned, compiled regex. Bitset-sized for execution by `exec::simulate`; the
/// bitmap pool and state table are exactly the flat arrays described in §3
#[derive(Debug, Clone)]
pub struct CompiledRegex {
	pub states: Vec<PackedState>,
	pub bitmap_pool: Vec<u32>,
	pub start_state: u16,
	pub num_groups: u8,
	pub flags: RegexFlags,
}

const WORDS_PER_BITMAP: usize = 8;

struct Builder {
	states: Vec<PackedState>,
	bitmap_pool: Vec<u32>,
	case_insensitive: bool,
}

impl Builder {
	fn alloc(&mut self, state: PackedState) -> Result<u16, Error> {
		if self.states.len() >= MAX_STATES {
			return Err(Error::RegexTooComplex { num_states: self.states.len() + 1, max_states: MAX_STATES });
		}
		self.states.push(state);
		Ok((self.states.len() - 1) as u16)
	}

	fn alloc_bitmap(&mut self, ranges: &[(u8, u8)], negated: bool) -> (u32, StateFlags) {
		let mut words = [0u32; WORDS_PER_BITMAP];
		for &(lo, hi) in ranges {
			for b in lo..=hi {
				set_bit(&mut words, b);
				if self.case_insensitive {
					set_bit(&mut words, mirror_case(b));
				}
			}
		}
		let offset = self.bitmap_pool.len() as u32;
		self.bitmap_pool.extend_from_slice(&words);
		let flags = if negated { StateFlags::NEGATED } else { StateFlags::empty() };
		(offset, flags)
	}

	/// Compiles `ast` so that, once matched, control continues at `next`. Returns the id of the
	/// state to enter in order to attempt `ast`
	fn compile(&mut self, ast: &Ast, next: u16) -> Result<u16, Error> {
		match ast {
			Ast::Literal(b) => {
				if self.case_insensitive && b.is_ascii_alphabetic() {
					// Fold at compile time (§4.4): a case-insensitive literal becomes a two-byte
					// character class instead of carrying a per-byte fold in the matcher
					self.compile(&Ast::Class { negated: false, ranges: vec![(*b, *b)] }, next)
				} else {
					let mut s = PackedState::new(StateType::Literal);
					s.literal = *b;
					s.out = next;
					self.alloc(s)
				}
			}
			Ast::Dot => {
				let mut s = PackedState::new(StateType::Dot);
				s.out = next;
				self.alloc(s)
			}
			Ast::Class { negated, ranges } => {
				let (offset, flags) = self.alloc_bitmap(ranges, *negated);
				let mut s = PackedState::new(StateType::CharClass);
				s.flags = flags.bits();
				s.bitmap_offset = offset;
				s.out = next;
				self.alloc(s)
			}
			Ast::StartAnchor => {
				let mut s = PackedState::new(StateType::LineStart);
				s.out = next;
				self.alloc(s)
			}
			Ast::EndAnchor => {
				let mut s = PackedState::new(StateType::LineEnd);
				s.out = next;
				self.alloc(s)
			}
			Ast::WordBoundary => {
				let mut s = PackedState::new(StateType::WordBoundary);
				s.out = next;
				self.alloc(s)
			}
			Ast::NotWordBoundary => {
				let mut s = PackedState::new(StateType::NotWordBoundary);
				s.out = next;
				self.alloc(s)
			}
			Ast::Concat(parts) => {
				let mut cont = next;
				for part in parts.iter().rev() {
					cont = self.compile(part, cont)?;
				}
				if parts.is_empty() {
					// An empty concatenation matches the empty string: fall through immediately
					Ok(next)
				} else {
					Ok(cont)
				}
			}
			Ast::Alt(arms) => {
				debug_assert!(arms.len() >= 2);
				let starts: Result<Vec<u16>, Error> = arms.iter().map(|arm| self.compile(arm, next)).collect();
				let starts = starts?;
				let mut acc = *starts.last().unwrap();
				for &start in starts[..starts.len() - 1].iter().rev() {
					let mut split = PackedState::new(StateType::Split);
					split.out = start;
					split.out2 = acc;
					acc = self.alloc(split)?;
				}
				Ok(acc)
			}
			Ast::Question(inner) => {
				let inner_start = self.compile(inner, next)?;
				let mut split = PackedState::new(StateType::Split);
				split.out = inner_start;
				split.out2 = next;
				self.alloc(split)
			}
			Ast::Star(inner) => {
				let split_id = self.alloc(PackedState::new(StateType::Split))?;
				let inner_start = self.compile(inner, split_id)?;
				self.states[split_id as usize].out = inner_start;
				self.states[split_id as usize].out2 = next;
				Ok(split_id)
			}
			Ast::Plus(inner) => {
				let split_id = self.alloc(PackedState::new(StateType::Split))?;
				let inner_start = self.compile(inner, split_id)?;
				self.states[split_id as usize].out = inner_start;
				self.states[split_id as usize].out2 = next;
				Ok(inner_start)
			}
			Ast::Group(inner, group_idx) => {
				let mut end = PackedState::new(StateType::GroupEnd);
				end.group_idx = *group_idx;
				end.out = next;
				let end_id = self.alloc(end)?;
				let inner_start = self.compile(inner, end_id)?;
				let mut start = PackedState::new(StateType::GroupStart);
				start.group_idx = *group_idx;
				start.out = inner_start;
				self.alloc(start)
			}
		}
	}
}

fn set_bit(words: &mut [u32; WORDS_PER_BITMAP], b: u8) {
	words[(b as usize) / 32] |= 1 << ((b as usize) % 32);
}

fn mirror_case(b: u8) -> u8 {
	if b.is_ascii_uppercase() {
		b.to_ascii_lowercase()
	} else if b.is_ascii_lowercase() {
		b.to_ascii_uppercase()
	} else {
		b
	}
}

fn num_groups(ast: &Ast) -> u8 {
	match ast {
		Ast::Group(inner, idx) => (*idx + 1).max(num_groups(inner)),
		Ast::Concat(parts) | Ast::Alt(parts) => parts.iter().map(num_groups).max().unwrap_or(0),
		Ast::Star(inner) | Ast::Plus(inner) | Ast::Question(inner) => num_groups(inner),
		_ => 0,
	}
}

/// `^` or `$` only hoist into the header flags (letting the executor skip the scanning loop or
/// the end-of-input check entirely) when they sit at the very top of the pattern, outside any
/// alternation arm that doesn't also start/end the same way
fn leading_anchor(ast: &Ast) -> bool {
	match ast {
		Ast::StartAnchor => true,
		Ast::Concat(parts) => parts.first().map(leading_anchor).unwrap_or(false),
		Ast::Alt(arms) => arms.iter().all(leading_anchor),
		_ => false,
	}
}

fn trailing_anchor(ast: &Ast) -> bool {
	match ast {
		Ast::EndAnchor => true,
		Ast::Concat(parts) => parts.last().map(trailing_anchor).unwrap_or(false),
		Ast::Alt(arms) => arms.iter().all(trailing_anchor),
		_ => false,
	}
}

/// Compiles `ast` to a `CompiledRegex`. `case_insensitive` drives the compile-time fold described
/// in §4.4: letter ranges in character classes (and ASCII-alphabetic literals, folded into
/// single-byte classes) get both cases' bits set so the executor never folds per byte
pub fn compile(ast: &Ast, case_insensitive: bool) -> Result<CompiledRegex, Error> {
	let mut builder = Builder { states: Vec::new(), bitmap_pool: Vec::new(), case_insensitive };

	let match_id = builder.alloc(PackedState::new(StateType::Match))?;
	let start = builder.compile(ast, match_id)?;

	let mut flags = RegexFlags::empty();
	if case_insensitive {
		flags |= RegexFlags::CASE_INSENSITIVE;
	}
	if leading_anchor(ast) {
		flags |= RegexFlags::ANCHORED_START;
	}
	if trailing_anchor(ast) {
		flags |= RegexFlags::ANCHORED_END;
	}

	Ok(CompiledRegex {
		states: builder.states,
		bitmap_pool: builder.bitmap_pool,
		start_state: start,
		num_groups: num_groups(ast),
		flags,
	})
}

/// Parses and compiles `pattern` in one step, enforcing the size limits from §7
pub fn parse_and_compile(pattern: &[u8], case_insensitive: bool) -> Result<CompiledRegex, Error> {
	let ast = super::parse(pattern)?;
	compile(&ast, case_insensitive)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_compile_literal() {
		let re = parse_and_compile(b"ab", false).unwrap();
		assert_eq!(re.states.len(), 3); // 'a', 'b', MATCH
	}

	#[test]
	fn test_compile_rejects_too_many_states() {
		let pattern: Vec<u8> = (0..300).map(|_| b'a').collect();
		let err = parse_and_compile(&pattern, false).unwrap_err();
		assert!(matches!(err, Error::RegexTooComplex { .. }));
	}

	#[test]
	fn test_anchors_hoisted_to_header() {
		let re = parse_and_compile(b"^abc$", false).unwrap();
		assert!(re.flags.contains(RegexFlags::ANCHORED_START));
		assert!(re.flags.contains(RegexFlags::ANCHORED_END));

		let re = parse_and_compile(b"abc", false).unwrap();
		assert!(!re.flags.contains(RegexFlags::ANCHORED_START));
	}

	#[test]
	fn test_case_insensitive_literal_becomes_class() {
		let re = parse_and_compile(b"a", true).unwrap();
		assert_eq!(re.states[re.start_state as usize].ty, StateType::CharClass as u8);
	}

	#[test]
	fn test_group_count() {
		let re = parse_and_compile(b"(a)(b(c))", false).unwrap();
		assert_eq!(re.num_groups, 3);
	}
}
