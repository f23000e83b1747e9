//! Thompson-NFA regex engine (§4.2, §4.4): a small AST, a recursive-descent parser, a compiler
//! that lowers the AST to the packed, GPU-executable state table described in §3, and a bitset
//! NFA simulator (`exec`) usable on both CPU and as the CPU-side reference for the GPU kernel.

pub mod compile;
pub mod exec;

use crate::error::Error;

/// Maximum number of NFA states a compiled regex may have (§4.4, §9 open question). The on-wire
/// `out`/`out2` successor fields are `u16` and the CPU/GPU execution bitset is sized for this
/// many states, so raising the limit means widening both, not just this constant
pub const MAX_STATES: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
	Literal(u8),
	Dot,
	Class { negated: bool, ranges: Vec<(u8, u8)> },
	Concat(Vec<Ast>),
	Alt(Vec<Ast>),
	Star(Box<Ast>),
	Plus(Box<Ast>),
	Question(Box<Ast>),
	Group(Box<Ast>, u8),
	StartAnchor,
	EndAnchor,
	WordBoundary,
	NotWordBoundary,
}

struct Parser<'a> {
	pattern: &'a [u8],
	pos: usize,
	next_group: u8,
}

impl<'a> Parser<'a> {
	fn new(pattern: &'a [u8]) -> Self {
		Parser { pattern, pos: 0, next_group: 0 }
	}

	fn peek(&self) -> Option<u8> {
		self.pattern.get(self.pos).copied()
	}

	fn bump(&mut self) -> Option<u8> {
		let b = self.peek()?;
		self.pos += 1;
		Some(b)
	}

	fn eat(&mut self, b: u8) -> bool {
		if self.peek() == Some(b) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	fn parse_alt(&mut self) -> Result<Ast, Error> {
		let mut arms = vec![self.parse_concat()?];
		while self.eat(b'|') {
			arms.push(self.parse_concat()?);
		}
		Ok(if arms.len() == 1 { arms.pop().unwrap() } else { Ast::Alt(arms) })
	}

	fn parse_concat(&mut self) -> Result<Ast, Error> {
		let mut parts = Vec::new();
		while let Some(b) = self.peek() {
			if b == b'|' || b == b')' {
				break;
			}
			parts.push(self.parse_repeat()?);
		}
		Ok(match parts.len() {
			0 => Ast::Concat(Vec::new()),
			1 => parts.pop().unwrap(),
			_ => Ast::Concat(parts),
		})
	}

	fn parse_repeat(&mut self) -> Result<Ast, Error> {
		let atom = self.parse_atom()?;
		Ok(match self.peek() {
			Some(b'*') => { self.pos += 1; Ast::Star(Box::new(atom)) }
			Some(b'+') => { self.pos += 1; Ast::Plus(Box::new(atom)) }
			Some(b'?') => { self.pos += 1; Ast::Question(Box::new(atom)) }
			_ => atom,
		})
	}

	fn parse_atom(&mut self) -> Result<Ast, Error> {
		match self.bump() {
			None => Err(Error::InvalidRegexPattern("unexpected end of pattern".into())),
			Some(b'.') => Ok(Ast::Dot),
			Some(b'^') => Ok(Ast::StartAnchor),
			Some(b'$') => Ok(Ast::EndAnchor),
			Some(b'(') => {
				let group_idx = self.next_group;
				self.next_group += 1;
				let inner = self.parse_alt()?;
				if !self.eat(b')') {
					return Err(Error::InvalidRegexPattern("unterminated group".into()));
				}
				Ok(Ast::Group(Box::new(inner), group_idx))
			}
			Some(b'[') => self.parse_class(),
			Some(b'\\') => match self.bump() {
				None => Err(Error::InvalidRegexPattern("trailing backslash".into())),
				Some(b'b') => Ok(Ast::WordBoundary),
				Some(b'B') => Ok(Ast::NotWordBoundary),
				Some(other) => Ok(Ast::Literal(other)),
			},
			Some(b')') | Some(b'|') => Err(Error::InvalidRegexPattern("unexpected metacharacter".into())),
			Some(b'*') | Some(b'+') | Some(b'?') => Err(Error::InvalidRegexPattern("repeat operator with nothing to repeat".into())),
			Some(lit) => Ok(Ast::Literal(lit)),
		}
	}

	fn parse_class(&mut self) -> Result<Ast, Error> {
		let negated = self.eat(b'!') || self.eat(b'^');
		let mut ranges = Vec::new();
		let mut first = true;

		loop {
			match self.peek() {
				None => return Err(Error::InvalidRegexPattern("unterminated character class".into())),
				Some(b']') if !first => { self.pos += 1; break; }
				_ => {}
			}
			let lo = self.bump().unwrap();
			first = false;
			if self.peek() == Some(b'-') && self.pattern.get(self.pos + 1).is_some() && self.pattern[self.pos + 1] != b']' {
				self.pos += 1;
				let hi = self.bump().unwrap();
				ranges.push((lo, hi));
			} else {
				ranges.push((lo, lo));
			}
		}

		Ok(Ast::Class { negated, ranges })
	}
}

/// Parses `pattern` into an AST. `pattern` is a byte string, not necessarily valid UTF-8, matching
/// the rest of this crate's treatment of paths and patterns as opaque bytes
pub fn parse(pattern: &[u8]) -> Result<Ast, Error> {
	let mut parser = Parser::new(pattern);
	let ast = parser.parse_alt()?;
	if parser.pos != pattern.len() {
		return Err(Error::InvalidRegexPattern(format!("unexpected character at offset {}", parser.pos)));
	}
	Ok(ast)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_parse_literal_concat() {
		assert_eq!(parse(b"abc").unwrap(), Ast::Concat(vec![Ast::Literal(b'a'), Ast::Literal(b'b'), Ast::Literal(b'c')]));
	}

	#[test]
	fn test_parse_alt() {
		assert_eq!(parse(b"a|b").unwrap(), Ast::Alt(vec![Ast::Literal(b'a'), Ast::Literal(b'b')]));
	}

	#[test]
	fn test_parse_star_plus_question() {
		assert_eq!(parse(b"a*").unwrap(), Ast::Star(Box::new(Ast::Literal(b'a'))));
		assert_eq!(parse(b"a+").unwrap(), Ast::Plus(Box::new(Ast::Literal(b'a'))));
		assert_eq!(parse(b"a?").unwrap(), Ast::Question(Box::new(Ast::Literal(b'a'))));
	}

	#[test]
	fn test_parse_class() {
		assert_eq!(parse(b"[a-z]").unwrap(), Ast::Class { negated: false, ranges: vec![(b'a', b'z')] });
		assert_eq!(parse(b"[!0-9]").unwrap(), Ast::Class { negated: true, ranges: vec![(b'0', b'9')] });
	}

	#[test]
	fn test_parse_group() {
		assert_eq!(parse(b"(ab)").unwrap(), Ast::Group(Box::new(Ast::Concat(vec![Ast::Literal(b'a'), Ast::Literal(b'b')])), 0));
	}

	#[test]
	fn test_parse_escaped_dot() {
		assert_eq!(parse(br"\.").unwrap(), Ast::Literal(b'.'));
	}

	#[test]
	fn test_parse_unterminated_group_is_error() {
		assert!(parse(b"(ab").is_err());
	}
}
