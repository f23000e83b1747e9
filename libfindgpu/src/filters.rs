//! Per-entry stat-based filters (§10.5): `-type`, `-size`, `-mtime`/`-atime`/`-ctime`, `-empty`.
//! Evaluated only against entries the name/path/regex predicate already narrowed, after the
//! GPU-batchable part of the pipeline runs, mirroring `find`'s left-to-right short-circuit.

use std::fs::{self, Metadata};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
	Exact,
	GreaterThan,
	LessThan,
}

fn parse_signed(spec: &str) -> Result<(Cmp, &str), String> {
	match spec.as_bytes().first() {
		Some(b'+') => Ok((Cmp::GreaterThan, &spec[1..])),
		Some(b'-') => Ok((Cmp::LessThan, &spec[1..])),
		Some(_) => Ok((Cmp::Exact, spec)),
		None => Err("empty filter argument".to_string()),
	}
}

/// §6's exact size suffix table: `c`=1, `w`=2, `b`=512, `k`/`K`=1024, `M`=1048576, `G`=1073741824;
/// no suffix means 512-byte blocks.
fn suffix_multiplier(suffix: u8) -> Option<u64> {
	match suffix {
		b'c' => Some(1),
		b'w' => Some(2),
		b'b' => Some(512),
		b'k' | b'K' => Some(1024),
		b'M' => Some(1024 * 1024),
		b'G' => Some(1024 * 1024 * 1024),
		_ => None,
	}
}

#[derive(Debug, Clone, Copy)]
pub struct SizeFilter {
	cmp: Cmp,
	bytes: u64,
}

/// Parses a `-size` argument like `+1M`, `-512c`, `100` (§6)
pub fn parse_size(spec: &str) -> Result<SizeFilter, String> {
	let (cmp, rest) = parse_signed(spec)?;
	let (digits, multiplier) = match rest.as_bytes().last() {
		Some(&suffix) if suffix_multiplier(suffix).is_some() => (&rest[..rest.len() - 1], suffix_multiplier(suffix).unwrap()),
		_ => (rest, 512),
	};
	let count: u64 = digits.parse().map_err(|_| format!("invalid size argument: {spec}"))?;
	Ok(SizeFilter { cmp, bytes: count * multiplier })
}

pub fn size_matches(filter: &SizeFilter, file_size: u64) -> bool {
	match filter.cmp {
		Cmp::Exact => file_size == filter.bytes,
		Cmp::GreaterThan => file_size > filter.bytes,
		Cmp::LessThan => file_size < filter.bytes,
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
	Mtime,
	Atime,
	Ctime,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeFilter {
	cmp: Cmp,
	days: i64,
}

/// Parses an `-mtime`/`-atime`/`-ctime` argument like `+7`, `-1`, `0` (§6)
pub fn parse_time(spec: &str) -> Result<TimeFilter, String> {
	let (cmp, rest) = parse_signed(spec)?;
	let days: i64 = rest.parse().map_err(|_| format!("invalid time argument: {spec}"))?;
	Ok(TimeFilter { cmp, days })
}

/// `age_days = floor((now - file_time) / 86400)` (§6), computed from whole-second timestamps
fn age_days(now: SystemTime, file_time: SystemTime) -> i64 {
	let now_secs = now.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
	let file_secs = file_time.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
	(now_secs - file_secs).div_euclid(86400)
}

pub fn time_matches(filter: &TimeFilter, now: SystemTime, file_time: SystemTime) -> bool {
	let age = age_days(now, file_time);
	match filter.cmp {
		Cmp::Exact => age == filter.days,
		Cmp::GreaterThan => age > filter.days,
		Cmp::LessThan => age < filter.days,
	}
}

pub fn file_time_for(metadata: &Metadata, field: TimeField) -> SystemTime {
	let time = match field {
		TimeField::Mtime => metadata.modified(),
		TimeField::Atime => metadata.accessed(),
		TimeField::Ctime => metadata.created(),
	};
	time.unwrap_or(SystemTime::UNIX_EPOCH)
}

/// The `-type` letters `find` supports: `f`ile, `d`irectory, `l`ink, `b`lock, `c`har, `p`ipe,
/// `s`ocket. Symlinks are never followed (§1 Non-goals), so `metadata` must come from
/// `symlink_metadata` for `l` to ever match.
pub fn type_matches(letter: char, metadata: &Metadata) -> bool {
	let ft = metadata.file_type();
	match letter {
		'f' => ft.is_file(),
		'd' => ft.is_dir(),
		'l' => ft.is_symlink(),
		#[cfg(unix)]
		'b' => {
			use std::os::unix::fs::FileTypeExt;
			ft.is_block_device()
		}
		#[cfg(unix)]
		'c' => {
			use std::os::unix::fs::FileTypeExt;
			ft.is_char_device()
		}
		#[cfg(unix)]
		'p' => {
			use std::os::unix::fs::FileTypeExt;
			ft.is_fifo()
		}
		#[cfg(unix)]
		's' => {
			use std::os::unix::fs::FileTypeExt;
			ft.is_socket()
		}
		_ => false,
	}
}

/// `-empty`: a file of size 0, or a directory with no entries. Directory reads that fail count
/// as not-empty rather than panicking.
pub fn is_empty(path: &std::path::Path, metadata: &Metadata) -> bool {
	if metadata.is_dir() {
		fs::read_dir(path).map(|mut entries| entries.next().is_none()).unwrap_or(false)
	} else {
		metadata.len() == 0
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_parse_size_suffixes() {
		assert_eq!(parse_size("+1M").unwrap().bytes, 1024 * 1024);
		assert_eq!(parse_size("-512c").unwrap().bytes, 512);
		assert_eq!(parse_size("2k").unwrap().bytes, 2048);
		assert_eq!(parse_size("3").unwrap().bytes, 3 * 512);
	}

	#[test]
	fn test_size_filter_scenario() {
		// §8 scenario 8: +1M over {0,100,1024,10240,102400,1048577} -> 1 match
		let filter = parse_size("+1M").unwrap();
		let sizes = [0u64, 100, 1024, 10 * 1024, 100 * 1024, 1_048_577];
		let count = sizes.iter().filter(|&&s| size_matches(&filter, s)).count();
		assert_eq!(count, 1);
	}

	#[test]
	fn test_age_days_arithmetic() {
		let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10 * 86400);
		let file_time = SystemTime::UNIX_EPOCH + Duration::from_secs(3 * 86400);
		assert_eq!(age_days(now, file_time), 7);
	}

	#[test]
	fn test_time_matches_bounds() {
		let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10 * 86400);
		let file_time = SystemTime::UNIX_EPOCH + Duration::from_secs(3 * 86400);
		assert!(time_matches(&parse_time("+5").unwrap(), now, file_time));
		assert!(!time_matches(&parse_time("-5").unwrap(), now, file_time));
		assert!(time_matches(&parse_time("7").unwrap(), now, file_time));
	}

	#[test]
	fn test_type_matches_file_and_dir() {
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("a.txt");
		fs::write(&file_path, b"x").unwrap();

		let file_meta = fs::symlink_metadata(&file_path).unwrap();
		let dir_meta = fs::symlink_metadata(dir.path()).unwrap();

		assert!(type_matches('f', &file_meta));
		assert!(!type_matches('d', &file_meta));
		assert!(type_matches('d', &dir_meta));
	}

	#[test]
	fn test_is_empty() {
		let dir = tempfile::tempdir().unwrap();
		let empty_file = dir.path().join("empty.txt");
		let nonempty_file = dir.path().join("nonempty.txt");
		let empty_subdir = dir.path().join("empty_subdir");
		fs::write(&empty_file, b"").unwrap();
		fs::write(&nonempty_file, b"x").unwrap();
		fs::create_dir(&empty_subdir).unwrap();

		assert!(is_empty(&empty_file, &fs::symlink_metadata(&empty_file).unwrap()));
		assert!(!is_empty(&nonempty_file, &fs::symlink_metadata(&nonempty_file).unwrap()));
		assert!(is_empty(&empty_subdir, &fs::symlink_metadata(&empty_subdir).unwrap()));
		assert!(!is_empty(dir.path(), &fs::symlink_metadata(dir.path()).unwrap()));
	}
}
