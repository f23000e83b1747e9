mod args;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
#[allow(unused_imports)]
use log::{debug, error, warn};

use libfindgpu::batch;
use libfindgpu::filters::{self, TimeField};
use libfindgpu::glob::{MatchOptions, MAX_PATTERN_LEN};
use libfindgpu::gpu::select::{select_backend, AvailableBackends, PatternComplexity, GPU_WORTHWHILE_THRESHOLD};
use libfindgpu::gpu::{Backend, Driver};
use libfindgpu::regex::{self, compile::CompiledRegex};
use libfindgpu::walker::{self, WalkOptions};

use args::Args;

/// `-name`/`-iname`/... are traditionally single-dash, multi-character flags, which clap's long
/// options don't natively accept (`--name` is the idiomatic clap spelling). Rewrite the
/// `find`-style single-dash spelling to clap's double-dash form, and fold `-o -name|-iname` into
/// the single `--or-name`/`--or-iname` flags, before handing argv to `Args::parse_from`.
fn normalize_argv(raw: Vec<String>) -> Vec<String> {
	const LONG_FLAGS: &[&str] = &[
		"name", "iname", "path", "ipath", "regex", "iregex", "type", "maxdepth", "mindepth", "size", "mtime", "atime", "ctime", "prune", "empty", "print0", "count", "auto", "gpu", "cpu", "metal", "vulkan",
	];

	let mut out = Vec::with_capacity(raw.len());
	let mut iter = raw.into_iter().peekable();

	while let Some(token) = iter.next() {
		if token == "!" {
			out.push("--not".to_string());
			continue;
		}
		if token == "-o" {
			match iter.peek().map(String::as_str) {
				Some("-name") => {
					iter.next();
					out.push("--or-name".to_string());
					continue;
				}
				Some("-iname") => {
					iter.next();
					out.push("--or-iname".to_string());
					continue;
				}
				_ => {
					out.push(token);
					continue;
				}
			}
		}
		if let Some(name) = token.strip_prefix('-') {
			if !name.starts_with('-') && LONG_FLAGS.contains(&name) {
				out.push(format!("--{name}"));
				continue;
			}
		}
		out.push(token);
	}

	out
}

enum Predicate {
	Glob(Vec<u8>, MatchOptions),
	Regex(CompiledRegex),
}

fn check_glob_len(pattern: &str) -> Result<(), String> {
	if pattern.len() > MAX_PATTERN_LEN {
		Err(format!("glob pattern exceeds {MAX_PATTERN_LEN} bytes"))
	} else {
		Ok(())
	}
}

fn predicate_from_args(args: &Args) -> Result<Option<Predicate>, String> {
	if let Some(pattern) = &args.name {
		check_glob_len(pattern)?;
		return Ok(Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::empty())));
	}
	if let Some(pattern) = &args.iname {
		check_glob_len(pattern)?;
		return Ok(Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::CASE_INSENSITIVE)));
	}
	if let Some(pattern) = &args.path_pat {
		check_glob_len(pattern)?;
		return Ok(Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::MATCH_PATH)));
	}
	if let Some(pattern) = &args.ipath {
		check_glob_len(pattern)?;
		return Ok(Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::MATCH_PATH | MatchOptions::CASE_INSENSITIVE)));
	}
	if let Some(pattern) = &args.regex_pat {
		let re = regex::compile::parse_and_compile(pattern.as_bytes(), false).map_err(|_| "invalid regex pattern".to_string())?;
		return Ok(Some(Predicate::Regex(re)));
	}
	if let Some(pattern) = &args.iregex_pat {
		let re = regex::compile::parse_and_compile(pattern.as_bytes(), true).map_err(|_| "invalid regex pattern".to_string())?;
		return Ok(Some(Predicate::Regex(re)));
	}
	Ok(None)
}

fn or_predicate_from_args(args: &Args) -> Option<Predicate> {
	if let Some(pattern) = &args.or_name {
		return Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::empty()));
	}
	if let Some(pattern) = &args.or_iname {
		return Some(Predicate::Glob(pattern.clone().into_bytes(), MatchOptions::CASE_INSENSITIVE));
	}
	None
}

fn run_predicate(pred: &Predicate, paths: &[Vec<u8>], backend: Backend, driver: &mut Option<Box<dyn Driver>>) -> Result<Vec<bool>, libfindgpu::error::Error> {
	match pred {
		Predicate::Glob(pattern, options) => {
			let complexity = PatternComplexity::of_glob(pattern);
			debug!("glob predicate complexity score considered, backend={backend:?}, wildcards={}", complexity.num_wildcards);
			batch::match_all_glob(paths, pattern, *options, backend, driver.as_deref_mut())
		}
		Predicate::Regex(re) => batch::match_all_regex(paths, re, true, backend, driver.as_deref_mut()),
	}
}

/// Reads whitespace-separated paths from stdin, up to 1 MiB (§6)
fn read_stdin_paths() -> Result<Vec<String>, std::io::Error> {
	const MAX_STDIN_BYTES: usize = 1024 * 1024;
	let mut buf = String::new();
	std::io::stdin().lock().take(MAX_STDIN_BYTES as u64).read_to_string(&mut buf)?;
	Ok(buf.split_whitespace().map(str::to_string).collect())
}

fn init_driver(kind: Backend) -> Option<Box<dyn Driver>> {
	match kind {
		Backend::Metal => {
			#[cfg(all(feature = "metal", target_os = "macos"))]
			{
				match libfindgpu::gpu::metal::MetalDriver::new() {
					Ok(d) => return Some(Box::new(d)),
					Err(e) => warn!("Metal backend unavailable: {e}"),
				}
			}
			None
		}
		Backend::Vulkan => {
			#[cfg(feature = "gpu")]
			{
				match libfindgpu::gpu::vulkan::VulkanDriver::new() {
					Ok(d) => return Some(Box::new(d)),
					Err(e) => warn!("Vulkan backend unavailable: {e}"),
				}
			}
			None
		}
		Backend::Scalar | Backend::Simd => None,
	}
}

fn main() -> ExitCode {
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.format(|f, record| {
			let level_style = f.default_level_style(record.level());
			writeln!(f, "[{} {}/{}{}{}]: {}", f.timestamp(), record.target(), level_style.render(), record.level(), level_style.render_reset(), record.args())
		})
		.init();

	let args = Args::parse_from(normalize_argv(std::env::args().collect()));
	log::set_max_level(args.verbose.log_level_filter());

	let mut had_error = false;

	let predicate = match predicate_from_args(&args) {
		Ok(p) => p,
		Err(msg) => {
			error!("{msg}");
			return ExitCode::FAILURE;
		}
	};
	let or_predicate = or_predicate_from_args(&args);

	let size_filter = match args.size.as_deref().map(filters::parse_size).transpose() {
		Ok(f) => f,
		Err(msg) => {
			error!("{msg}");
			return ExitCode::FAILURE;
		}
	};
	let mtime_filter = match args.mtime.as_deref().map(filters::parse_time).transpose() {
		Ok(f) => f,
		Err(msg) => {
			error!("{msg}");
			return ExitCode::FAILURE;
		}
	};
	let atime_filter = match args.atime.as_deref().map(filters::parse_time).transpose() {
		Ok(f) => f,
		Err(msg) => {
			error!("{msg}");
			return ExitCode::FAILURE;
		}
	};
	let ctime_filter = match args.ctime.as_deref().map(filters::parse_time).transpose() {
		Ok(f) => f,
		Err(msg) => {
			error!("{msg}");
			return ExitCode::FAILURE;
		}
	};

	let mut path_strings = args.paths.clone();
	if path_strings.is_empty() {
		path_strings.push(".".to_string());
	}
	if path_strings.iter().any(|p| p == "-") {
		path_strings = match read_stdin_paths() {
			Ok(paths) => paths,
			Err(e) => {
				error!("failed to read paths from stdin: {e}");
				return ExitCode::FAILURE;
			}
		};
	}
	const MAX_PATH_LEN: usize = 4096;
	if let Some(bad) = path_strings.iter().find(|p| p.len() > MAX_PATH_LEN) {
		error!("path exceeds {MAX_PATH_LEN} bytes: {bad}");
		return ExitCode::FAILURE;
	}
	let roots: Vec<PathBuf> = path_strings.iter().map(PathBuf::from).collect();

	let walk_options = WalkOptions { max_depth: args.maxdepth, min_depth: args.mindepth.unwrap_or(0), prune: args.prune.clone().map(String::into_bytes) };
	let walk_result = walker::walk(&roots, &walk_options);
	had_error |= walk_result.had_error;

	let num_paths = walk_result.paths.len();
	let mut available = AvailableBackends::default();
	let mut metal_driver = None;
	let mut vulkan_driver = None;

	let forced = if args.metal {
		Some(Backend::Metal)
	} else if args.vulkan {
		Some(Backend::Vulkan)
	} else if args.gpu {
		Some(if cfg!(target_os = "macos") { Backend::Metal } else { Backend::Vulkan })
	} else if args.cpu {
		Some(Backend::Scalar)
	} else {
		None
	};

	let complexity = match &predicate {
		Some(Predicate::Glob(pattern, _)) => PatternComplexity::of_glob(pattern),
		_ => PatternComplexity::default(),
	};

	if num_paths >= GPU_WORTHWHILE_THRESHOLD || forced == Some(Backend::Metal) || forced == Some(Backend::Vulkan) {
		metal_driver = init_driver(Backend::Metal);
		vulkan_driver = init_driver(Backend::Vulkan);
		available.metal = metal_driver.as_deref().map(Driver::caps);
		available.vulkan = vulkan_driver.as_deref().map(Driver::caps);
	}

	let backend = select_backend(num_paths, complexity, available, forced);
	debug!("selected backend: {backend:?}");

	let mut driver: Option<Box<dyn Driver>> = match backend {
		Backend::Metal => metal_driver.take(),
		Backend::Vulkan => vulkan_driver.take(),
		_ => None,
	};

	let mut combined = match &predicate {
		Some(pred) => {
			let result = run_predicate(pred, &walk_result.paths, backend, &mut driver);
			match result {
				Ok(r) => r,
				Err(e) => {
					error!("{e}");
					return ExitCode::FAILURE;
				}
			}
		}
		None => vec![true; num_paths],
	};

	if let Some(pred) = &or_predicate {
		let result = run_predicate(pred, &walk_result.paths, backend, &mut driver);
		match result {
			Ok(or_matches) => {
				for (c, o) in combined.iter_mut().zip(or_matches) {
					*c = *c || o;
				}
			}
			Err(e) => {
				error!("{e}");
				return ExitCode::FAILURE;
			}
		}
	}

	if args.not {
		for m in combined.iter_mut() {
			*m = !*m;
		}
	}

	let now = std::time::SystemTime::now();
	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	let mut count = 0u64;

	for (idx, path) in walk_result.paths.iter().enumerate() {
		if !combined[idx] {
			continue;
		}

		let path_str = String::from_utf8_lossy(path);
		let metadata = match std::fs::symlink_metadata(path_str.as_ref()) {
			Ok(m) => m,
			Err(_) => {
				had_error = true;
				continue;
			}
		};

		if let Some(letter) = args.type_filter {
			if !filters::type_matches(letter, &metadata) {
				continue;
			}
		}
		if let Some(filter) = &size_filter {
			if !filters::size_matches(filter, metadata.len()) {
				continue;
			}
		}
		if let Some(filter) = &mtime_filter {
			if !filters::time_matches(filter, now, filters::file_time_for(&metadata, TimeField::Mtime)) {
				continue;
			}
		}
		if let Some(filter) = &atime_filter {
			if !filters::time_matches(filter, now, filters::file_time_for(&metadata, TimeField::Atime)) {
				continue;
			}
		}
		if let Some(filter) = &ctime_filter {
			if !filters::time_matches(filter, now, filters::file_time_for(&metadata, TimeField::Ctime)) {
				continue;
			}
		}
		if args.empty && !filters::is_empty(std::path::Path::new(path_str.as_ref()), &metadata) {
			continue;
		}

		if args.count {
			count += 1;
			continue;
		}

		if out.write_all(path).is_err() || out.write_all(if args.print0 { b"\0" } else { b"\n" }).is_err() {
			had_error = true;
			break;
		}
	}

	if args.count {
		let _ = writeln!(out, "{count}");
	}

	if had_error {
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}
