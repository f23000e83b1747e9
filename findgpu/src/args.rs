use clap::Parser;
use clap_verbosity_flag::InfoLevel;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
	#[command(flatten)]
	pub verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

	/// Force scalar/SIMD CPU matching or a specific GPU backend instead of auto-selecting
	#[arg(long, group = "backend")]
	pub auto: bool,
	#[arg(long, group = "backend")]
	pub gpu: bool,
	#[arg(long, group = "backend")]
	pub cpu: bool,
	#[arg(long, group = "backend")]
	pub metal: bool,
	#[arg(long, group = "backend")]
	pub vulkan: bool,

	/// Root paths to search. Defaults to "." if none given; "-" reads whitespace-separated paths
	/// from stdin (max 1 MiB)
	pub paths: Vec<String>,

	/// Match the basename against a glob pattern
	#[arg(long, group = "predicate")]
	pub name: Option<String>,
	/// Like `--name`, case-insensitive
	#[arg(long, group = "predicate")]
	pub iname: Option<String>,
	/// Match the whole path against a glob pattern
	#[arg(long = "path", group = "predicate")]
	pub path_pat: Option<String>,
	/// Like `--path`, case-insensitive
	#[arg(long, group = "predicate")]
	pub ipath: Option<String>,
	/// Match the whole path against a regular expression (always anchored at both ends)
	#[arg(long = "regex", group = "predicate")]
	pub regex_pat: Option<String>,
	/// Like `--regex`, case-insensitive
	#[arg(long = "iregex", group = "predicate")]
	pub iregex_pat: Option<String>,

	/// `-o -name PATTERN`: an alternate basename predicate, OR'd with the primary one
	#[arg(long = "or-name", group = "or_predicate")]
	pub or_name: Option<String>,
	/// `-o -iname PATTERN`: an alternate case-insensitive basename predicate
	#[arg(long = "or-iname", group = "or_predicate")]
	pub or_iname: Option<String>,

	/// Restrict to one entry type: f, d, l, b, c, p, s
	#[arg(long = "type")]
	pub type_filter: Option<char>,

	#[arg(long)]
	pub maxdepth: Option<usize>,
	#[arg(long)]
	pub mindepth: Option<usize>,

	/// `[+-]N[cwbkKMG]`, e.g. `+1M`
	#[arg(long)]
	pub size: Option<String>,
	#[arg(long)]
	pub mtime: Option<String>,
	#[arg(long)]
	pub atime: Option<String>,
	#[arg(long)]
	pub ctime: Option<String>,

	/// Glob pattern matched against a directory's path to prune descent into it
	#[arg(long)]
	pub prune: Option<String>,

	#[arg(long)]
	pub empty: bool,

	/// Negate the name/path/regex predicate
	#[arg(long, short = 'n')]
	pub not: bool,

	#[arg(long)]
	pub print0: bool,

	/// Print a single count instead of per-path output
	#[arg(long)]
	pub count: bool,
}
