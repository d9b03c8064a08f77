// Command-line interface for oxipatch.
//
// Two subcommands: `patch` applies a diff file, `info` prints what a
// diff's header says about it.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::io::{self, DiffInfo, FileInput};

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// HDiffPatch-format binary patch applier.
#[derive(Parser, Debug)]
#[command(
    name = "oxipatch",
    version,
    about = "Apply HDiffPatch-format binary diffs",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a diff to an old file, producing the new file.
    Patch(PatchArgs),
    /// Print header information about a diff file.
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// Old (base) file.
    #[arg(value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// Diff file (HDIFF13 or HDIFFSF20).
    #[arg(value_hint = ValueHint::FilePath)]
    diff: PathBuf,

    /// Output (new) file.
    #[arg(value_hint = ValueHint::FilePath)]
    new: PathBuf,

    /// Working memory budget (supports K/M/G suffix). Surplus memory is
    /// spent caching old-file data.
    #[arg(long, value_parser = parse_byte_size)]
    budget: Option<u64>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Diff file to inspect.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

// ---------------------------------------------------------------------------
// Patch command
// ---------------------------------------------------------------------------

fn cmd_patch(cli: &Cli, args: &PatchArgs) -> i32 {
    if args.new.exists() && !cli.force {
        eprintln!(
            "oxipatch: output file exists, use -f to overwrite: {}",
            args.new.display()
        );
        return 1;
    }

    let stats = match io::apply_file(&args.old, &args.diff, &args.new, args.budget, None) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxipatch: patch error: {e}");
            return 1;
        }
    };

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "oxipatch: old size: {}, diff size: {}, new size: {}",
            stats.old_size, stats.diff_size, stats.new_size
        );
    }
    if cli.json_output {
        let json = serde_json::json!({
            "command": "patch",
            "old_size": stats.old_size,
            "diff_size": stats.diff_size,
            "new_size": stats.new_size,
            "new_sha256": stats.new_sha256.map(hex),
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }

    0
}

fn hex(digest: [u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Info command
// ---------------------------------------------------------------------------

fn cmd_info(cli: &Cli, args: &InfoArgs) -> i32 {
    let diff = match FileInput::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("oxipatch: {}: {e}", args.input.display());
            return 1;
        }
    };
    let info = match io::read_diff_info(&diff) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("oxipatch: {}: {e}", args.input.display());
            return 1;
        }
    };

    if cli.json_output {
        let json = serde_json::json!({
            "command": "info",
            "format": info.format_name(),
            "new_data_size": info.new_data_size(),
            "old_data_size": info.old_data_size(),
            "compress_type": info.compress_type(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
        return 0;
    }

    println!("format:        {}", info.format_name());
    println!("old data size: {}", info.old_data_size());
    println!("new data size: {}", info.new_data_size());
    match &info {
        DiffInfo::Compressed(i) => {
            println!("compressor:    {}", display_type(&i.compress_type));
            println!("compressed segments: {}", i.compressed_count);
        }
        DiffInfo::Single(i) => {
            println!("compressor:    {}", display_type(&i.compress_type));
            println!("cover count:   {}", i.cover_count);
            println!("step memory:   {}", i.step_mem_size);
        }
    }

    0
}

fn display_type(compress_type: &str) -> &str {
    if compress_type.is_empty() {
        "(none)"
    } else {
        compress_type
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Cmd::Patch(args) => cmd_patch(&cli, args),
        Cmd::Info(args) => cmd_info(&cli, args),
    };
    process::exit(exit_code);
}
