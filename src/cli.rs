// Command-line front end for trackmend.
//
// Subcommands map onto the recovery modes of the recorder tooling:
//   extract  healthy-filesystem extraction of one channel (mode 0)
//   map      sector mapping against reference tracks (modes 1 and 2)
//   recover  unsaved-session extraction with a synthetic WAV header (mode 3)

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use log::debug;

use crate::block::DEFAULT_BLOCK_SIZE;
use crate::extract::{DEFAULT_REPETITION, DEFAULT_TRACKS, ExtractOptions, Layout};
use crate::io::{self, RecoverError};
use crate::mapping::{MapOptions, Policy};
use crate::track::{DEFAULT_REFERENCE_PATTERN, reference_paths};
use crate::wav::WavFormat;

// ---------------------------------------------------------------------------
// Constants (matching the recorder defaults)
// ---------------------------------------------------------------------------

const DEFAULT_OUTPUT: &str = "out.wav";

/// Exit code when an existing output would be overwritten without `--force`.
const EXIT_OUTPUT_EXISTS: i32 = 2;

// ---------------------------------------------------------------------------
// Number parsing
// ---------------------------------------------------------------------------

/// Parse a decimal size with an optional K, M or G binary suffix.
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

/// Parse an image offset: `0x` hex, leading-zero octal, or a decimal size.
fn parse_offset(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|e| format!("invalid offset '{s}': {e}"));
    }
    if s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit()) {
        return u64::from_str_radix(&s[1..], 8).map_err(|e| format!("invalid offset '{s}': {e}"));
    }
    parse_byte_size(s)
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    let n = parse_offset(s)?;
    if n == 0 {
        return Err("block size must be non-zero".into());
    }
    usize::try_from(n).map_err(|_| format!("block size too large: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Multitrack recorder image recovery.
#[derive(Parser, Debug)]
#[command(
    name = "trackmend",
    version,
    about = "Recover interleaved audio tracks from multitrack recorder disk images",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
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
    /// Extract one channel from a healthy image (header row + data).
    Extract(ExtractArgs),
    /// Map image blocks onto reference tracks to study the write order.
    Map(MapArgs),
    /// Recover one channel of an unsaved session with a synthetic WAV header.
    Recover(RecoverArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    /// Tracks advance as soon as they match (mode 1).
    Sequential,
    /// One match per track per interleave round (mode 2).
    RoundRobin,
}

#[derive(Args, Debug)]
struct ImageArgs {
    /// Image file to recover from.
    #[arg(long, short = 'i', value_hint = ValueHint::FilePath)]
    image: PathBuf,

    /// Byte offset of the first block in the image (decimal, 0x hex, 0 octal).
    #[arg(long, short = 'o', value_parser = parse_offset, default_value_t = 0)]
    offset: u64,

    /// Number of tracks recorded.
    #[arg(long, short = 't', value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_TRACKS as u32)]
    tracks: u32,

    /// Channel block size (supports 0x prefix and K/M/G suffix).
    #[arg(long = "block-size", short = 'b', value_parser = parse_block_size, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
}

#[derive(Args, Debug)]
struct ChannelArgs {
    /// Channel to extract (1-based).
    #[arg(long, short = 's', value_parser = clap::value_parser!(u32).range(1..), default_value_t = 1)]
    selected: u32,

    /// Consecutive blocks per channel in one interleave group.
    #[arg(long = "repetition", short = 'r', value_parser = clap::value_parser!(u64).range(1..), default_value_t = DEFAULT_REPETITION)]
    repetition: u64,

    /// Interleave groups to extract (default: until the image ends).
    #[arg(long, short = 'c')]
    count: Option<u64>,

    /// Output file.
    #[arg(long, value_hint = ValueHint::FilePath, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    image: ImageArgs,

    #[command(flatten)]
    channel: ChannelArgs,
}

#[derive(Args, Debug)]
struct RecoverArgs {
    #[command(flatten)]
    image: ImageArgs,

    #[command(flatten)]
    channel: ChannelArgs,

    /// Sample rate written into the WAV header.
    #[arg(long = "sample-rate", value_parser = clap::value_parser!(u32).range(1..=768_000), default_value_t = 48_000)]
    sample_rate: u32,

    /// Bits per sample written into the WAV header.
    #[arg(long = "bits", value_parser = clap::value_parser!(u16).range(8..=32), default_value_t = 24)]
    bits_per_sample: u16,

    /// Patch the WAV header sizes after recovery instead of keeping the
    /// placeholder values.
    #[arg(long = "patch-sizes")]
    patch_sizes: bool,
}

#[derive(Args, Debug)]
struct MapArgs {
    #[command(flatten)]
    image: ImageArgs,

    /// Directory holding the reference tracks.
    #[arg(long, short = 'd', value_hint = ValueHint::DirPath)]
    dest: PathBuf,

    /// Reference file name pattern; `{n}` is the 1-based track number.
    #[arg(long, default_value = DEFAULT_REFERENCE_PATTERN)]
    pattern: String,

    /// Matching policy.
    #[arg(long, short = 'p', value_enum, default_value_t = PolicyArg::RoundRobin)]
    policy: PolicyArg,

    /// Image blocks to map (default: until the image ends).
    #[arg(long, short = 'c')]
    count: Option<u64>,

    /// Write one `index,offset,track` line per image block to this file.
    #[arg(long = "map-out", value_hint = ValueHint::FilePath)]
    map_out: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Job {
    Extract {
        image: PathBuf,
        offset: u64,
        output: PathBuf,
        opts: ExtractOptions,
    },
    Map {
        image: PathBuf,
        offset: u64,
        references: Vec<PathBuf>,
        map_out: Option<PathBuf>,
        opts: MapOptions,
    },
    Config,
}

#[derive(Debug)]
struct Options {
    job: Job,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
}

fn policy(arg: PolicyArg) -> Policy {
    match arg {
        PolicyArg::Sequential => Policy::Sequential,
        PolicyArg::RoundRobin => Policy::RoundRobin,
    }
}

fn extract_job(image: ImageArgs, channel: ChannelArgs, layout: Layout) -> Job {
    Job::Extract {
        image: image.image,
        offset: image.offset,
        output: channel.output,
        opts: ExtractOptions {
            block_size: image.block_size,
            num_tracks: image.tracks as usize,
            selected: channel.selected as usize,
            repetition: channel.repetition,
            count: channel.count,
            layout,
            ..Default::default()
        },
    }
}

fn resolve_options(cli: Cli) -> Options {
    let job = match cli.command {
        Cmd::Extract(args) => extract_job(args.image, args.channel, Layout::Healthy),
        Cmd::Recover(args) => {
            let mut job = extract_job(args.image, args.channel, Layout::Session);
            if let Job::Extract { opts, .. } = &mut job {
                opts.format = WavFormat {
                    channels: 1,
                    sample_rate: args.sample_rate,
                    bits_per_sample: args.bits_per_sample,
                };
                opts.patch_sizes = args.patch_sizes;
            }
            job
        }
        Cmd::Map(args) => Job::Map {
            references: reference_paths(&args.dest, &args.pattern, args.image.tracks as usize),
            image: args.image.image,
            offset: args.image.offset,
            map_out: args.map_out,
            opts: MapOptions {
                block_size: args.image.block_size,
                count: args.count,
                policy: policy(args.policy),
            },
        },
        Cmd::Config => Job::Config,
    };

    Options {
        job,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(3),
        json_output: cli.json_output,
    }
}

/// Default log filter for the requested verbosity; `RUST_LOG` still wins.
fn log_filter(opts: &Options) -> &'static str {
    if opts.quiet {
        return "error";
    }
    match opts.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("trackmend version {version}");

    let file_io = cfg!(feature = "file-io") as u8;
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_TRACKS={DEFAULT_TRACKS}");
    eprintln!("DEFAULT_BLOCK_SIZE={DEFAULT_BLOCK_SIZE:#x}");
    eprintln!("DEFAULT_REPETITION={DEFAULT_REPETITION}");
    eprintln!("DEFAULT_OUTPUT={DEFAULT_OUTPUT}");
    eprintln!("DEFAULT_REFERENCE_PATTERN={DEFAULT_REFERENCE_PATTERN}");
    eprintln!("WAV_PLACEHOLDER_DATA_SIZE={:#x}", crate::wav::PLACEHOLDER_DATA_SIZE);

    0
}

// ---------------------------------------------------------------------------
// Extract / recover commands
// ---------------------------------------------------------------------------

fn refuse_overwrite(path: &std::path::Path, force: bool) -> bool {
    if path.exists() && !force {
        eprintln!(
            "trackmend: output file exists, use -f to overwrite: {}",
            path.display()
        );
        return true;
    }
    false
}

fn report_error(e: &RecoverError) -> i32 {
    eprintln!("trackmend: {e}");
    e.exit_code()
}

fn cmd_extract(
    opts: &Options,
    image: &std::path::Path,
    offset: u64,
    output: &std::path::Path,
    extract_opts: &ExtractOptions,
) -> i32 {
    if refuse_overwrite(output, opts.force) {
        return EXIT_OUTPUT_EXISTS;
    }

    let stats = match io::extract_file(image, offset, output, extract_opts) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "trackmend: channel {}: {} groups, {} blocks, output size: {}",
            extract_opts.selected,
            stats.extract.groups,
            stats.extract.blocks_copied,
            stats.output_size
        );
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": match extract_opts.layout {
                Layout::Healthy => "extract",
                Layout::Session => "recover",
            },
            "selected": extract_opts.selected,
            "groups": stats.extract.groups,
            "blocks": stats.extract.blocks_copied,
            "output_size": stats.output_size,
            "sizes_patched": stats.sizes_patched,
            "output_sha256": stats.output_sha256.map(hex::encode),
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Map command
// ---------------------------------------------------------------------------

fn cmd_map(
    opts: &Options,
    image: &std::path::Path,
    offset: u64,
    references: &[PathBuf],
    map_out: Option<&std::path::Path>,
    map_opts: &MapOptions,
) -> i32 {
    if let Some(path) = map_out {
        if refuse_overwrite(path, opts.force) {
            return EXIT_OUTPUT_EXISTS;
        }
    }

    let stats = match io::map_file(image, offset, references, map_out, map_opts) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "trackmend: mapped {} blocks ({} assigned, {} unassigned), {} rounds",
            stats.blocks_read,
            stats.assigned(),
            stats.unassigned,
            stats.rounds
        );
        for (i, n) in stats.per_track.iter().enumerate() {
            eprintln!("trackmend:   track {}: {n} blocks", i + 1);
        }
    }

    if opts.json_output {
        let json = serde_json::json!({
            "command": "map",
            "policy": stats.policy.to_string(),
            "blocks_read": stats.blocks_read,
            "assigned": stats.assigned(),
            "unassigned": stats.unassigned,
            "rounds": stats.rounds,
            "per_track": stats.per_track,
        });
        eprintln!("{json:#}");
    }

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&opts)))
        .format_timestamp(None)
        .format_target(false)
        .init();
    debug!("resolved options: {opts:?}");

    let exit_code = match &opts.job {
        Job::Config => cmd_config(),
        Job::Extract {
            image,
            offset,
            output,
            opts: extract_opts,
        } => cmd_extract(&opts, image, *offset, output, extract_opts),
        Job::Map {
            image,
            offset,
            references,
            map_out,
            opts: map_opts,
        } => cmd_map(&opts, image, *offset, references, map_out.as_deref(), map_opts),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
