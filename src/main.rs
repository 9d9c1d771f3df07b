use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use voxstream::pump::convert_many;
use voxstream::{
    AxisOrder, Block, BlockSource, Boundary, FormatHint, SchematicFormat, WriteOptions,
    DEFAULT_BUFFER_SIZE,
};

#[derive(Parser)]
#[command(name = "voxstream", about = "Streaming voxel schematic converter")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more schematics to another format
    Convert {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Target format: vxl, sponge_v1, sponge_v2, sponge_v3, litematic, structure, mcedit
        #[arg(short, long)]
        to: String,
        /// Source format, or "auto"
        #[arg(short, long, default_value = "auto")]
        from: String,
        /// Output file (single input only)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Directory for outputs; defaults to each input's directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Blocks per pump batch
        #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer: usize,
        /// Gzip level for NBT formats (0-9)
        #[arg(short, long, default_value = "6")]
        level: u32,
        /// VXL body order: xyz, xzy, yxz, yzx, zxy, zyx
        #[arg(long, default_value = "yzx")]
        axis_order: String,
        #[arg(long, default_value_t = voxstream::format::DEFAULT_DATA_VERSION)]
        data_version: i32,
    },
    /// Show format, boundary and block counts
    Info {
        input: PathBuf,
        #[arg(short, long, default_value = "auto")]
        from: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List supported formats and their capabilities
    Formats,
}

#[derive(Serialize)]
struct InfoReport {
    path:            PathBuf,
    format:          SchematicFormat,
    boundary:        Boundary,
    volume:          u64,
    blocks:          u64,
    distinct_states: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, to, from, output, out_dir, buffer, level, axis_order, data_version } => {
            let target = FormatHint::from_name(&to)?.encode_target()?;
            let hint = FormatHint::from_name(&from)?;
            let options = WriteOptions {
                compression:  flate2::Compression::new(level.min(9)),
                data_version,
                axis_order:   axis_order.parse::<AxisOrder>()?,
                ..WriteOptions::default()
            };
            if output.is_some() && input.len() > 1 {
                return Err("--output takes a single input; use --out-dir for several".into());
            }
            let jobs: Vec<(PathBuf, PathBuf)> = input
                .iter()
                .map(|path| {
                    let dest = match &output {
                        Some(o) => o.clone(),
                        None    => output_path(path, out_dir.as_deref(), target),
                    };
                    (path.clone(), dest)
                })
                .collect();

            let mut failed = 0;
            for ((src, dest), result) in jobs.iter().zip(convert_many(&jobs, hint, target, &options, buffer)) {
                match result {
                    Ok(stats) => println!(
                        "  {} → {}  ({} blocks, {} batches)",
                        src.display(), dest.display(), stats.blocks, stats.batches
                    ),
                    Err(e) => {
                        eprintln!("  {}: {e}", src.display());
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} of {} conversions failed", jobs.len()).into());
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, from, json } => {
            let source = BlockSource::open_path(&input, FormatHint::from_name(&from)?)?;
            let mut buffer = vec![Block::default(); DEFAULT_BUFFER_SIZE];
            let mut blocks = 0u64;
            let mut states = HashSet::new();
            while let Some(n) = source.read(&mut buffer, 0, DEFAULT_BUFFER_SIZE)? {
                blocks += n as u64;
                states.extend(buffer[..n].iter().map(|b| b.state.clone()));
            }
            let boundary = source.boundary();
            let report = InfoReport {
                path: input,
                format: source.format(),
                boundary,
                volume: boundary.volume(),
                blocks,
                distinct_states: states.len(),
            };
            source.close();

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("── Schematic ────────────────────────────────────────────");
                println!("  Path            {}", report.path.display());
                println!("  Format          {}", report.format);
                println!("  Boundary        {}", report.boundary);
                println!("  Volume          {}", report.volume);
                println!("  Blocks          {}", report.blocks);
                println!("  Distinct states {}", report.distinct_states);
            }
        }

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats => {
            println!("{:<12} {:<10} {:>16} {:>14}", "Name", "Extension", "Needs boundary", "Auto-detect");
            for f in SchematicFormat::ALL {
                println!(
                    "{:<12} {:<10} {:>16} {:>14}",
                    f.name(), f.extension(), f.writer_requires_boundary(), f.auto_detectable()
                );
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn output_path(input: &Path, out_dir: Option<&Path>, target: SchematicFormat) -> PathBuf {
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = input.file_stem().map(|s| s.to_os_string()).unwrap_or_else(|| "out".into());
    let mut dest = dir.join(stem);
    dest.set_extension(target.extension());
    // Same extension as the input (e.g. sponge_v2 → sponge_v3) must not overwrite it.
    if dest == input {
        let mut name = dest.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
        name.push(format!("_{}", target.name()));
        dest.set_file_name(name);
        dest.set_extension(target.extension());
    }
    dest
}
