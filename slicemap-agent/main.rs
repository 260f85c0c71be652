use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use slicemap::{launch, MappingConfig, Result, RetryPolicy, SliceMapError, TallyScope};

#[derive(Parser, Debug)]
#[command(name = "slicemap")]
#[command(about = "Map the cache lines of 2MiB pages to L3 slices (CHAs) on Intel Xeon")]
struct Args {
    #[arg(long, default_value_t = 2048, help = "Number of 2MiB huge pages to allocate")]
    pages: usize,

    #[arg(
        long,
        default_value_t = 16,
        help = "Stop after this many pages have been newly mapped"
    )]
    pages_to_map: usize,

    #[arg(
        long,
        default_value_t = 797,
        help = "Page visitation stride, must be coprime with --pages"
    )]
    stride: usize,

    #[arg(
        long,
        default_value = ".",
        help = "Directory holding PADDR_0x*.map files"
    )]
    cache_dir: PathBuf,

    #[arg(long, default_value_t = 1000, help = "Load/flush repetitions per probe")]
    flushes: u32,

    #[arg(long, help = "Logical CPU running the probes (default: first CPU of socket 0)")]
    core: Option<u32>,

    #[arg(long, default_value_t = 0, help = "CHA counter index used for probing (0-3)")]
    counter: usize,

    #[arg(
        long,
        help = "CHAs per socket, for SKUs with fewer tiles than the generation maximum"
    )]
    tiles: Option<usize>,

    #[arg(
        long,
        help = "Tally the first N pages by index instead of the newly mapped pages"
    )]
    validate_prefix: Option<usize>,

    #[arg(
        long,
        default_value_t = 0,
        requires = "validate_prefix",
        help = "Also tally this many leading lines of the page after the prefix"
    )]
    validate_partial_lines: usize,

    #[arg(long, default_value_t = 1, help = "Seconds to sleep at each probe backoff")]
    backoff_secs: u64,

    #[arg(long, help = "Write Prometheus text-format run metrics to this file")]
    metrics_file: Option<PathBuf>,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (probe rejections, progress, MSR writes)"
    )]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> MappingConfig {
        let tally_scope = match self.validate_prefix {
            Some(pages) => TallyScope::Prefix {
                pages,
                trailing_lines: self.validate_partial_lines,
            },
            None => TallyScope::NewlyMapped,
        };

        MappingConfig {
            num_pages: self.pages,
            pages_to_map: self.pages_to_map,
            page_stride: self.stride,
            cache_dir: self.cache_dir,
            repetitions: self.flushes,
            probe_counter: self.counter,
            tile_count: self.tiles,
            core: self.core,
            tally_scope,
            retry: RetryPolicy {
                backoff: Duration::from_secs(self.backoff_secs),
                ..Default::default()
            },
            metrics_file: self.metrics_file,
        }
    }
}

fn check_permissions() -> Result<()> {
    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        return Err(SliceMapError::MsrError(format!(
            "Cannot access {msr_path}; the MSR kernel module may not be loaded (run: sudo modprobe msr)"
        )));
    }

    if let Err(e) = std::fs::File::open(msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            return Err(SliceMapError::MsrError(format!(
                "Permission denied accessing {msr_path}; run as root"
            )));
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = args.into_config();
    config.validate()?;

    // Check for root/capabilities early
    check_permissions()?;

    let summary = launch(config)?;
    tracing::info!(
        "Done: {} pages mapped, {} pages loaded, {} probe attempts",
        summary.pages_mapped,
        summary.pages_cached,
        summary.stats.attempts
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Setup logging based on verbose flag
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
