mod extract;
mod fits;
mod info;
mod time;
mod tm2prw;

use std::fs::File;
use std::io::{stderr, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cheops::ids::{PassId, VisitId};
use cheops::joborder::JobOrder;
use cheops::logging::{log, Severity};
use cheops::telemetry::{read_nctrs, Frame, FrameLayout, Vcid, VC_HK};
use cheops::time::TimeContext;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LEAP_SECONDS: &str = "SOC_APP_LeapSeconds";
const OBT_RESETS: &str = "REF_APP_ObtReset";
const CORRELATION: &str = "AUX_RES_ObtUtcCorrelation";

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Job order file providing log levels, reference files and output
    /// directories. Values given on the command line take precedence.
    #[arg(long, global = true, value_name = "xml")]
    joborder: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Time reference tables, see [TimeContext::load].
#[derive(Args, Debug, Clone, Default)]
struct TimeRefs {
    /// Leap second tables. Built-in leap seconds are used if not given.
    #[arg(long, value_name = "path")]
    leapsecs: Vec<PathBuf>,

    /// OBT reset table.
    #[arg(long, value_name = "path")]
    resets: Option<PathBuf>,

    /// OBT-UTC correlation tables.
    #[arg(long, value_name = "path")]
    correlation: Vec<PathBuf>,
}

impl TimeRefs {
    /// Fill unset tables from the job order inputs.
    fn with_job_order(mut self, jo: Option<&JobOrder>) -> Self {
        let Some(jo) = jo else {
            return self;
        };
        let inputs = |file_type: &str| -> Vec<PathBuf> {
            jo.input_files(file_type)
                .map(|files| files.iter().map(PathBuf::from).collect())
                .unwrap_or_default()
        };
        if self.leapsecs.is_empty() {
            self.leapsecs = inputs(LEAP_SECONDS);
        }
        if self.resets.is_none() {
            self.resets = inputs(OBT_RESETS).into_iter().next();
        }
        if self.correlation.is_empty() {
            self.correlation = inputs(CORRELATION);
        }
        self
    }

    fn load(&self) -> Result<TimeContext> {
        TimeContext::load(&self.leapsecs, self.resets.clone(), &self.correlation)
            .context("loading time reference tables")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a file of NCTRS data units.
    ///
    /// Reports frames per virtual channel, packet extraction counters, and
    /// packets per APID.
    Info {
        /// Input NCTRS file
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
    /// Extract the source packets of a virtual channel.
    ///
    /// Packets are written back to back.
    Extract {
        /// Virtual channel to extract
        #[arg(long, default_value_t = VC_HK)]
        vc: Vcid,

        /// Skip packets failing validation
        #[arg(long, action)]
        valid_only: bool,

        /// Delete output file if it already exists
        #[arg(long, action)]
        clobber: bool,

        /// Output file path.
        #[arg(short, long, default_value = "packets.dat", value_name = "path")]
        output: PathBuf,

        /// Input NCTRS file
        input: PathBuf,
    },
    /// Convert housekeeping packets into PRW FITS tables.
    Tm2prw {
        /// JSON HK table definitions
        #[arg(short, long, value_name = "json")]
        defs: PathBuf,

        /// Output directory, the job order OUT directory by default.
        #[arg(short, long, value_name = "dir")]
        output: Option<PathBuf>,

        #[command(flatten)]
        refs: TimeRefs,

        /// Visit, as `PRttpppp_TGrrrrcc`.
        #[arg(long)]
        visit: Option<VisitId>,

        /// Pass, as `PSyymmddhh`.
        #[arg(long)]
        pass: Option<PassId>,

        /// Output format of the summary
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Input NCTRS file
        input: PathBuf,
    },
    /// Convert a time between OBT, UTC and MJD.
    Time {
        /// Time value
        value: String,

        /// Type of the time value
        #[arg(long, default_value = "utc")]
        from: time::TimeKind,

        #[command(flatten)]
        refs: TimeRefs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
    /// List the headers of a FITS file and verify its checksums.
    Fits {
        /// Input FITS file, optionally with an `[EXTNAME]` suffix
        input: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
}

impl Commands {
    fn task(&self) -> &'static str {
        match self {
            Commands::Info { .. } => "info",
            Commands::Extract { .. } => "extract",
            Commands::Tm2prw { .. } => "tm2prw",
            Commands::Time { .. } => "time",
            Commands::Fits { .. } => "fits",
        }
    }
}

/// Decode the frames of an NCTRS file, dropping frames failing validation.
pub fn read_frames(path: &Path) -> Result<Vec<Frame>> {
    let reader = BufReader::new(File::open(path).context("opening input")?);
    let mut frames = Vec::new();
    for unit in read_nctrs(reader) {
        let unit = unit.with_context(|| format!("reading {}", path.display()))?;
        let frame = match unit.frame(FrameLayout::CHEOPS) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(vcid = unit.header.vcid, "dropping data unit: {err}");
                continue;
            }
        };
        if let Err(err) = frame.validate() {
            warn!(vcid = frame.header.vcid, "dropping frame: {err}");
            continue;
        }
        frames.push(frame);
    }
    debug!("read {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

fn env_filter(jo: Option<&JobOrder>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env("CHEOPS_LOG") {
        return filter;
    }
    let level = jo
        .and_then(|jo| jo.stderr_log_level().ok())
        .map_or_else(|| "info".to_string(), |s| s.level_filter().to_string());
    EnvFilter::new(level)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let jo = cli
        .joborder
        .as_ref()
        .map(|path| JobOrder::read(path, cli.command.task()))
        .transpose()
        .context("reading job order")?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(env_filter(jo.as_ref()))
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if let Some(jo) = &jo {
        log(
            Severity::Info,
            &format!(
                "job order for processor {} version {} at {}",
                jo.processor_name(),
                jo.version(),
                jo.processing_station()
            ),
        );
    }

    match cli.command {
        Commands::Info { input, format } => info::info(&input, &format),
        Commands::Extract {
            vc,
            valid_only,
            clobber,
            output,
            input,
        } => {
            if !clobber && output.exists() {
                anyhow::bail!("{output:?} exists; use --clobber");
            }
            extract::extract(&input, &output, vc, valid_only)
        }
        Commands::Tm2prw {
            defs,
            output,
            refs,
            visit,
            pass,
            format,
            input,
        } => {
            let output = output
                .or_else(|| jo.as_ref().and_then(|jo| jo.out_dir().map(Path::to_path_buf)))
                .context("no output directory, use --output or a job order")?;
            let time = refs.with_job_order(jo.as_ref()).load()?;
            tm2prw::tm2prw(
                &tm2prw::Opts {
                    input,
                    defs,
                    output,
                    visit: visit.unwrap_or_default(),
                    pass: pass.unwrap_or_default(),
                },
                &time,
                &format,
            )
        }
        Commands::Time {
            value,
            from,
            refs,
            format,
        } => {
            let ctx = refs.with_job_order(jo.as_ref()).load()?;
            time::convert(&value, &from, &ctx, &format)
        }
        Commands::Fits { input, format } => fits::fits(&input, &format),
    }
}
