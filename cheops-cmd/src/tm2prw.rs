use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cheops::fits::ProgramInfo;
use cheops::hk::{HkProcessor, HkSummary, HkTableDef};
use cheops::ids::{PassId, VisitId};
use cheops::logging::{alert, progress, AlertId};
use cheops::telemetry::{extract_packets, ExtractionSummary, VC_HK};
use cheops::time::TimeContext;
use serde::Serialize;
use tracing::{info, warn};

use crate::info::{write_output, Format};
use crate::read_frames;

const HK_PROCESSING_FAILED: AlertId = AlertId(2001);

pub struct Opts {
    pub input: PathBuf,
    pub defs: PathBuf,
    pub output: PathBuf,
    pub visit: VisitId,
    pub pass: PassId,
}

#[derive(Debug, Serialize)]
struct Report {
    extraction: ExtractionSummary,
    invalid_packets: usize,
    hk: HkSummary,
    files: Vec<PathBuf>,
}

pub fn tm2prw(opts: &Opts, time: &TimeContext, format: &Format) -> Result<()> {
    if !opts.output.is_dir() {
        bail!("output directory {:?} does not exist", opts.output);
    }
    let defs = HkTableDef::load(&opts.defs)
        .with_context(|| format!("reading HK table definitions {:?}", opts.defs))?;
    if time.correlation.is_empty() {
        warn!("no OBT-UTC correlation, UTC_TIME columns will be empty");
    }
    let program = ProgramInfo {
        name: "tm2prw".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    };
    let mut processor = HkProcessor::new(&opts.output, defs, opts.visit, opts.pass, program);

    let frames = read_frames(&opts.input)?;
    let total = frames.len().max(1);
    let mut extracted = extract_packets(frames.into_iter(), VC_HK);
    let mut invalid_packets = 0;
    let mut last_percent = 0;
    while let Some(p) = extracted.next() {
        if let Err(err) = p.packet.validate() {
            warn!(apid = p.packet.header.apid, "skipping packet: {err}");
            invalid_packets += 1;
            continue;
        }
        if let Err(err) = processor.process(&p.packet, time) {
            alert(HK_PROCESSING_FAILED, &err.to_string());
            return Err(err).with_context(|| format!("processing {}", p.packet));
        }

        let percent = (extracted.summary().frames as usize * 100 / total) as i64;
        if percent >= last_percent + 10 {
            last_percent = i64::from(progress(percent));
        }
    }
    progress(100);

    let report = Report {
        extraction: extracted.summary(),
        invalid_packets,
        hk: processor.summary().clone(),
        files: processor.finish().context("writing HK tables")?,
    };
    for path in &report.files {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or_default();
        info!(size, "created {}", path.display());
    }
    write_output(&report, format, "tm2prw", TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"Frames:          {{ extraction.frames }}
Missing frames:  {{ extraction.missing_frames }}
Lost packets:    {{ extraction.lost_packets }}
Invalid packets: {{ invalid_packets }}
HK packets:      {{ hk.packets }}
Rows:            {{ hk.rows }}
Discarded:       {{ hk.discarded }}
Unknown:         {{ #each hk.unknown }}{{ @key }} ({{ this }}){{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
Files:
{{ #each files }}  {{ this }}
{{/each }}";
