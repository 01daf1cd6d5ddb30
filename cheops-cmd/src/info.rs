use anyhow::{Context, Result};
use cheops::telemetry::{extract_packets, ExtractionSummary, PacketSummary, Vcid};
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    io::{stdout, Write},
    path::Path,
};
use tracing::debug;

use crate::read_frames;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    frames: usize,
    idle_frames: usize,
    virtual_channels: BTreeMap<Vcid, ExtractionSummary>,
    packets: PacketSummary,
}

fn summarize(fpath: &Path) -> Result<Info> {
    let frames = read_frames(fpath)?;
    let mut virtual_channels = BTreeMap::default();
    let mut packets = PacketSummary::default();
    let idle_frames = frames.iter().filter(|f| f.is_idle()).count();

    let mut vcids: Vec<Vcid> = frames.iter().map(|f| f.header.vcid).collect();
    vcids.sort_unstable();
    vcids.dedup();
    for vcid in vcids {
        let mut extracted = extract_packets(frames.iter().cloned(), vcid);
        for p in extracted.by_ref() {
            packets.add(&p.packet);
        }
        debug!(vcid, "{:?}", extracted.summary());
        virtual_channels.insert(vcid, extracted.summary());
    }

    Ok(Info {
        filename: fpath.to_string_lossy().to_string(),
        frames: frames.len(),
        idle_frames,
        virtual_channels,
        packets,
    })
}

pub fn info(fpath: &Path, format: &Format) -> Result<()> {
    let info = summarize(fpath)?;
    write_output(&info, format, "info", TEXT_TEMPLATE)
}

/// Write `data` as pretty JSON or rendered with a handlebars template.
pub fn write_output<T: Serialize>(data: &T, format: &Format, name: &str, template: &str) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), data).context("serializing to json")?;
            writeln!(stdout()).context("writing to stdout")
        }
        Format::Text => {
            let text = render_text(data, name, template).context("serializing info")?;
            stdout()
                .write_all(text.as_bytes())
                .context("writing to stdout")
        }
    }
}

fn render_text<T: Serialize>(data: &T, name: &str, template: &str) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>width$}")
    });
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string(name, template)
        .context("invalid template")?;

    hb.render(name, data).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================
Frames:   {{ frames }} ({{ idle_frames }} idle)
APIDS:    {{ #each packets.apids }}{{ @key }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
Packets:  {{ packets.count }}
Missing:  {{ packets.missing }}
Invalid:  {{ packets.invalid }}
-------------------------------------------------------------------------------
VC       Frames   Missing frames   Packets   Lost packets
-------------------------------------------------------------------------------
{{ #each virtual_channels }}{{ lpad 2 @key }}   {{ lpad 10 frames }}   {{ lpad 14 missing_frames }}   {{ lpad 7 extracted }}   {{ lpad 12 lost_packets }}
{{/each }}-------------------------------------------------------------------------------
APID      Count     Bytes   Missing   Invalid
-------------------------------------------------------------------------------
{{ #each packets.apids }}{{ lpad 4 @key }}   {{ lpad 8 count }}  {{ lpad 8 bytes }}  {{ lpad 8 missing }}  {{ lpad 8 invalid }}
{{/each }}";
