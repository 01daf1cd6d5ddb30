use anyhow::{Context, Result};
use cheops::fits::{FitsFile, FitsPath, Hdu, HduKind};
use serde::Serialize;

use crate::info::{write_output, Format};

#[derive(Debug, Serialize)]
struct HduInfo {
    index: usize,
    name: String,
    kind: String,
    data_bytes: usize,
    /// `verified`, or `missing` for HDUs without checksum keywords.
    checksum: &'static str,
    cards: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Listing {
    filename: String,
    hdus: Vec<HduInfo>,
}

fn describe(index: usize, hdu: &Hdu) -> HduInfo {
    let kind = match hdu.kind() {
        HduKind::Primary => "primary",
        HduKind::Image => "image",
        HduKind::BinTable => "binary table",
    };
    let cards = hdu
        .header
        .cards()
        .iter()
        .map(|card| match &card.value {
            Some(value) if card.comment.is_empty() => format!("{:<8}= {value}", card.keyword),
            Some(value) => format!("{:<8}= {value} / {}", card.keyword, card.comment),
            None => format!("{:<8}{}", card.keyword, card.comment),
        })
        .collect();
    let checksum = if hdu.header.contains("CHECKSUM") && hdu.header.contains("DATASUM") {
        "verified"
    } else {
        "missing"
    };
    HduInfo {
        index,
        name: hdu.name(),
        kind: kind.to_string(),
        data_bytes: hdu.data.len(),
        checksum,
        cards,
    }
}

pub fn fits(input: &str, format: &Format) -> Result<()> {
    // opening verifies the checksums of all HDUs
    let file = FitsFile::open(input).with_context(|| format!("opening {input}"))?;
    let path = FitsPath::parse(input);
    let hdus = match &path.extension {
        Some(name) => {
            let idx = file
                .find(name)
                .with_context(|| format!("no extension {name} in {}", path.file.display()))?;
            vec![(idx, &file.hdus()[idx])]
        }
        None => file.hdus().iter().enumerate().collect(),
    };
    let listing = Listing {
        filename: path.file.to_string_lossy().to_string(),
        hdus: hdus.into_iter().map(|(i, h)| describe(i, h)).collect(),
    };
    write_output(&listing, format, "fits", TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
{{ #each hdus }}
HDU {{ index }}: {{ name }} ({{ kind }}, {{ data_bytes }} data bytes, checksum {{ checksum }})
-------------------------------------------------------------------------------
{{ #each cards }}{{ this }}
{{/each }}{{/each }}";
