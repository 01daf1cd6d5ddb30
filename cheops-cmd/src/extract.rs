use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use cheops::telemetry::{extract_packets, Vcid};
use tracing::{info, warn};

use crate::read_frames;

pub fn extract(input: &Path, output: &Path, vcid: Vcid, valid_only: bool) -> Result<()> {
    let frames = read_frames(input)?;
    let mut dst = BufWriter::new(
        File::create(output).with_context(|| format!("failed to create output {output:?}"))?,
    );

    let mut extracted = extract_packets(frames.into_iter(), vcid);
    let mut written = 0;
    for p in extracted.by_ref() {
        if let Err(err) = p.packet.validate() {
            warn!(apid = p.packet.header.apid, "{err}");
            if valid_only {
                continue;
            }
        }
        dst.write_all(&p.packet.bytes).context("writing packet")?;
        written += 1;
    }
    dst.flush().context("writing packets")?;

    let summary = extracted.summary();
    info!(
        vcid,
        frames = summary.frames,
        missing_frames = summary.missing_frames,
        lost_packets = summary.lost_packets,
        "wrote {written} packets to {output:?}"
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn empty_input_writes_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.nctrs");
        let output = dir.path().join("packets.dat");
        fs::write(&input, []).unwrap();

        extract(&input, &output, 0, false).unwrap();
        assert_eq!(fs::metadata(&output).unwrap().len(), 0);
    }

    #[test]
    fn missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("packets.dat");
        let err = extract(&dir.path().join("nope.nctrs"), &output, 0, false).unwrap_err();
        assert_eq!(err.to_string(), "opening input");
        assert!(!output.exists());
    }
}
