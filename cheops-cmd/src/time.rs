use anyhow::{Context, Result};
use cheops::time::{Mjd, Obt, TimeContext, Utc, MJD_TO_JD};
use serde::Serialize;

use crate::info::{write_output, Format};

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum TimeKind {
    /// Raw OBT counter
    Obt,
    /// `yyyy-mm-ddThh:mm:ss[.ffffff]`
    Utc,
    /// Modified Julian date, TT
    Mjd,
}

#[derive(Debug, Serialize)]
struct Times {
    utc: Utc,
    /// Only available with a correlation.
    obt: Option<Obt>,
    obt_synchronized: Option<bool>,
    mjd: f64,
    jd: f64,
    leap_seconds: i16,
}

fn utc_of(value: &str, kind: &TimeKind, ctx: &TimeContext) -> Result<Utc> {
    let value = value.trim();
    match kind {
        TimeKind::Utc => value.parse().context("parsing UTC"),
        TimeKind::Obt => {
            let raw: i64 = value.parse().context("parsing OBT")?;
            ctx.obt_to_utc(Obt::new(raw)).context("converting OBT to UTC")
        }
        TimeKind::Mjd => {
            let mjd: f64 = value.parse().context("parsing MJD")?;
            ctx.mjd_to_utc(Mjd::from(mjd)).context("converting MJD to UTC")
        }
    }
}

pub fn convert(value: &str, kind: &TimeKind, ctx: &TimeContext, format: &Format) -> Result<()> {
    let utc = utc_of(value, kind, ctx)?;
    let obt = match kind {
        TimeKind::Obt => Some(Obt::new(value.trim().parse()?)),
        _ if ctx.correlation.is_empty() => None,
        _ => Some(ctx.utc_to_obt(&utc).context("converting UTC to OBT")?),
    };
    let mjd = ctx.utc_to_mjd(&utc).value();
    let times = Times {
        utc,
        obt,
        obt_synchronized: obt.map(|o| o.is_synchronized()),
        mjd,
        jd: mjd + MJD_TO_JD,
        leap_seconds: ctx.leaps.at(&utc),
    };
    write_output(&times, format, "time", TEXT_TEMPLATE)
}

const TEXT_TEMPLATE: &str = r"UTC:          {{ utc }}
OBT:          {{ #if obt }}{{ obt }}{{ else }}n/a (no correlation){{ /if }}
MJD:          {{ mjd }}
JD:           {{ jd }}
Leap seconds: {{ leap_seconds }}
";
