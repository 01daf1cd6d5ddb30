//! Interpolation of the satellite orbit data of visit constraint files.
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fits::{BinTable, FitsPath};
use crate::time::{LeapSeconds, Utc};

/// Maximum SAA map latitude bins.
pub const SAA_MAX_LATITUDES: usize = 90;
/// Maximum SAA map longitude bins.
pub const SAA_MAX_LONGITUDES: usize = 121;

const MPS_VISITS: &str = "MPS_PRE_Visits";
const MPS_CONSTRAINTS: &str = "MPS_PRE_VisitConstraints";
const AUX_CONSTRAINTS: &str = "AUX_RES_VisitConstraints";

/// One row of a visit constraints table.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OrbitSample {
    pub utc: Utc,
    pub sun_angle: f64,
    pub moon_angle: f64,
    pub earth_limb_angle: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Interpolated orbit data.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct OrbitData {
    pub sun_angle: f64,
    pub moon_angle: f64,
    pub earth_limb_angle: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Satellite inside the South Atlantic Anomaly.
    pub saa: bool,
    /// Line of sight below the Earth limb.
    pub earth_occultation: bool,
}

/// South Atlantic Anomaly flags on a latitude/longitude grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaaMap {
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    flags: Vec<Vec<bool>>,
}

impl SaaMap {
    /// Build from `(latitude, longitude, flag)` rows ordered by latitude then
    /// longitude. A new latitude bin starts whenever the latitude changes.
    ///
    /// # Errors
    /// More than 90 latitude or 121 longitude bins.
    pub fn new<I: IntoIterator<Item = (f64, f64, bool)>>(rows: I) -> Result<Self> {
        let mut map = SaaMap::default();
        let mut previous: Option<f64> = None;
        for (latitude, longitude, flag) in rows {
            if previous != Some(latitude) {
                map.latitudes.push(latitude);
                map.flags.push(Vec::new());
                previous = Some(latitude);
            }
            let ilat = map.latitudes.len() - 1;
            let ilong = map.flags[ilat].len();
            if ilat >= SAA_MAX_LATITUDES || ilong >= SAA_MAX_LONGITUDES {
                return Err(Error::Orbit(
                    "SAA map dimension exceeds 90(lat)x121(long)".to_string(),
                ));
            }
            map.flags[ilat].push(flag);
            if ilat == 0 {
                map.longitudes.push(longitude);
            }
        }
        Ok(map)
    }

    /// # Errors
    /// Missing columns or an oversized map.
    pub fn from_table(table: &BinTable) -> Result<Self> {
        let rows = table
            .rows()
            .map(|r| -> Result<(f64, f64, bool)> {
                Ok((r.get("LATITUDE")?, r.get("LONGITUDE")?, r.get("SAA_FLAG")?))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(rows)
    }

    /// Flag of the bin nearest to the position, false for an empty map.
    #[must_use]
    pub fn flag(&self, latitude: f64, longitude: f64) -> bool {
        let ilat = nearest(&self.latitudes, latitude);
        let ilong = nearest(&self.longitudes, longitude);
        self.flags
            .get(ilat)
            .and_then(|row| row.get(ilong))
            .copied()
            .unwrap_or(false)
    }
}

/// Index of the grid value nearest to `value`, ties going to the upper bin.
fn nearest(grid: &[f64], value: f64) -> usize {
    match grid.iter().position(|g| *g > value) {
        Some(0) => 0,
        Some(i) if grid[i] - value > value - grid[i - 1] => i - 1,
        Some(i) => i,
        None => grid.len().saturating_sub(1),
    }
}

/// Orbit data of a visit, interpolated at arbitrary times.
#[derive(Debug, Clone)]
pub struct OrbitInterpolation {
    samples: Vec<OrbitSample>,
    saa: SaaMap,
}

impl OrbitInterpolation {
    #[must_use]
    pub fn new(samples: Vec<OrbitSample>, saa: SaaMap) -> Self {
        OrbitInterpolation { samples, saa }
    }

    /// Read a visit constraints file and an SAA map. `MPS_PRE_Visits` files
    /// are read from their `MPS_PRE_VisitConstraints` extension.
    ///
    /// # Errors
    /// Neither an `MPS_PRE_Visits` nor an `AUX_RES_VisitConstraints` file, or
    /// the tables can not be read.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(orbit_file: P, saa_map: Q) -> Result<Self> {
        let fits_path = FitsPath::parse(orbit_file.as_ref());
        let name = fits_path.file.to_string_lossy();
        let table = if name.contains(MPS_VISITS) {
            BinTable::open(format!("{name}[{MPS_CONSTRAINTS}]"))?
        } else if name.contains(AUX_CONSTRAINTS) {
            BinTable::open(orbit_file.as_ref())?
        } else {
            return Err(Error::Orbit(format!(
                "input files must have either {MPS_VISITS} or {AUX_CONSTRAINTS} as the first extension"
            )));
        };
        let samples = table
            .rows()
            .map(|r| -> Result<OrbitSample> {
                Ok(OrbitSample {
                    utc: r.get::<String>("UTC_TIME")?.trim().parse()?,
                    sun_angle: r.get("LOS_TO_SUN_ANGLE")?,
                    moon_angle: r.get("LOS_TO_MOON_ANGLE")?,
                    earth_limb_angle: r.get("LOS_TO_EARTH_ANGLE")?,
                    latitude: r.get("LATITUDE")?,
                    longitude: r.get("LONGITUDE")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let saa = SaaMap::from_table(&BinTable::open(saa_map)?)?;
        debug!(samples = samples.len(), "read orbit data");
        Ok(Self::new(samples, saa))
    }

    #[must_use]
    pub fn samples(&self) -> &[OrbitSample] {
        &self.samples
    }

    /// Linear interpolation between the last sample at or before `utc` and
    /// the first sample after it.
    ///
    /// # Errors
    /// `utc` is before the first sample or not before the last one.
    pub fn interpolate(&self, utc: &Utc, leaps: &LeapSeconds) -> Result<OrbitData> {
        let not_found = || {
            Error::Orbit(format!(
                "requested UTC time {utc} not found in VisitConstraints file(s) provided to OrbitInterpolation"
            ))
        };
        match self.samples.first() {
            Some(first) if first.utc <= *utc => {}
            _ => return Err(not_found()),
        }
        let next_idx = self
            .samples
            .iter()
            .position(|s| s.utc > *utc)
            .ok_or_else(not_found)?;
        let prev = &self.samples[next_idx - 1];
        let next = &self.samples[next_idx];

        let mu = utc.diff(&prev.utc, leaps).seconds() / next.utc.diff(&prev.utc, leaps).seconds();
        let lerp = |a: f64, b: f64| a * (1.0 - mu) + b * mu;
        let latitude = lerp(prev.latitude, next.latitude);
        let longitude = lerp(prev.longitude, next.longitude);
        let earth_limb_angle = lerp(prev.earth_limb_angle, next.earth_limb_angle);
        Ok(OrbitData {
            sun_angle: lerp(prev.sun_angle, next.sun_angle),
            moon_angle: lerp(prev.moon_angle, next.moon_angle),
            earth_limb_angle,
            latitude,
            longitude,
            saa: self.saa.flag(latitude, longitude),
            earth_occultation: earth_limb_angle < 0.0,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(utc: &str, value: f64) -> OrbitSample {
        OrbitSample {
            utc: utc.parse().unwrap(),
            sun_angle: value,
            moon_angle: 2.0 * value,
            earth_limb_angle: value - 15.0,
            latitude: value,
            longitude: value,
        }
    }

    fn saa() -> SaaMap {
        let mut rows = Vec::new();
        for lat in [-10.0, 0.0, 10.0, 20.0] {
            for lon in [0.0, 10.0, 20.0] {
                rows.push((lat, lon, lat >= 20.0 && lon >= 10.0));
            }
        }
        SaaMap::new(rows).unwrap()
    }

    fn orbit() -> OrbitInterpolation {
        OrbitInterpolation::new(
            vec![
                sample("2020-01-01T00:00:00", 0.0),
                sample("2020-01-01T00:01:00", 10.0),
                sample("2020-01-01T00:02:00", 20.0),
            ],
            saa(),
        )
    }

    #[test]
    fn interpolates_linearly() {
        let leaps = LeapSeconds::iers();
        let data = orbit()
            .interpolate(&"2020-01-01T00:01:30".parse().unwrap(), &leaps)
            .unwrap();
        assert_eq!(data.sun_angle, 15.0);
        assert_eq!(data.moon_angle, 30.0);
        assert_eq!(data.earth_limb_angle, 0.0);
        assert!(!data.earth_occultation);
        assert!(data.saa);

        let data = orbit()
            .interpolate(&"2020-01-01T00:00:30".parse().unwrap(), &leaps)
            .unwrap();
        assert_eq!(data.earth_limb_angle, -10.0);
        assert!(data.earth_occultation);
        assert!(!data.saa);
    }

    #[test]
    fn exact_sample_time() {
        let leaps = LeapSeconds::iers();
        let data = orbit()
            .interpolate(&"2020-01-01T00:00:00".parse().unwrap(), &leaps)
            .unwrap();
        assert_eq!(data.sun_angle, 0.0);
    }

    #[test]
    fn outside_of_samples() {
        let leaps = LeapSeconds::iers();
        for utc in ["2019-12-31T23:59:59", "2020-01-01T00:02:00", "2020-01-02T00:00:00"] {
            let err = orbit().interpolate(&utc.parse().unwrap(), &leaps).unwrap_err();
            assert!(matches!(err, Error::Orbit(_)), "{utc}");
        }
    }

    #[test]
    fn nearest_bin() {
        let grid = [0.0, 10.0, 20.0];
        assert_eq!(nearest(&grid, -5.0), 0);
        assert_eq!(nearest(&grid, 4.0), 0);
        assert_eq!(nearest(&grid, 5.0), 1);
        assert_eq!(nearest(&grid, 6.0), 1);
        assert_eq!(nearest(&grid, 25.0), 2);
    }

    #[test]
    fn oversized_saa_map() {
        let rows = (0..91).map(|lat| (f64::from(lat), 0.0, false));
        let err = SaaMap::new(rows).unwrap_err();
        assert_eq!(
            err.to_string(),
            "orbit interpolation: SAA map dimension exceeds 90(lat)x121(long)"
        );
        let rows = (0..122).map(|lon| (0.0, f64::from(lon), false));
        assert!(SaaMap::new(rows).is_err());
    }

    #[test]
    fn unknown_orbit_file() {
        let err = OrbitInterpolation::open("orbit.fits", "saa.fits").unwrap_err();
        assert!(matches!(err, Error::Orbit(_)));
    }
}
