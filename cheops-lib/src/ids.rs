//! Pass and visit identifiers used in product file names and headers.
use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifies a ground station pass by the UTC hour of its start, `yymmddhh`.
///
/// A pass id read from a string that is not made of digits is invalid. All
/// invalid ids are equal to each other, and ordering comparisons with an
/// invalid id are false.
///
/// ```
/// use cheops::ids::PassId;
///
/// let pass: PassId = "PS15040613".parse().unwrap();
/// assert_eq!(pass.to_string(), "15040613");
/// assert_eq!(pass.file_name_pattern(), "PS15040613");
/// assert!(!"PSxx".parse::<PassId>().unwrap().is_valid());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct PassId {
    year: u8,
    month: u8,
    day: u8,
    hour: u8,
    valid: bool,
}

impl Default for PassId {
    fn default() -> Self {
        PassId {
            year: 10,
            month: 1,
            day: 1,
            hour: 0,
            valid: false,
        }
    }
}

impl PassId {
    /// Years after 2000 are stored as two digits.
    ///
    /// # Errors
    /// [Error::InvalidId] naming the first component out of range.
    pub fn new(year: u16, month: u8, day: u8, hour: u8) -> Result<Self> {
        let year = if year > 2000 { year - 2000 } else { year };
        let year = u8::try_from(year).map_err(|_| range_error("year", "10 to 30", year))?;
        let id = PassId {
            year,
            month,
            day,
            hour,
            valid: true,
        };
        id.validate()?;
        Ok(id)
    }

    fn validate(&self) -> Result<()> {
        if !(10..=30).contains(&self.year) && self.year != 0 {
            return Err(range_error("year", "10 to 30", self.year));
        }
        if self.month > 12 {
            return Err(range_error("month", "1 to 12", self.month));
        }
        if self.day > 31 {
            return Err(range_error("day", "1 to 31", self.day));
        }
        if self.hour > 23 {
            return Err(range_error("hour", "0 to 23", self.hour));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    #[must_use]
    pub fn year(&self) -> u8 {
        self.year
    }
    #[must_use]
    pub fn month(&self) -> u8 {
        self.month
    }
    #[must_use]
    pub fn day(&self) -> u8 {
        self.day
    }
    #[must_use]
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// `PSyymmddhh`, `PS00000000` for an invalid id.
    #[must_use]
    pub fn file_name_pattern(&self) -> String {
        if self.valid {
            format!("PS{self}")
        } else {
            "PS00000000".to_string()
        }
    }

    fn fields(&self) -> (u8, u8, u8, u8) {
        (self.year, self.month, self.day, self.hour)
    }
}

fn range_error(what: &str, range: &str, found: impl Display) -> Error {
    Error::InvalidId(format!(
        "The {what} of a PassID has to be in the range from {range}. PassId - constructor found {found}"
    ))
}

impl FromStr for PassId {
    type Err = Error;

    /// Parse `[PS]yymmddhh`.
    ///
    /// # Errors
    /// [Error::InvalidId] if the digits are out of range; anything that is not
    /// digits gives an invalid id.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("PS").unwrap_or(s);
        let field = |i: usize| -> Option<u8> {
            digits
                .get(i..i + 2)
                .filter(|f| f.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|f| f.parse().ok())
        };
        match (field(0), field(2), field(4), field(6)) {
            (Some(year), Some(month), Some(day), Some(hour)) => {
                let id = PassId {
                    year,
                    month,
                    day,
                    hour,
                    valid: true,
                };
                id.validate()?;
                Ok(id)
            }
            _ => Ok(PassId::default()),
        }
    }
}

impl Display for PassId {
    /// `yymmddhh`, empty for an invalid id.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.valid {
            return Ok(());
        }
        write!(
            f,
            "{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

impl PartialEq for PassId {
    fn eq(&self, other: &Self) -> bool {
        match (self.valid, other.valid) {
            (false, false) => true,
            (true, true) => self.fields() == other.fields(),
            _ => false,
        }
    }
}

impl PartialOrd for PassId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.valid, other.valid) {
            (false, false) => Some(Ordering::Equal),
            (true, true) => Some(self.fields().cmp(&other.fields())),
            _ => None,
        }
    }
}

/// Identifies an observation visit: program type, program, request and visit
/// counter. Program type 0 marks an invalid (unset) visit.
///
/// ```
/// use cheops::ids::VisitId;
///
/// let visit: VisitId = "PR300024_TG000101".parse().unwrap();
/// assert_eq!(visit.program_type(), 30);
/// assert_eq!(visit.program_id(), 24);
/// assert_eq!(visit.request_id(), 1);
/// assert_eq!(visit.visit_counter(), 1);
/// assert_eq!(visit.file_name_pattern(), "PR300024_TG000101");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisitId {
    program_type: u8,
    program_id: u16,
    request_id: u16,
    visit_counter: u8,
    valid: bool,
}

impl Default for VisitId {
    fn default() -> Self {
        VisitId {
            program_type: 0,
            program_id: 0,
            request_id: 0,
            visit_counter: 1,
            valid: false,
        }
    }
}

impl VisitId {
    /// # Errors
    /// [Error::InvalidId] naming the first component out of range.
    pub fn new(program_type: u8, program_id: u16, request_id: u16, visit_counter: u8) -> Result<Self> {
        if !(10..=50).contains(&program_type) && ![0, 90, 98, 99].contains(&program_type) {
            return Err(Error::InvalidId(format!(
                "The program type of a VisitID has to be either between 10 and 50, or 0, 90, 98 or 99 - constructor found {program_type}"
            )));
        }
        if program_id > 9999 {
            return Err(Error::InvalidId(format!(
                "The program Id of a VisitID has to be less than 10000 - constructor found {program_id}"
            )));
        }
        if request_id > 9999 {
            return Err(Error::InvalidId(format!(
                "The request Id of a VisitID has to be less than 10000 - constructor found {request_id}"
            )));
        }
        if visit_counter > 99 {
            return Err(Error::InvalidId(format!(
                "The visit counter of a VisitID has to be in the range 1 to 99 - constructor found {visit_counter}"
            )));
        }
        Ok(VisitId {
            program_type,
            program_id,
            request_id,
            visit_counter,
            valid: program_type != 0,
        })
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    #[must_use]
    pub fn program_type(&self) -> u8 {
        self.program_type
    }
    #[must_use]
    pub fn program_id(&self) -> u16 {
        self.program_id
    }
    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.request_id
    }
    #[must_use]
    pub fn visit_counter(&self) -> u8 {
        self.visit_counter
    }

    /// `PRttpppp_TGrrrrcc`
    #[must_use]
    pub fn file_name_pattern(&self) -> String {
        format!(
            "PR{:02}{:04}_TG{:04}{:02}",
            self.program_type, self.program_id, self.request_id, self.visit_counter
        )
    }

    fn fields(&self) -> (u8, u16, u16, u8) {
        (
            self.program_type,
            self.program_id,
            self.request_id,
            self.visit_counter,
        )
    }
}

impl FromStr for VisitId {
    type Err = Error;

    /// Parse the file name pattern `PRttpppp_TGrrrrcc`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidId(format!("Expected: PRttpppp_TGrrrrcc but found: {s}"));
        let field = |range: std::ops::Range<usize>| -> Result<u16> {
            s.get(range)
                .filter(|f| f.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|f| f.parse().ok())
                .ok_or_else(invalid)
        };
        let program_type = u8::try_from(field(2..4)?).map_err(|_| invalid())?;
        let visit_counter = u8::try_from(field(15..17)?).map_err(|_| invalid())?;
        VisitId::new(program_type, field(4..8)?, field(11..15)?, visit_counter)
    }
}

impl Display for VisitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name_pattern())
    }
}

impl PartialOrd for VisitId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VisitId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fields()
            .cmp(&other.fields())
            .then(self.valid.cmp(&other.valid))
    }
}
