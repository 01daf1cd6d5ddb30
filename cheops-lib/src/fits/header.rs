use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{FitsError, BLOCK_LEN, CARD_LEN};

const END_CARD: &str = "END";
const MAX_STRING_LEN: usize = 68;

/// A keyword value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A keyword without value.
    Undefined,
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", if *v { "T" } else { "F" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => {
                let s = format!("{v:?}");
                write!(f, "{}", s.replace('e', "E"))
            }
            Value::Str(v) => write!(f, "{v}"),
            Value::Undefined => Ok(()),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}
value_from_int!(i8, u8, i16, u16, i32, u32, i64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Conversion of a keyword value to a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

macro_rules! int_from_value {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Int(v) => <$t>::try_from(*v).ok(),
                    _ => None,
                }
            }
        })*
    };
}
int_from_value!(u8, i16, u16, i32, u32, i64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(v) => Some(v.clone()),
            Value::Undefined => None,
            other => Some(other.to_string()),
        }
    }
}

/// One 80 character header record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub keyword: String,
    /// `None` for commentary cards (`HISTORY`, `COMMENT`, blank).
    pub value: Option<Value>,
    /// Comment of a value card, including a leading `[unit]`, or the text of
    /// a commentary card.
    pub comment: String,
}

impl Card {
    /// Unit given as `[unit]` at the start of the comment.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        let rest = self.comment.strip_prefix('[')?;
        rest.find(']').map(|end| &rest[..end])
    }

    /// Comment without the unit.
    #[must_use]
    pub fn comment_text(&self) -> &str {
        match self.comment.strip_prefix('[').and_then(|r| r.find(']').map(|e| &r[e + 1..])) {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
            None => &self.comment,
        }
    }

    fn parse(card: &str) -> Result<Self, FitsError> {
        let keyword = card.get(..8).unwrap_or(card).trim_end().to_string();
        if card.get(8..10) != Some("= ") {
            return Ok(Card {
                keyword,
                value: None,
                comment: card.get(8..).unwrap_or("").trim_end().to_string(),
            });
        }
        let rest = card[10..].trim_start();
        if let Some(quoted) = rest.strip_prefix('\'') {
            let mut value = String::new();
            let mut chars = quoted.char_indices().peekable();
            let mut end = None;
            while let Some((i, c)) = chars.next() {
                if c == '\'' {
                    if matches!(chars.peek(), Some((_, '\''))) {
                        value.push('\'');
                        chars.next();
                        continue;
                    }
                    end = Some(i + 1);
                    break;
                }
                value.push(c);
            }
            let end = end.ok_or_else(|| FitsError::InvalidCard(card.to_string()))?;
            let after = &quoted[end..];
            let comment = after
                .find('/')
                .map(|i| after[i + 1..].trim().to_string())
                .unwrap_or_default();
            return Ok(Card {
                keyword,
                value: Some(Value::Str(value.trim_end().to_string())),
                comment,
            });
        }

        let (raw, comment) = match rest.find('/') {
            Some(i) => (rest[..i].trim(), rest[i + 1..].trim().to_string()),
            None => (rest.trim(), String::new()),
        };
        let value = match raw {
            "" => Value::Undefined,
            "T" => Value::Bool(true),
            "F" => Value::Bool(false),
            _ => {
                if let Ok(v) = raw.parse::<i64>() {
                    Value::Int(v)
                } else if let Ok(v) = raw.replace('D', "E").parse::<f64>() {
                    Value::Float(v)
                } else {
                    return Err(FitsError::InvalidCard(card.to_string()));
                }
            }
        };
        Ok(Card {
            keyword,
            value: Some(value),
            comment,
        })
    }

    fn format(&self) -> Result<String, FitsError> {
        let mut card = format!("{:<8}", self.keyword);
        match &self.value {
            None => {
                card.push_str(&self.comment);
            }
            Some(value) => {
                card.push_str("= ");
                match value {
                    Value::Str(s) => {
                        if s.len() > MAX_STRING_LEN {
                            return Err(FitsError::InvalidKeyword {
                                keyword: self.keyword.clone(),
                                msg: format!("string value longer than {MAX_STRING_LEN} characters"),
                            });
                        }
                        let quoted = format!("'{:<8}'", s.replace('\'', "''"));
                        card.push_str(&format!("{quoted:<20}"));
                    }
                    other => card.push_str(&format!("{:>20}", other.to_string())),
                }
                if !self.comment.is_empty() {
                    card.push_str(" / ");
                    card.push_str(&self.comment);
                }
            }
        }
        if !card.is_ascii() {
            return Err(FitsError::InvalidCard(card));
        }
        card.truncate(CARD_LEN);
        Ok(format!("{card:<80}"))
    }
}

/// Program identification written to every product header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub name: String,
    pub version: String,
    pub proc_chain: String,
    pub arch_rev: u16,
    pub proc_num: u16,
    pub pipeline_version: String,
}

impl Default for ProgramInfo {
    fn default() -> Self {
        ProgramInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            proc_chain: "undefined".to_string(),
            arch_rev: 0,
            proc_num: 0,
            pipeline_version: "N/A".to_string(),
        }
    }
}

impl ProgramInfo {
    /// `arch_rev * 100 + proc_num`, as used in product file names.
    #[must_use]
    pub fn data_version(&self) -> u32 {
        u32::from(self.arch_rev) * 100 + u32::from(self.proc_num)
    }
}

/// An ordered list of header cards.
///
/// ```
/// use cheops::fits::Header;
///
/// let mut hdr = Header::default();
/// hdr.set_with_comment("EXPTIME", 2.5, "exposure time", "s");
/// assert_eq!(hdr.get::<f64>("EXPTIME").unwrap(), 2.5);
/// assert_eq!(hdr.unit("EXPTIME"), Some("s"));
/// assert_eq!(hdr.comment("EXPTIME"), Some("exposure time"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// Parse cards up to and including `END`. Returns the header and the
    /// number of bytes it occupies, padding included.
    ///
    /// # Errors
    /// [FitsError::Truncated] if there is no `END` card, or an invalid card.
    pub fn parse(dat: &[u8]) -> Result<(Self, usize), FitsError> {
        let mut cards = Vec::new();
        for (idx, raw) in dat.chunks_exact(CARD_LEN).enumerate() {
            let text = String::from_utf8_lossy(raw);
            if text.trim_end() == END_CARD {
                let used = (idx + 1) * CARD_LEN;
                let len = used.div_ceil(BLOCK_LEN) * BLOCK_LEN;
                return Ok((Header { cards }, len));
            }
            let card = Card::parse(&text)?;
            if card.keyword.is_empty() && card.comment.is_empty() {
                continue;
            }
            cards.push(card);
        }
        Err(FitsError::Truncated("header without END".to_string()))
    }

    /// Serialise including the `END` card, padded with blanks to full blocks.
    ///
    /// # Errors
    /// A card can not be represented, e.g. a string value is too long.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FitsError> {
        let mut out = Vec::with_capacity(BLOCK_LEN);
        for card in &self.cards {
            out.extend_from_slice(card.format()?.as_bytes());
        }
        out.extend_from_slice(format!("{END_CARD:<80}").as_bytes());
        out.resize(out.len().div_ceil(BLOCK_LEN) * BLOCK_LEN, b' ');
        Ok(out)
    }

    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    fn position(&self, keyword: &str) -> Option<usize> {
        self.cards
            .iter()
            .position(|c| c.value.is_some() && c.keyword == keyword)
    }

    fn card(&self, keyword: &str) -> Option<&Card> {
        self.position(keyword).map(|i| &self.cards[i])
    }

    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.position(keyword).is_some()
    }

    #[must_use]
    pub fn value(&self, keyword: &str) -> Option<&Value> {
        self.card(keyword).and_then(|c| c.value.as_ref())
    }

    /// Name of this HDU for messages.
    #[must_use]
    pub fn name(&self) -> String {
        self.get_opt::<String>("EXTNAME")
            .unwrap_or_else(|| "PRIMARY".to_string())
    }

    /// # Errors
    /// [FitsError::MissingKeyword] or [FitsError::InvalidKeyword] if the value
    /// has another type.
    pub fn get<T: FromValue>(&self, keyword: &str) -> Result<T, FitsError> {
        let value = self.value(keyword).ok_or_else(|| FitsError::MissingKeyword {
            keyword: keyword.to_string(),
            hdu: self.name(),
        })?;
        T::from_value(value).ok_or_else(|| FitsError::InvalidKeyword {
            keyword: keyword.to_string(),
            msg: format!("unexpected value type {value:?}"),
        })
    }

    #[must_use]
    pub fn get_opt<T: FromValue>(&self, keyword: &str) -> Option<T> {
        self.value(keyword).and_then(T::from_value)
    }

    #[must_use]
    pub fn comment(&self, keyword: &str) -> Option<&str> {
        self.card(keyword).map(Card::comment_text)
    }

    #[must_use]
    pub fn unit(&self, keyword: &str) -> Option<&str> {
        self.card(keyword).and_then(Card::unit)
    }

    /// Set a value, keeping the comment and unit of an existing card.
    pub fn set<V: Into<Value>>(&mut self, keyword: &str, value: V) {
        self.set_with_comment(keyword, value, "", "");
    }

    /// Set value, comment and unit. An empty comment or unit keeps the one of
    /// an existing card.
    pub fn set_with_comment<V: Into<Value>>(
        &mut self,
        keyword: &str,
        value: V,
        comment: &str,
        unit: &str,
    ) {
        let (old_comment, old_unit) = match self.card(keyword) {
            Some(card) => (
                card.comment_text().to_string(),
                card.unit().unwrap_or("").to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let comment = if comment.is_empty() {
            old_comment
        } else {
            comment.to_string()
        };
        let unit = if unit.is_empty() { old_unit } else { unit.to_string() };
        let comment = if unit.is_empty() {
            comment
        } else {
            format!("[{unit}] {comment}")
        };
        let card = Card {
            keyword: keyword.to_string(),
            value: Some(value.into()),
            comment,
        };
        match self.position(keyword) {
            Some(i) => self.cards[i] = card,
            None => self.cards.push(card),
        }
    }

    /// Remove a keyword, returns whether it existed.
    pub fn remove(&mut self, keyword: &str) -> bool {
        match self.position(keyword) {
            Some(i) => {
                self.cards.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn add_history(&mut self, text: &str) {
        self.add_commentary("HISTORY", text);
    }

    pub fn add_comment(&mut self, text: &str) {
        self.add_commentary("COMMENT", text);
    }

    fn add_commentary(&mut self, keyword: &str, text: &str) {
        // long text is split over several cards
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(CARD_LEN - 8).take(100) {
            self.cards.push(Card {
                keyword: keyword.to_string(),
                value: None,
                comment: chunk.iter().collect(),
            });
        }
    }

    #[must_use]
    pub fn history(&self) -> Vec<&str> {
        self.commentary("HISTORY")
    }

    #[must_use]
    pub fn comments(&self) -> Vec<&str> {
        self.commentary("COMMENT")
    }

    fn commentary(&self, keyword: &str) -> Vec<&str> {
        self.cards
            .iter()
            .filter(|c| c.value.is_none() && c.keyword == keyword)
            .map(|c| c.comment.as_str())
            .collect()
    }

    /// Write the processing keywords of a product header: `DATE`, `STAMP`,
    /// `PROC_CHN` (unless already set), `ARCH_REV`, `PROC_NUM` and `PIPE_VER`.
    pub fn set_program(&mut self, program: &ProgramInfo) {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.set_with_comment("DATE", now, "creation time of this HDU", "");
        self.set_with_comment(
            "STAMP",
            format!("{} {}", program.name, program.version),
            "program creating this HDU",
            "",
        );
        if self.get_opt::<String>("PROC_CHN").unwrap_or_default().is_empty() {
            self.set_with_comment(
                "PROC_CHN",
                program.proc_chain.as_str(),
                "processing chain",
                "",
            );
        }
        self.set_with_comment("ARCH_REV", program.arch_rev, "archive revision number", "");
        self.set_with_comment("PROC_NUM", program.proc_num, "processing number", "");
        self.set_with_comment(
            "PIPE_VER",
            program.pipeline_version.as_str(),
            "pipeline version",
            "",
        );
    }

    /// Warn if `EXT_VER` is missing or differs from `expected`. Returns true
    /// for a matching version.
    pub fn check_ext_version(&self, expected: &str, struct_name: &str) -> bool {
        if expected.is_empty() {
            warn!("The version of the data structure {struct_name} is not defined.");
            return false;
        }
        match self.get_opt::<String>("EXT_VER") {
            None => {
                warn!(
                    "The version of the data structure (keyword EXT_VER) is not defined in {}",
                    self.name()
                );
                false
            }
            Some(found) if found != expected => {
                warn!(
                    "The data structure version of the structure [{struct_name}], that is used by the software [{expected}] and the version that used to create the FITS extension [{found}] in {}, are not identical.",
                    self.name()
                );
                false
            }
            Some(_) => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn card_formatting() {
        let card = Card {
            keyword: "EXTNAME".to_string(),
            value: Some(Value::from("SCI_RAW")),
            comment: "name".to_string(),
        };
        let text = card.format().unwrap();
        assert_eq!(text.len(), 80);
        assert!(text.starts_with("EXTNAME = 'SCI_RAW '           / name"));

        let card = Card {
            keyword: "NAXIS".to_string(),
            value: Some(Value::Int(2)),
            comment: String::new(),
        };
        assert_eq!(card.format().unwrap().trim_end(), "NAXIS   =                    2");
    }

    #[test]
    fn card_parsing() {
        let card = Card::parse("OBJECT  = 'It''s a star'       / [deg] target ").unwrap();
        assert_eq!(card.value, Some(Value::Str("It's a star".to_string())));
        assert_eq!(card.unit(), Some("deg"));
        assert_eq!(card.comment_text(), "target");

        let card = Card::parse("SIMPLE  =                    T / conforms").unwrap();
        assert_eq!(card.value, Some(Value::Bool(true)));
        let card = Card::parse("BSCALE  =               1.5D+1").unwrap();
        assert_eq!(card.value, Some(Value::Float(15.0)));
        let card = Card::parse("HISTORY created by a test").unwrap();
        assert_eq!(card.value, None);
        assert_eq!(card.comment, "created by a test");
    }

    #[test]
    fn round_trip_through_bytes() {
        let mut hdr = Header::default();
        hdr.set("SIMPLE", true);
        hdr.set_with_comment("TEMP", -12.25, "sensor temperature", "degC");
        hdr.set("COUNT", 42);
        hdr.add_history("first step");
        let bytes = hdr.to_bytes().unwrap();
        assert_eq!(bytes.len(), BLOCK_LEN);

        let (parsed, len) = Header::parse(&bytes).unwrap();
        assert_eq!(len, BLOCK_LEN);
        assert_eq!(parsed.get::<f64>("TEMP").unwrap(), -12.25);
        assert_eq!(parsed.unit("TEMP"), Some("degC"));
        assert_eq!(parsed.get::<i32>("COUNT").unwrap(), 42);
        assert_eq!(parsed.history(), vec!["first step"]);
    }

    #[test]
    fn set_keeps_comment_and_unit() {
        let mut hdr = Header::default();
        hdr.set_with_comment("TEMP", 1.0, "sensor temperature", "degC");
        hdr.set("TEMP", 2.0);
        assert_eq!(hdr.get::<f64>("TEMP").unwrap(), 2.0);
        assert_eq!(hdr.unit("TEMP"), Some("degC"));
        assert_eq!(hdr.comment("TEMP"), Some("sensor temperature"));
        assert!(hdr.remove("TEMP"));
        assert!(!hdr.contains("TEMP"));
    }

    #[test]
    fn missing_and_mistyped_keywords() {
        let mut hdr = Header::default();
        hdr.set("EXTNAME", "SCI_RAW");
        hdr.set("NAME", "abc");
        let err = hdr.get::<i64>("NAXIS").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Keyword NAXIS does not exist in header of SCI_RAW"
        );
        assert!(matches!(
            hdr.get::<i64>("NAME"),
            Err(FitsError::InvalidKeyword { .. })
        ));
    }

    #[test]
    fn program_keywords() {
        let mut hdr = Header::default();
        let program = ProgramInfo {
            arch_rev: 3,
            proc_num: 7,
            ..Default::default()
        };
        hdr.set_program(&program);
        assert_eq!(hdr.get::<u16>("ARCH_REV").unwrap(), 3);
        assert_eq!(hdr.get::<u16>("PROC_NUM").unwrap(), 7);
        assert_eq!(hdr.get::<String>("PROC_CHN").unwrap(), "undefined");
        assert!(hdr.contains("DATE"));
        assert_eq!(program.data_version(), 307);

        let big = ProgramInfo {
            arch_rev: u16::MAX,
            proc_num: 1,
            ..Default::default()
        };
        assert_eq!(big.data_version(), 6_553_501);
    }

    #[test]
    fn ext_version() {
        let mut hdr = Header::default();
        hdr.set("EXTNAME", "SCI_PRW_HkDefault");
        assert!(!hdr.check_ext_version("V1", "SCI_PRW_HkDefault"));
        hdr.set("EXT_VER", "V1");
        assert!(hdr.check_ext_version("V1", "SCI_PRW_HkDefault"));
        assert!(!hdr.check_ext_version("V2", "SCI_PRW_HkDefault"));
        assert!(!hdr.check_ext_version("", "SCI_PRW_HkDefault"));
    }
}
