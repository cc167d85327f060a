//! Instrument parameter vocabulary
//!
//! Translates BC-10 parameter codes into the application's canonical
//! component names and abnormal-flag vocabulary. Lookup is case-insensitive
//! and partial: codes outside the table have no canonical name and are
//! dropped by the codec instead of being forwarded with their raw code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Definition of one blood-count parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDef {
    /// Canonical name used by the rest of the system for display and storage
    pub canonical: &'static str,
    /// Unit the BC-10 reports this parameter in
    pub unit: &'static str,
    /// Lower bound of the adult reference interval
    pub low: f64,
    /// Upper bound of the adult reference interval
    pub high: f64,
    /// Decimal places the instrument prints
    pub precision: usize,
}

impl ParameterDef {
    const fn new(
        canonical: &'static str,
        unit: &'static str,
        low: f64,
        high: f64,
        precision: usize,
    ) -> Self {
        Self {
            canonical,
            unit,
            low,
            high,
            precision,
        }
    }

    /// Reference interval rendered as `low-high`
    pub fn reference_range(&self) -> String {
        format!(
            "{:.p$}-{:.p$}",
            self.low,
            self.high,
            p = self.precision
        )
    }

    /// Flag a numeric reading against the reference interval
    pub fn classify(&self, value: f64) -> Flag {
        if value > self.high {
            Flag::High
        } else if value < self.low {
            Flag::Low
        } else {
            Flag::Normal
        }
    }
}

/// Canonical parameter table, in the order the BC-10 transmits a CBC panel
pub const PARAMETERS: &[ParameterDef] = &[
    ParameterDef::new("WBC", "10^9/L", 4.0, 10.0, 1),
    ParameterDef::new("LYM#", "10^9/L", 0.8, 4.0, 1),
    ParameterDef::new("MID#", "10^9/L", 0.1, 0.9, 1),
    ParameterDef::new("GRAN#", "10^9/L", 2.0, 7.0, 1),
    ParameterDef::new("LYM%", "%", 20.0, 40.0, 1),
    ParameterDef::new("MID%", "%", 3.0, 9.0, 1),
    ParameterDef::new("GRAN%", "%", 50.0, 70.0, 1),
    ParameterDef::new("RBC", "10^12/L", 3.5, 5.5, 2),
    ParameterDef::new("HGB", "g/dL", 11.0, 16.0, 1),
    ParameterDef::new("HCT", "%", 37.0, 54.0, 1),
    ParameterDef::new("MCV", "fL", 80.0, 100.0, 1),
    ParameterDef::new("MCH", "pg", 27.0, 34.0, 1),
    ParameterDef::new("MCHC", "g/dL", 32.0, 36.0, 1),
    ParameterDef::new("RDW-CV", "%", 11.0, 16.0, 1),
    ParameterDef::new("RDW-SD", "fL", 35.0, 56.0, 1),
    ParameterDef::new("PLT", "10^9/L", 100.0, 300.0, 0),
    ParameterDef::new("MPV", "fL", 6.5, 12.0, 1),
    ParameterDef::new("PDW", "", 9.0, 17.0, 1),
    ParameterDef::new("PCT", "%", 0.108, 0.282, 3),
    ParameterDef::new("P-LCR", "%", 11.0, 45.0, 1),
];

/// Instrument codes that differ from their canonical name
///
/// Older BC-10 firmware and some relay harnesses use these spellings.
pub const ALIASES: &[(&str, &str)] = &[
    ("LYMPH#", "LYM#"),
    ("LYMPH%", "LYM%"),
    ("GRA#", "GRAN#"),
    ("GRA%", "GRAN%"),
    ("HB", "HGB"),
    ("RDW", "RDW-CV"),
];

/// Look up the parameter definition for an instrument code
pub fn lookup(code: &str) -> Option<&'static ParameterDef> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }

    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(code))
        .map(|(_, canonical)| *canonical)
        .unwrap_or(code);

    PARAMETERS
        .iter()
        .find(|def| def.canonical.eq_ignore_ascii_case(canonical))
}

/// Canonical name for an instrument code, or `None` if the code is unmapped
///
/// # Examples
///
/// ```
/// use bc10_analyzer::mapping::canonical_name;
///
/// assert_eq!(canonical_name("wbc"), Some("WBC"));
/// assert_eq!(canonical_name("LYMPH%"), Some("LYM%"));
/// assert_eq!(canonical_name("XYZ"), None);
/// ```
pub fn canonical_name(code: &str) -> Option<&'static str> {
    lookup(code).map(|def| def.canonical)
}

/// Clinical abnormal flag attached to a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Flag {
    /// Above the reference interval (`H`)
    High,
    /// Below the reference interval (`L`)
    Low,
    /// Within the reference interval (`N` or empty)
    Normal,
    /// Analyzer-specific flag the application does not enumerate, kept verbatim
    Unknown(String),
}

impl Flag {
    /// Wire code for this flag
    pub fn code(&self) -> &str {
        match self {
            Flag::High => "H",
            Flag::Low => "L",
            Flag::Normal => "N",
            Flag::Unknown(raw) => raw,
        }
    }

    /// Whether the flag marks the value as outside the reference interval
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Flag::Normal)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::High => write!(f, "High"),
            Flag::Low => write!(f, "Low"),
            Flag::Normal => write!(f, "Normal"),
            Flag::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<String> for Flag {
    fn from(raw: String) -> Self {
        normalize_flag(&raw)
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> Self {
        flag.code().to_string()
    }
}

/// Normalize an instrument abnormal-flag field
///
/// `H` maps to High, `L` to Low, `N` or empty to Normal. Anything else is
/// passed through as [`Flag::Unknown`] with the trimmed raw text.
///
/// # Examples
///
/// ```
/// use bc10_analyzer::mapping::{normalize_flag, Flag};
///
/// assert_eq!(normalize_flag("H"), Flag::High);
/// assert_eq!(normalize_flag(""), Flag::Normal);
/// assert_eq!(normalize_flag("HH"), Flag::Unknown("HH".to_string()));
/// ```
pub fn normalize_flag(raw: &str) -> Flag {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("N") {
        Flag::Normal
    } else if raw.eq_ignore_ascii_case("H") {
        Flag::High
    } else if raw.eq_ignore_ascii_case("L") {
        Flag::Low
    } else {
        Flag::Unknown(raw.to_string())
    }
}
