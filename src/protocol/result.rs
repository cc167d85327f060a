//! Decoded analyzer result types
//!
//! An [`AnalyzerResult`] is built once per successful exchange from the
//! codec and mapper output and is never mutated afterwards.

use crate::mapping::{self, Flag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Test code for the only panel this integration retrieves
pub const CBC_TEST_CODE: &str = "CBC";

/// One blood-count parameter reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultComponent {
    /// Code as sent by the instrument
    pub parameter_code: String,
    /// Application vocabulary name, derived from `parameter_code`
    pub canonical_name: String,
    /// Reported value, kept as text exactly as transmitted
    pub value: String,
    /// Reported unit
    pub unit: String,
    /// Normalized abnormal flag
    pub flag: Flag,
}

impl ResultComponent {
    /// Build a component from raw instrument fields
    ///
    /// Returns `None` when the parameter code has no canonical name; such
    /// components are dropped rather than forwarded with a raw code.
    pub fn from_instrument(code: &str, value: &str, unit: &str, flag: &str) -> Option<Self> {
        let canonical = mapping::canonical_name(code)?;
        Some(ResultComponent {
            parameter_code: code.trim().to_string(),
            canonical_name: canonical.to_string(),
            value: value.trim().to_string(),
            unit: unit.trim().to_string(),
            flag: mapping::normalize_flag(flag),
        })
    }
}

/// Lifecycle state of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// All components received
    Completed,
    /// Instrument has not finished the run
    Pending,
    /// Instrument reported a run error
    Error,
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Decoded from a real analyzer reply
    Analyzer,
    /// Produced by the diagnostics generator, never from hardware
    Simulated,
}

/// Normalized result of one analyzer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerResult {
    /// Sample identifier reported by the instrument
    pub sample_id: String,
    /// Panel code, always [`CBC_TEST_CODE`] for this integration
    pub test_code: String,
    /// Components in instrument transmission order
    pub components: Vec<ResultComponent>,
    /// Result timestamp in RFC 3339, or the instrument's value verbatim if unparseable
    pub timestamp: String,
    /// Result status
    pub status: ResultStatus,
    /// Result origin
    pub source: ResultSource,
}

impl AnalyzerResult {
    /// Whether this result is a CBC panel
    pub fn is_cbc(&self) -> bool {
        self.test_code.eq_ignore_ascii_case(CBC_TEST_CODE)
    }

    /// Find a component by canonical name
    pub fn component(&self, canonical_name: &str) -> Option<&ResultComponent> {
        self.components
            .iter()
            .find(|c| c.canonical_name == canonical_name)
    }

    /// Canonical-name keyed map persisted against a lab request
    ///
    /// If a parameter appears twice, the later transmission wins.
    pub fn component_map(&self) -> ComponentMap {
        self.components
            .iter()
            .map(|c| {
                (
                    c.canonical_name.clone(),
                    ComponentValue {
                        value: c.value.clone(),
                        unit: c.unit.clone(),
                        flag: c.flag.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Stored value of one component on a lab request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentValue {
    /// Reported value
    pub value: String,
    /// Reported unit
    pub unit: String,
    /// Abnormal flag
    pub flag: Flag,
}

/// Component values keyed by canonical name
pub type ComponentMap = BTreeMap<String, ComponentValue>;
