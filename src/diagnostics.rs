//! Simulated CBC panels for demonstrations and tests
//!
//! Values are derived from a hash of the sample id, so the same id always
//! yields the same panel. Derived indices are computed from the primary
//! measurements rather than drawn independently:
//!
//! - differential percentages sum to exactly 100.0
//! - absolute differential counts are `WBC x percentage`
//! - HCT, HGB, MCH and PCT follow from RBC, MCV, MCHC, PLT and MPV
//!
//! Results from this module carry [`ResultSource::Simulated`] and are only
//! produced on explicit request; nothing in the hardware path calls it.

use crate::error::Result;
use crate::mapping::{self, ParameterDef};
use crate::protocol::{
    validate_sample_id, AnalyzerResult, ResultComponent, ResultSource, ResultStatus,
    CBC_TEST_CODE,
};
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// 32-bit string hash (`h = h * 31 + byte`, wrapping)
pub fn sample_hash(sample_id: &str) -> u32 {
    sample_id
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
}

/// Generate a full simulated CBC panel for `sample_id`
///
/// # Errors
///
/// - [`AnalyzerError::Validation`](crate::error::AnalyzerError::Validation) - Empty sample id
///
/// # Examples
///
/// ```
/// use bc10_analyzer::diagnostics::simulate_cbc;
/// use bc10_analyzer::protocol::ResultSource;
///
/// let a = simulate_cbc("CBC001")?;
/// let b = simulate_cbc("CBC001")?;
/// assert_eq!(a.components, b.components);
/// assert_eq!(a.source, ResultSource::Simulated);
/// # Ok::<(), bc10_analyzer::AnalyzerError>(())
/// ```
pub fn simulate_cbc(sample_id: &str) -> Result<AnalyzerResult> {
    let sample_id = validate_sample_id(sample_id)?;
    let mut rng = ChaCha8Rng::seed_from_u64(u64::from(sample_hash(sample_id)));

    // Differential in tenths of a percent so the three parts sum exactly
    let lym_pct = rng.gen_range(180u32..=420) as f64 / 10.0;
    let mid_pct = rng.gen_range(25u32..=95) as f64 / 10.0;
    let gran_tenths = 1000 - (lym_pct * 10.0).round() as u32 - (mid_pct * 10.0).round() as u32;
    let gran_pct = gran_tenths as f64 / 10.0;

    let wbc = rng.gen_range(35u32..=115) as f64 / 10.0;

    let rbc = rng.gen_range(380u32..=580) as f64 / 100.0;
    let mcv = rng.gen_range(780u32..=980) as f64 / 10.0;
    let mchc = rng.gen_range(315u32..=355) as f64 / 10.0;
    let hct = rbc * mcv / 10.0;
    let hgb = hct * mchc / 100.0;
    let mch = hgb / rbc * 10.0;
    let rdw_cv = rng.gen_range(115u32..=150) as f64 / 10.0;
    let rdw_sd = rng.gen_range(370u32..=500) as f64 / 10.0;

    let plt = rng.gen_range(140u32..=420) as f64;
    let mpv = rng.gen_range(70u32..=115) as f64 / 10.0;
    let pct = plt * mpv / 10_000.0;
    let pdw = rng.gen_range(100u32..=170) as f64 / 10.0;
    let p_lcr = rng.gen_range(150u32..=400) as f64 / 10.0;

    let panel = [
        ("WBC", wbc),
        ("LYM#", wbc * lym_pct / 100.0),
        ("MID#", wbc * mid_pct / 100.0),
        ("GRAN#", wbc * gran_pct / 100.0),
        ("LYM%", lym_pct),
        ("MID%", mid_pct),
        ("GRAN%", gran_pct),
        ("RBC", rbc),
        ("HGB", hgb),
        ("HCT", hct),
        ("MCV", mcv),
        ("MCH", mch),
        ("MCHC", mchc),
        ("RDW-CV", rdw_cv),
        ("RDW-SD", rdw_sd),
        ("PLT", plt),
        ("MPV", mpv),
        ("PDW", pdw),
        ("PCT", pct),
        ("P-LCR", p_lcr),
    ];

    let components = panel
        .iter()
        .filter_map(|&(code, value)| mapping::lookup(code).map(|def| component(def, value)))
        .collect();

    Ok(AnalyzerResult {
        sample_id: sample_id.to_string(),
        test_code: CBC_TEST_CODE.to_string(),
        components,
        timestamp: Utc::now().to_rfc3339(),
        status: ResultStatus::Completed,
        source: ResultSource::Simulated,
    })
}

fn component(def: &ParameterDef, value: f64) -> ResultComponent {
    let text = format!("{:.*}", def.precision, value);
    // Flag the printed value so the flag agrees with what the operator sees
    let printed = text.parse::<f64>().unwrap_or(value);
    ResultComponent {
        parameter_code: def.canonical.to_string(),
        canonical_name: def.canonical.to_string(),
        value: text,
        unit: def.unit.to_string(),
        flag: def.classify(printed),
    }
}
