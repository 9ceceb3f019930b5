//! Run identifier generation.
use anyhow::{Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed literal prefix for every run identifier.
pub const RUN_ID_PREFIX: &str = "run_";

/// Generate a run identifier from the current wall clock.
///
/// The identifier is `run_` followed by the zero-padded UTC epoch time in
/// microseconds, so identifiers sort lexically in creation order and are safe
/// to use as directory names. Two calls within the same microsecond tick can
/// collide; that risk is accepted here, not mitigated.
pub fn generate_run_id() -> Result<String> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute run timestamp")?
        .as_micros();
    Ok(format!("{RUN_ID_PREFIX}{micros:020}"))
}
