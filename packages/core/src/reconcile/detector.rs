//! Discrepancy Detector
//!
//! Pure comparison of paired INITIAL/FINAL count observations for one
//! procedure. `classify` is the I/O-free core; `DiscrepancyDetector`
//! wraps it with a single snapshot read through the data-access port.
//!
//! Classification rules:
//! - INITIAL observation with no FINAL  → `MissingInFinal` (found = 0)
//! - FINAL observation with no INITIAL  → `ExtraInFinal`
//! - both present, quantities differ    → `QuantityMismatch`
//! - both present, quantities equal     → nothing
//!
//! When multiple observations exist for the same (instrument, phase),
//! the most recent by `recorded_at` wins, ties broken by row id.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::reconcile::error::CoreError;
use crate::reconcile::port::CountDataPort;
use crate::reconcile::types::{CountObservation, CountPhase, Discrepancy, DiscrepancyKind};

/// Classify one procedure's observation snapshot into discrepancies,
/// ordered by ascending instrument id so results are reproducible.
pub fn classify(observations: &[CountObservation]) -> Vec<Discrepancy> {
    // Latest authoritative observation per (instrument, phase).
    let mut latest: BTreeMap<(i64, CountPhase), &CountObservation> = BTreeMap::new();
    for obs in observations {
        let key = (obs.instrument_id, obs.phase);
        match latest.get(&key) {
            Some(current)
                if (current.recorded_at, current.id) >= (obs.recorded_at, obs.id) => {}
            _ => {
                latest.insert(key, obs);
            }
        }
    }

    let mut instrument_ids: Vec<i64> = latest.keys().map(|(id, _)| *id).collect();
    instrument_ids.dedup();

    let mut discrepancies = Vec::new();
    for instrument_id in instrument_ids {
        let initial = latest.get(&(instrument_id, CountPhase::Initial));
        let fin = latest.get(&(instrument_id, CountPhase::Final));

        match (initial, fin) {
            (Some(initial), None) => discrepancies.push(Discrepancy {
                instrument_id,
                kind: DiscrepancyKind::MissingInFinal,
                expected_qty: initial.counted_qty,
                found_qty: 0,
            }),
            (None, Some(fin)) => discrepancies.push(Discrepancy {
                instrument_id,
                kind: DiscrepancyKind::ExtraInFinal,
                expected_qty: 0,
                found_qty: fin.counted_qty,
            }),
            (Some(initial), Some(fin)) if initial.counted_qty != fin.counted_qty => {
                discrepancies.push(Discrepancy {
                    instrument_id,
                    kind: DiscrepancyKind::QuantityMismatch,
                    expected_qty: initial.counted_qty,
                    found_qty: fin.counted_qty,
                })
            }
            _ => {}
        }
    }

    discrepancies
}

/// Detector bound to a data-access port. Owns no persisted state.
pub struct DiscrepancyDetector {
    port: Arc<dyn CountDataPort>,
}

impl DiscrepancyDetector {
    pub fn new(port: Arc<dyn CountDataPort>) -> Self {
        Self { port }
    }

    /// Detect discrepancies for one procedure.
    ///
    /// Fails with `NotFound` on an unknown procedure and `Validation`
    /// when the procedure has no observations at all; otherwise returns
    /// the full result — never a partial one.
    pub async fn detect(&self, procedure_id: i64) -> Result<Vec<Discrepancy>, CoreError> {
        if self.port.fetch_procedure(procedure_id).await?.is_none() {
            return Err(CoreError::not_found("procedure", procedure_id));
        }

        let observations = self.port.fetch_counts(procedure_id).await?;
        if observations.is_empty() {
            return Err(CoreError::validation(format!(
                "procedure {} has no count observations",
                procedure_id
            )));
        }

        Ok(classify(&observations))
    }
}
