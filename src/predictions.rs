//! Packaging of candidate patches into predictions.
use crate::datapoint::TaskRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// A candidate patch bound to a task identifier and a model label. This is
/// the unit the executor resolves per task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub instance_id: String,
    pub model_name: String,
    pub patch: String,
}

/// Package one prediction per task, keyed by instance id.
///
/// Pure and idempotent: the same records and label always produce the same
/// mapping.
pub fn package_predictions(
    dataset: &[TaskRecord],
    model_name: &str,
) -> BTreeMap<String, Prediction> {
    dataset
        .iter()
        .map(|record| {
            (
                record.instance_id.clone(),
                Prediction {
                    instance_id: record.instance_id.clone(),
                    model_name: model_name.to_string(),
                    patch: record.patch.clone(),
                },
            )
        })
        .collect()
}
