//! Built-in task bodies.
//!
//! Each body processes its input in fixed-size batches and checkpoints after
//! every batch with `progress = processed * 100 / total` and the running
//! counts in `metadata`. The entries produced so far go to `result_data.data`
//! only when that percentage moves, so a job makes at most 101 result writes
//! however small its batches are.

mod generate;
mod scrape;
mod verify;

use serde_json::Value;

use crate::job::JsonMap;

pub use generate::GenerateEmails;
pub use scrape::ScrapeEmails;
pub use verify::{check_address, VerifyEmails};

pub(crate) const DEFAULT_BATCH_SIZE: usize = 25;
pub(crate) const MAX_BATCH_SIZE: usize = 1000;
pub(crate) const MAX_ITEMS: usize = 100_000;

/// `batchSize` from metadata, defaulting to [`DEFAULT_BATCH_SIZE`].
pub(crate) fn batch_size(metadata: &JsonMap) -> Result<usize, String> {
    match metadata.get("batchSize") {
        None | Some(Value::Null) => Ok(DEFAULT_BATCH_SIZE),
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| "batchSize must be a positive integer".to_string())?;
            let n = usize::try_from(n).unwrap_or(usize::MAX);
            if !(1..=MAX_BATCH_SIZE).contains(&n) {
                return Err(format!("batchSize must be between 1 and {MAX_BATCH_SIZE}"));
            }
            Ok(n)
        }
    }
}

pub(crate) fn check_count(field: &str, n: usize) -> Result<(), String> {
    if !(1..=MAX_ITEMS).contains(&n) {
        return Err(format!("{field} must contain between 1 and {MAX_ITEMS} items"));
    }
    Ok(())
}

/// Array of strings under `field`. `Ok(None)` when the key is absent.
pub(crate) fn string_list(metadata: &JsonMap, field: &str) -> Result<Option<Vec<String>>, String> {
    let Some(value) = metadata.get(field) else {
        return Ok(None);
    };
    let items = value
        .as_array()
        .ok_or_else(|| format!("{field} must be an array of strings"))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| format!("{field} must be an array of strings"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

/// Input metadata with the running counters merged over it.
pub(crate) fn merged(input: &JsonMap, counters: Value) -> JsonMap {
    let mut out = input.clone();
    if let Value::Object(map) = counters {
        out.extend(map);
    }
    out
}

/// Tracks when a checkpoint should carry the accumulated result.
#[derive(Debug, Default)]
pub(crate) struct ResultCadence {
    last: Option<u8>,
}

impl ResultCadence {
    /// `data` wrapped as a result map if `progress` has moved since the last
    /// one that carried it.
    pub(crate) fn take(&mut self, progress: u8, data: &[Value]) -> Option<JsonMap> {
        if self.last.is_some_and(|last| last >= progress) {
            return None;
        }
        self.last = Some(progress);
        Some(data_result(data))
    }
}

/// `{ "data": [...] }`
pub(crate) fn data_result(data: &[Value]) -> JsonMap {
    let mut out = JsonMap::new();
    out.insert("data".into(), Value::Array(data.to_vec()));
    out
}
