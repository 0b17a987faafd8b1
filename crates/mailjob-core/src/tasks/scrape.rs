use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    batch_size, check_address, check_count, data_result, merged, percent, string_list,
    ResultCadence,
};
use crate::error::TaskError;
use crate::job::JsonMap;
use crate::registry::TaskBody;
use crate::worker::JobContext;

/// `scrape-emails`: extracts unique addresses from `pages: [string]`
/// (raw page text or markup). Nothing is fetched over the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeEmails;

impl ScrapeEmails {
    fn pages(metadata: &JsonMap) -> Result<Vec<String>, String> {
        let pages = string_list(metadata, "pages")?.ok_or_else(|| "pages is required".to_string())?;
        check_count("pages", pages.len())?;
        Ok(pages)
    }
}

#[async_trait]
impl TaskBody for ScrapeEmails {
    fn validate(&self, metadata: &JsonMap) -> Result<(), String> {
        batch_size(metadata)?;
        Self::pages(metadata).map(|_| ())
    }

    async fn run(&self, metadata: JsonMap, ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
        let batch = batch_size(&metadata).map_err(TaskError::Failed)?;
        let pages = Self::pages(&metadata).map_err(TaskError::Failed)?;
        let total = pages.len();

        let mut seen = HashSet::new();
        let mut data: Vec<Value> = Vec::new();
        let mut processed = 0usize;

        let mut cadence = ResultCadence::default();
        for chunk in pages.chunks(batch) {
            ctx.ensure_active().await?;
            for (offset, page) in chunk.iter().enumerate() {
                for email in extract(page) {
                    if seen.insert(email.clone()) {
                        data.push(json!({ "email": email, "page": processed + offset }));
                    }
                }
            }
            processed += chunk.len();

            let meta = merged(
                &metadata,
                json!({
                    "totalItems": total,
                    "processed": processed,
                    "foundCount": data.len(),
                }),
            );
            let progress = percent(processed, total);
            let partial = cadence.take(progress, &data);
            ctx.checkpoint(progress, Some(&meta), partial.as_ref()).await?;
        }

        let mut result = data_result(&data);
        result.insert(
            "summary".into(),
            json!({ "pages": total, "found": data.len() }),
        );
        Ok(result)
    }
}

/// Addresses found in `text`, lowercased, in order of first appearance.
pub(crate) fn extract(text: &str) -> Vec<String> {
    let is_boundary = |c: char| {
        c.is_whitespace() || "<>()[]{},;:\"'`|\\".contains(c)
    };
    let mut out = Vec::new();
    for token in text.split(is_boundary) {
        let token = token
            .trim_start_matches("mailto")
            .trim_matches(|c: char| c == '.' || c == '-' || c == '=');
        if !token.contains('@') {
            continue;
        }
        let candidate = token.to_ascii_lowercase();
        if check_address(&candidate).is_ok() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}
