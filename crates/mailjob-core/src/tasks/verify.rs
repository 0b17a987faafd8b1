use async_trait::async_trait;
use serde_json::json;

use super::{
    batch_size, check_count, data_result, merged, percent, string_list, ResultCadence,
};
use crate::error::TaskError;
use crate::job::JsonMap;
use crate::registry::TaskBody;
use crate::worker::JobContext;

/// `verify-emails`: syntax-checks a list of addresses.
///
/// Input is either `emails: [string]` or `totalItems: n`, in which case `n`
/// sample addresses are generated. Each result entry is
/// `{ email, valid, reason? }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyEmails;

impl VerifyEmails {
    fn items(metadata: &JsonMap) -> Result<Vec<String>, String> {
        if let Some(emails) = string_list(metadata, "emails")? {
            check_count("emails", emails.len())?;
            return Ok(emails);
        }
        let total = metadata
            .get("totalItems")
            .ok_or_else(|| "either emails or totalItems is required".to_string())?
            .as_u64()
            .ok_or_else(|| "totalItems must be a positive integer".to_string())?;
        let total = usize::try_from(total).unwrap_or(usize::MAX);
        check_count("totalItems", total)?;
        Ok((1..=total).map(|i| format!("contact{i}@example.com")).collect())
    }
}

#[async_trait]
impl TaskBody for VerifyEmails {
    fn validate(&self, metadata: &JsonMap) -> Result<(), String> {
        batch_size(metadata)?;
        Self::items(metadata).map(|_| ())
    }

    async fn run(&self, metadata: JsonMap, ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
        let batch = batch_size(&metadata).map_err(TaskError::Failed)?;
        let items = Self::items(&metadata).map_err(TaskError::Failed)?;
        let total = items.len();

        let mut data = Vec::with_capacity(total);
        let (mut valid, mut invalid) = (0usize, 0usize);

        let mut cadence = ResultCadence::default();
        for chunk in items.chunks(batch) {
            ctx.ensure_active().await?;
            for email in chunk {
                let entry = match check_address(email) {
                    Ok(()) => {
                        valid += 1;
                        json!({ "email": email, "valid": true })
                    }
                    Err(reason) => {
                        invalid += 1;
                        json!({ "email": email, "valid": false, "reason": reason })
                    }
                };
                data.push(entry);
            }

            let processed = data.len();
            let meta = merged(
                &metadata,
                json!({
                    "totalItems": total,
                    "processed": processed,
                    "validCount": valid,
                    "invalidCount": invalid,
                }),
            );
            let progress = percent(processed, total);
            let partial = cadence.take(progress, &data);
            ctx.checkpoint(progress, Some(&meta), partial.as_ref()).await?;
        }

        let mut result = data_result(&data);
        result.insert(
            "summary".into(),
            json!({ "total": total, "valid": valid, "invalid": invalid }),
        );
        Ok(result)
    }
}

/// Syntax check for a single address. The error is a short reason.
pub fn check_address(email: &str) -> Result<(), &'static str> {
    let email = email.trim();
    if email.is_empty() {
        return Err("empty address");
    }
    if email.len() > 254 {
        return Err("address too long");
    }
    let (local, domain) = email.rsplit_once('@').ok_or("missing @")?;

    if local.is_empty() {
        return Err("missing local part");
    }
    if local.len() > 64 {
        return Err("local part too long");
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err("misplaced dot in local part");
    }
    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c));
    if !local_ok {
        return Err("invalid character in local part");
    }

    if domain.is_empty() {
        return Err("missing domain");
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain has no top-level part");
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err("invalid domain label");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("invalid domain label");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err("invalid character in domain");
        }
    }
    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("invalid top-level domain");
    }
    Ok(())
}
