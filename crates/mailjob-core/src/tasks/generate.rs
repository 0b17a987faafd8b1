use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    batch_size, check_address, check_count, data_result, merged, percent, ResultCadence,
};
use crate::error::TaskError;
use crate::job::JsonMap;
use crate::registry::TaskBody;
use crate::worker::JobContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contact {
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    domain: String,
}

/// `generate-emails`: builds candidate addresses for
/// `contacts: [{ firstName, lastName?, domain }]` from common corporate
/// naming patterns.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateEmails;

impl GenerateEmails {
    fn contacts(metadata: &JsonMap) -> Result<Vec<Contact>, String> {
        let raw = metadata
            .get("contacts")
            .ok_or_else(|| "contacts is required".to_string())?;
        let contacts: Vec<Contact> = serde_json::from_value(raw.clone())
            .map_err(|e| format!("contacts is malformed: {e}"))?;
        check_count("contacts", contacts.len())?;
        for (i, c) in contacts.iter().enumerate() {
            if slug(&c.first_name).is_empty() {
                return Err(format!("contacts[{i}].firstName must contain letters or digits"));
            }
            let domain = c.domain.trim().to_ascii_lowercase();
            if check_address(&format!("x@{domain}")).is_err() {
                return Err(format!("contacts[{i}].domain is not a valid domain"));
            }
        }
        Ok(contacts)
    }
}

#[async_trait]
impl TaskBody for GenerateEmails {
    fn validate(&self, metadata: &JsonMap) -> Result<(), String> {
        batch_size(metadata)?;
        Self::contacts(metadata).map(|_| ())
    }

    async fn run(&self, metadata: JsonMap, ctx: &mut JobContext) -> Result<JsonMap, TaskError> {
        let batch = batch_size(&metadata).map_err(TaskError::Failed)?;
        let contacts = Self::contacts(&metadata).map_err(TaskError::Failed)?;
        let total = contacts.len();

        let mut data: Vec<Value> = Vec::with_capacity(total);
        let mut generated = 0usize;

        let mut cadence = ResultCadence::default();
        for chunk in contacts.chunks(batch) {
            ctx.ensure_active().await?;
            for contact in chunk {
                let emails = permutations(contact);
                generated += emails.len();
                data.push(json!({
                    "firstName": contact.first_name,
                    "lastName": contact.last_name,
                    "domain": contact.domain,
                    "emails": emails,
                }));
            }

            let processed = data.len();
            let meta = merged(
                &metadata,
                json!({
                    "totalItems": total,
                    "processed": processed,
                    "generatedCount": generated,
                }),
            );
            let progress = percent(processed, total);
            let partial = cadence.take(progress, &data);
            ctx.checkpoint(progress, Some(&meta), partial.as_ref()).await?;
        }

        let mut result = data_result(&data);
        result.insert(
            "summary".into(),
            json!({ "contacts": total, "generated": generated }),
        );
        Ok(result)
    }
}

/// Lowercase ASCII letters and digits only.
fn slug(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn permutations(contact: &Contact) -> Vec<String> {
    let first = slug(&contact.first_name);
    let last = contact.last_name.as_deref().map(slug).unwrap_or_default();
    let domain = contact.domain.trim().to_ascii_lowercase();

    let mut locals = vec![first.clone()];
    if !last.is_empty() {
        let f = &first[..1];
        let l = &last[..1];
        locals.extend([
            format!("{first}.{last}"),
            format!("{first}{last}"),
            format!("{first}_{last}"),
            format!("{f}{last}"),
            format!("{f}.{last}"),
            format!("{first}{l}"),
            format!("{first}.{l}"),
            format!("{last}.{first}"),
            format!("{last}{f}"),
            last.clone(),
        ]);
    }

    let mut seen = std::collections::HashSet::new();
    locals
        .into_iter()
        .filter(|l| seen.insert(l.clone()))
        .map(|l| format!("{l}@{domain}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(first: &str, last: Option<&str>, domain: &str) -> Contact {
        Contact {
            first_name: first.into(),
            last_name: last.map(Into::into),
            domain: domain.into(),
        }
    }

    #[test]
    fn permutations_cover_common_patterns() {
        let emails = permutations(&contact("Ada", Some("Lovelace"), "Example.com"));
        assert_eq!(emails[0], "ada@example.com");
        assert!(emails.contains(&"ada.lovelace@example.com".to_string()));
        assert!(emails.contains(&"alovelace@example.com".to_string()));
        assert!(emails.contains(&"lovelace.ada@example.com".to_string()));
        assert!(emails.iter().all(|e| check_address(e).is_ok()));
    }

    #[test]
    fn first_name_only_yields_one_candidate() {
        assert_eq!(permutations(&contact("Cher", None, "music.io")), vec!["cher@music.io"]);
    }

    #[test]
    fn validate_rejects_bad_contacts() {
        let g = GenerateEmails;
        let ok = json!({ "contacts": [{ "firstName": "Ada", "domain": "example.com" }] });
        assert!(g.validate(ok.as_object().unwrap()).is_ok());

        let bad_domain = json!({ "contacts": [{ "firstName": "Ada", "domain": "nope" }] });
        assert!(g.validate(bad_domain.as_object().unwrap()).is_err());

        let bad_name = json!({ "contacts": [{ "firstName": "--", "domain": "example.com" }] });
        assert!(g.validate(bad_name.as_object().unwrap()).is_err());

        let empty = json!({ "contacts": [] });
        assert!(g.validate(empty.as_object().unwrap()).is_err());
        assert!(g.validate(&JsonMap::new()).is_err());
    }
}
