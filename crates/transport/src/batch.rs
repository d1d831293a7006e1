//! JSON batch envelope.
//!
//! All operations of one submission share a single atomicity group, so the
//! service applies them all or none. Request ids are the 1-based submission
//! positions; responses are matched back to operations by id.

use domain::{BatchFailure, BatchOperation, ClientError, ServerError, Value};
use serde::Deserialize;
use serde_json::json;

const ATOMICITY_GROUP: &str = "changeset";

pub(crate) fn encode(operations: &[BatchOperation]) -> serde_json::Value {
    let requests: Vec<serde_json::Value> = operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            let mut request = json!({
                "id": (index + 1).to_string(),
                "atomicityGroup": ATOMICITY_GROUP,
                "method": operation.method().as_str(),
                "url": operation.relative_url(),
            });
            if let Some(body) = operation.body() {
                request["headers"] = json!({ "content-type": "application/json" });
                request["body"] = body.clone();
            }
            request
        })
        .collect();
    json!({ "requests": requests })
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    responses: Vec<ResponseItem>,
}

#[derive(Deserialize)]
struct ResponseItem {
    id: String,
    status: u16,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

/// Decodes a batch response into one result per submitted operation.
///
/// Any rejected sub-request turns the whole batch into
/// [`ClientError::Batch`] listing every rejection. Every response id must name
/// exactly one submitted operation, and every operation needs a response.
pub(crate) fn decode(body: &str, submitted: usize) -> Result<Vec<Value>, ClientError> {
    let envelope: ResponseEnvelope =
        serde_json::from_str(body).map_err(|e| ClientError::Decode {
            message: format!("invalid batch response: {e}"),
        })?;

    let mut slots: Vec<Option<ResponseItem>> = (0..submitted).map(|_| None).collect();
    for item in envelope.responses {
        let index = item
            .id
            .parse::<usize>()
            .ok()
            .and_then(|id| id.checked_sub(1))
            .filter(|index| *index < submitted)
            .ok_or_else(|| ClientError::Decode {
                message: format!(
                    "batch response id '{}' matches none of {submitted} operation(s)",
                    item.id
                ),
            })?;
        if slots[index].is_some() {
            return Err(ClientError::Decode {
                message: format!("batch response id '{}' appears more than once", item.id),
            });
        }
        slots[index] = Some(item);
    }

    let failures: Vec<BatchFailure> = slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.as_ref().map(|item| (index, item)))
        .filter(|(_, item)| !(200..300).contains(&item.status))
        .map(|(index, item)| BatchFailure {
            index,
            status: item.status,
            error: item
                .body
                .as_ref()
                .and_then(|body| ServerError::from_body(&body.to_string())),
        })
        .collect();
    if !failures.is_empty() {
        return Err(ClientError::Batch { failures });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Some(item) => Ok(item.body.map(Value::from).unwrap_or_default()),
            None => Err(ClientError::Decode {
                message: format!("batch response has no result for operation {}", index + 1),
            }),
        })
        .collect()
}
