//! Canonical event envelope
//!
//! Every event passes through the normaliser before delivery. Campaign
//! progress events are extracted from any of the legacy payload shapes (a
//! nested `overall` map, a JSON string, scattered top-level keys) into the
//! canonical payload, with numeric fields integer-coerced and every field
//! dual-keyed in snake_case and camelCase for backward compatibility.
//! Unknown event types pass through with a warning log.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::sse::event::{event_types, SseEvent};

/// Version stamped on every canonical envelope
pub const ENVELOPE_VERSION: u64 = 1;

/// The versioned wrapper applied to every delivered event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEnvelope {
    /// Envelope version, currently `1`
    pub version: u64,
    /// Event type tag
    #[serde(rename = "type")]
    pub event_type: String,
    /// Canonicalised payload
    pub payload: Value,
}

/// Event types that carry the `overall` progress block
fn is_progress_shaped(event_type: &str) -> bool {
    matches!(event_type, event_types::CAMPAIGN_PROGRESS | event_types::CAMPAIGN_COMPLETED)
}

const KNOWN_TYPES: &[&str] = &[
    event_types::CAMPAIGN_PROGRESS,
    event_types::CAMPAIGN_COMPLETED,
    event_types::PHASE_STARTED,
    event_types::PHASE_PAUSED,
    event_types::PHASE_RESUMED,
    event_types::PHASE_COMPLETED,
    event_types::PHASE_FAILED,
    event_types::PHASE_AUTO_STARTED,
    event_types::DOMAIN_GENERATED,
    event_types::DOMAIN_VALIDATED,
    event_types::DOMAIN_STATUS_DELTA,
    event_types::COUNTERS_RECONCILED,
    event_types::ANALYSIS_COMPLETED,
    event_types::MODE_CHANGED,
    event_types::KEYWORD_SET_CREATED,
    event_types::KEYWORD_SET_UPDATED,
    event_types::KEYWORD_SET_DELETED,
    event_types::KEEP_ALIVE,
    event_types::ERROR,
];

/// Canonicalise one event into the versioned envelope
pub fn canonicalise(event: &SseEvent) -> CanonicalEnvelope {
    if !KNOWN_TYPES.contains(&event.event_type.as_str()) {
        warn!(event_type = %event.event_type, "unknown event type passed through");
        return CanonicalEnvelope {
            version: ENVELOPE_VERSION,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
        };
    }

    let payload = if is_progress_shaped(&event.event_type) {
        canonical_progress(event)
    } else {
        event.payload.clone()
    };

    CanonicalEnvelope { version: ENVELOPE_VERSION, event_type: event.event_type.clone(), payload }
}

/// Coerce integer, floating, and stringified numeric inputs to u64
pub fn coerce_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(i) = n.as_i64() {
                i.max(0) as u64
            } else {
                n.as_f64().map(|f| f.max(0.0).round() as u64).unwrap_or(0)
            }
        }
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f.max(0.0).round() as u64).unwrap_or(0),
        _ => 0,
    }
}

fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn pick<'a>(map: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    map.get(camel).or_else(|| map.get(snake))
}

fn canonical_progress(event: &SseEvent) -> Value {
    // A string payload may itself be JSON
    let parsed;
    let payload = match &event.payload {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &parsed
        }
        other => other,
    };
    let top = payload.as_object().cloned().unwrap_or_default();

    // Prefer a nested overall block, fall back to scattered top-level keys
    let overall_src = top
        .get("overall")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(|| top.clone());

    let status = pick(&overall_src, "status", "status")
        .and_then(Value::as_str)
        .or_else(|| top.get("status").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();
    let processed = coerce_u64(pick(&overall_src, "processed_domains", "processedDomains"));
    let total = coerce_u64(pick(&overall_src, "total_domains", "totalDomains"));
    let successful = coerce_u64(pick(&overall_src, "successful_domains", "successfulDomains"));
    let failed = coerce_u64(pick(&overall_src, "failed_domains", "failedDomains"));
    let percent = coerce_f64(pick(&overall_src, "percent_complete", "percentComplete"))
        .unwrap_or_else(|| if total > 0 { (processed as f64 / total as f64) * 100.0 } else { 0.0 });

    let current_phase = pick(&top, "current_phase", "currentPhase").cloned().unwrap_or(Value::Null);
    let message = top.get("message").cloned().unwrap_or(Value::Null);

    json!({
        "overall": {
            "status": status,
            "percentComplete": percent,
            "percent_complete": percent,
            "processedDomains": processed,
            "processed_domains": processed,
            "totalDomains": total,
            "total_domains": total,
            "successfulDomains": successful,
            "successful_domains": successful,
            "failedDomains": failed,
            "failed_domains": failed,
        },
        "currentPhase": current_phase.clone(),
        "current_phase": current_phase,
        "message": message,
        "timestamp": event.timestamp.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_overall(payload: &Value, processed: u64, total: u64) {
        let overall = &payload["overall"];
        assert_eq!(overall["processedDomains"], json!(processed));
        assert_eq!(overall["processed_domains"], json!(processed));
        assert_eq!(overall["totalDomains"], json!(total));
        assert!(overall["percentComplete"].is_number());
        assert!(overall["successfulDomains"].is_u64());
        assert!(overall["failedDomains"].is_u64());
        assert!(overall["status"].is_string());
    }

    #[test]
    fn nested_overall_is_preserved() {
        let event = SseEvent::new(
            event_types::CAMPAIGN_PROGRESS,
            json!({
                "overall": {
                    "status": "running",
                    "processedDomains": 40,
                    "totalDomains": 100,
                    "successfulDomains": 39,
                    "failedDomains": 1,
                },
                "currentPhase": "generation",
            }),
        );
        let envelope = canonicalise(&event);
        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.event_type, event_types::CAMPAIGN_PROGRESS);
        assert_overall(&envelope.payload, 40, 100);
        assert_eq!(envelope.payload["currentPhase"], json!("generation"));
        assert_eq!(envelope.payload["current_phase"], json!("generation"));
    }

    #[test]
    fn string_json_payload_is_parsed() {
        let inner = json!({
            "status": "running",
            "processed_domains": "250",
            "total_domains": 1000.0,
        });
        let event = SseEvent::new(event_types::CAMPAIGN_PROGRESS, Value::String(inner.to_string()));
        let envelope = canonicalise(&event);
        assert_overall(&envelope.payload, 250, 1000);
        assert_eq!(envelope.payload["overall"]["percentComplete"], json!(25.0));
    }

    #[test]
    fn scattered_legacy_keys_are_gathered() {
        let event = SseEvent::new(
            event_types::CAMPAIGN_COMPLETED,
            json!({
                "status": "completed",
                "processedDomains": 1000,
                "total_domains": 1000,
                "successful_domains": 990,
                "failedDomains": 10,
                "current_phase": "http_keyword_validation",
                "message": "done",
            }),
        );
        let envelope = canonicalise(&event);
        assert_overall(&envelope.payload, 1000, 1000);
        assert_eq!(envelope.payload["overall"]["status"], json!("completed"));
        assert_eq!(envelope.payload["message"], json!("done"));
    }

    #[test]
    fn missing_fields_fill_with_defaults() {
        let event = SseEvent::new(event_types::CAMPAIGN_PROGRESS, json!({}));
        let envelope = canonicalise(&event);
        assert_overall(&envelope.payload, 0, 0);
        assert_eq!(envelope.payload["overall"]["status"], json!("unknown"));
        assert_eq!(envelope.payload["overall"]["percentComplete"], json!(0.0));
    }

    #[test]
    fn unknown_types_pass_through() {
        let event = SseEvent::new("totally_new_event", json!({"a": 1}));
        let envelope = canonicalise(&event);
        assert_eq!(envelope.event_type, "totally_new_event");
        assert_eq!(envelope.payload, json!({"a": 1}));
        assert_eq!(envelope.version, 1);
    }

    #[test]
    fn numeric_coercion_covers_shapes() {
        assert_eq!(coerce_u64(Some(&json!(7))), 7);
        assert_eq!(coerce_u64(Some(&json!(7.6))), 8);
        assert_eq!(coerce_u64(Some(&json!("12"))), 12);
        assert_eq!(coerce_u64(Some(&json!(-3))), 0);
        assert_eq!(coerce_u64(Some(&json!("junk"))), 0);
        assert_eq!(coerce_u64(None), 0);
    }

    #[test]
    fn non_progress_payloads_are_untouched() {
        let event = SseEvent::new(event_types::DOMAIN_GENERATED, json!({"count": 5}));
        let envelope = canonicalise(&event);
        assert_eq!(envelope.payload, json!({"count": 5}));
    }
}
