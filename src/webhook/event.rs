use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::gateway::from_minor_units;

use super::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SourceChargeable,
    PaymentPaid,
    PaymentFailed,
    Other,
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "source.chargeable" => EventKind::SourceChargeable,
            "payment.paid" => EventKind::PaymentPaid,
            "payment.failed" => EventKind::PaymentFailed,
            _ => EventKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SourceChargeable => "source.chargeable",
            EventKind::PaymentPaid => "payment.paid",
            EventKind::PaymentFailed => "payment.failed",
            EventKind::Other => "other",
        }
    }
}

/// A gateway callback flattened to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: EventKind,
    /// Id of the source or charge the event is about.
    pub resource_id: Option<String>,
    /// Source a charge was created from, when the resource embeds it.
    pub source_id: Option<String>,
    pub amount: Option<Decimal>,
    pub payment_ref: Option<Ulid>,
    pub reservation_ref: Option<Ulid>,
    pub failure_message: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    data: EventObject,
}

#[derive(Deserialize)]
struct EventObject {
    #[serde(default)]
    id: Option<String>,
    attributes: EventAttributes,
}

#[derive(Deserialize)]
struct EventAttributes {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Resource>,
}

#[derive(Deserialize)]
struct Resource {
    id: Option<String>,
    #[serde(default)]
    attributes: ResourceAttributes,
}

#[derive(Deserialize, Default)]
struct ResourceAttributes {
    amount: Option<i64>,
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    source: Option<SourceRef>,
    failed_message: Option<String>,
}

#[derive(Deserialize, Default)]
struct Metadata {
    payment_id: Option<String>,
    reservation_id: Option<String>,
}

#[derive(Deserialize)]
struct SourceRef {
    id: Option<String>,
}

fn parse_ref(value: Option<String>) -> Option<Ulid> {
    value.and_then(|s| s.parse().ok())
}

/// Parse a raw webhook body. The event id comes from `data.id`, falling back
/// to a top-level `id`.
pub fn parse_event(body: &[u8]) -> Result<GatewayEvent, ReconcileError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| ReconcileError::Malformed(e.to_string()))?;
    let id = envelope
        .data
        .id
        .or(envelope.id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ReconcileError::Malformed("event id missing".into()))?;

    let attrs = envelope.data.attributes;
    let (resource_id, resource) = match attrs.data {
        Some(r) => (r.id, r.attributes),
        None => (None, ResourceAttributes::default()),
    };
    let metadata = resource.metadata.unwrap_or_default();

    Ok(GatewayEvent {
        id,
        kind: EventKind::parse(&attrs.kind),
        resource_id,
        source_id: resource.source.and_then(|s| s.id),
        amount: resource.amount.map(from_minor_units),
        payment_ref: parse_ref(metadata.payment_id),
        reservation_ref: parse_ref(metadata.reservation_id),
        failure_message: resource.failed_message,
    })
}
