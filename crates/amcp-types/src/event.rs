//! The immutable event record and its accompanying delivery options.
//!
//! Payloads are a tagged union rather than an opaque blob or a dynamic map,
//! per the design note on generic payloads in a statically typed target:
//! the broker never interprets a payload, but the core still needs a shape
//! it can serialize without help from agent-specific types.

use crate::ids::{AgentId, CorrelationId, EventId};
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured event payload.
///
/// Opaque to the broker and the context; only handlers interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Payload {
    /// A string-keyed map of values, the common case for request/response
    /// bodies.
    Map(BTreeMap<String, serde_json::Value>),
    /// An ordered sequence of values.
    Sequence(Vec<serde_json::Value>),
    /// A single scalar value.
    Scalar(serde_json::Value),
    /// An opaque byte blob, for payloads the core should not parse at all.
    Bytes(Vec<u8>),
}

impl Payload {
    /// Build a `Map` payload from a single key/value pair, the common case
    /// for task dispatch parameters.
    pub fn map(entries: impl IntoIterator<Item = (String, serde_json::Value)>) -> Self {
        Self::Map(entries.into_iter().collect())
    }

    /// Read a field out of a `Map` payload, if this payload is a map and
    /// the field exists.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            Payload::Map(map) => map.get(key),
            _ => None,
        }
    }
}

/// Delivery reliability for an event or a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reliability {
    /// Delivered at most once; no redelivery on handler failure.
    BestEffort,
    /// Redelivered with backoff until acknowledged or the retry budget is
    /// exhausted, at which point it is dead-lettered.
    AtLeastOnce,
}

/// Configuration accompanying an event or a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Delivery reliability.
    pub reliability: Reliability,
    /// If true, events between the same (sender, subscription) pair are
    /// delivered in publish order.
    pub ordered: bool,
    /// Optional duration after which the broker may drop an undelivered
    /// event, in milliseconds.
    pub ttl_ms: Option<u64>,
    /// Advisory priority; higher is delivered earlier.
    pub priority: i32,
    /// If true, the subscriber must acknowledge before the broker
    /// considers delivery complete.
    pub require_ack: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            ordered: false,
            ttl_ms: None,
            priority: 0,
            require_ack: false,
        }
    }
}

impl DeliveryOptions {
    /// Delivery options for at-least-once, ordered delivery with
    /// acknowledgement required — the strictest preset, used by
    /// request/response conversations that cannot tolerate loss.
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::AtLeastOnce,
            ordered: true,
            ttl_ms: None,
            priority: 0,
            require_ack: true,
        }
    }
}

/// A mapping of string keys to string values: CloudEvents extensions,
/// tracing ids, content type, and any other event annotation.
pub type EventMetadata = BTreeMap<String, String>;

/// An immutable event record.
///
/// Equality and identity are by `id`; `topic`, `sender`, and `timestamp`
/// are fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: EventId,
    /// Dotted hierarchical topic this event was published on. Never
    /// contains wildcards — those only appear in subscription patterns.
    pub topic: Topic,
    /// The event payload.
    pub payload: Payload,
    /// The agent that produced this event, or `None` for system-injected
    /// events.
    pub sender: Option<AgentId>,
    /// Wall-clock time at construction.
    pub timestamp: DateTime<Utc>,
    /// Links this event to a request/response conversation.
    pub correlation_id: Option<CorrelationId>,
    /// CloudEvents extensions, tracing ids, content type, and other
    /// annotations.
    pub metadata: EventMetadata,
    /// Delivery configuration for this specific event.
    pub delivery_options: DeliveryOptions,
}

impl Event {
    /// Construct a new event with default delivery options and no
    /// metadata.
    pub fn new(topic: Topic, payload: Payload, sender: Option<AgentId>) -> Self {
        Self {
            id: EventId::new(),
            topic,
            payload,
            sender,
            timestamp: Utc::now(),
            correlation_id: None,
            metadata: EventMetadata::new(),
            delivery_options: DeliveryOptions::default(),
        }
    }

    /// Attach a correlation id, consuming and returning `self`.
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Override delivery options, consuming and returning `self`.
    pub fn with_delivery_options(mut self, options: DeliveryOptions) -> Self {
        self.delivery_options = options;
        self
    }

    /// Insert a metadata entry, consuming and returning `self`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Project this event to its CloudEvents 1.0 representation.
    ///
    /// A pure function independent of transport: any crate that needs to
    /// cross a context boundary, or hand an event to an external
    /// observer, calls this rather than serializing `Event` directly.
    pub fn to_cloud_event(&self) -> CloudEvent {
        let source = match &self.sender {
            Some(agent_id) => format!("urn:amcp:agent:{agent_id}"),
            None => "urn:amcp:system".to_string(),
        };
        let event_type = format!(
            "io.amcp.{}",
            self.topic.segments().collect::<Vec<_>>().join(".")
        );
        let datacontenttype = self
            .metadata
            .get("datacontenttype")
            .cloned()
            .unwrap_or_else(|| "application/json".to_string());
        let mut extensions = BTreeMap::new();
        for (key, value) in &self.metadata {
            if key.starts_with("amcp") {
                extensions.insert(key.clone(), value.clone());
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            extensions.insert("amcpcorrelationid".to_string(), correlation_id.to_string());
        }
        CloudEvent {
            specversion: "1.0",
            id: self.id.to_string(),
            source,
            event_type,
            time: self.timestamp.to_rfc3339(),
            datacontenttype,
            data: serde_json::to_value(&self.payload).unwrap_or(serde_json::Value::Null),
            extensions,
        }
    }
}

/// CloudEvents 1.0 projection of an [`Event`].
///
/// Produced only at context boundaries; the core never consumes this
/// shape internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudEvent {
    /// Always `"1.0"`.
    pub specversion: &'static str,
    /// The source event's id.
    pub id: String,
    /// URI derived from the sender AgentID or the context id.
    pub source: String,
    /// The event's topic, rewritten to reverse-DNS form.
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC 3339 timestamp.
    pub time: String,
    /// Content type of `data`.
    pub datacontenttype: String,
    /// The projected payload.
    pub data: serde_json::Value,
    /// `amcptraceid`, `amcpspanid`, `amcpcorrelationid`, and any other
    /// metadata entry with an `amcp` prefix.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }

    #[test]
    fn new_event_has_default_options_and_no_correlation() {
        let event = Event::new(topic("task.request.weather"), Payload::Scalar(1.into()), None);
        assert!(event.correlation_id.is_none());
        assert_eq!(event.delivery_options.reliability, Reliability::BestEffort);
    }

    #[test]
    fn cloud_event_type_is_reverse_dns() {
        let event = Event::new(topic("task.request.weather"), Payload::Scalar(1.into()), None);
        let projected = event.to_cloud_event();
        assert_eq!(projected.event_type, "io.amcp.task.request.weather");
        assert_eq!(projected.specversion, "1.0");
    }

    #[test]
    fn cloud_event_carries_correlation_extension() {
        let event = Event::new(topic("orchestration.response.c1"), Payload::Scalar(1.into()), None)
            .with_correlation(CorrelationId::from("c1"));
        let projected = event.to_cloud_event();
        assert_eq!(
            projected.extensions.get("amcpcorrelationid"),
            Some(&"c1".to_string())
        );
    }

    #[test]
    fn sender_none_projects_to_system_source() {
        let event = Event::new(topic("system.health"), Payload::Scalar(true.into()), None);
        assert_eq!(event.to_cloud_event().source, "urn:amcp:system");
    }

    #[test]
    fn payload_map_get_reads_field() {
        let payload = Payload::map([("location".to_string(), serde_json::json!("Nice,FR"))]);
        assert_eq!(payload.get("location").unwrap(), "Nice,FR");
    }

    #[test]
    fn event_serialization_round_trips() {
        let event = Event::new(
            topic("task.request.weather"),
            Payload::map([("location".to_string(), serde_json::json!("Nice,FR"))]),
            Some(AgentId::new("weather-agent")),
        );
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, event.id);
        assert_eq!(deserialized.topic, event.topic);
    }
}
