//! Core types shared across the AMCP agent mesh runtime.
//!
//! This crate defines the data model in front of every other crate in the
//! workspace: identifiers, the immutable event record, delivery options,
//! topic validation, agent lifecycle states, advertised capabilities, and
//! the shared error taxonomy. It contains no business logic — routing,
//! dispatch, and mobility live in the crates that depend on this one.

pub mod capability;
pub mod directory;
pub mod error;
pub mod event;
pub mod ids;
pub mod lifecycle;
pub mod topic;

pub use capability::Capability;
pub use directory::EndpointDirectory;
pub use error::{AmcpError, AmcpResult};
pub use event::{DeliveryOptions, Event, EventMetadata, Payload, Reliability};
pub use ids::{AgentId, CorrelationId, EventId};
pub use lifecycle::AgentState;
pub use topic::{Topic, TopicPattern};
