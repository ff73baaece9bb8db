//! `topicrpc` Core: envelopes, topic topology, path grammar and the dispatch table.
//!
//! Everything here is pure: no broker, no runtime. The server crate builds the
//! worker runtime and gateway client on top of these types.

pub mod dispatch;
pub mod envelope;
pub mod partition;
pub mod path;
pub mod topology;
pub mod traits;

pub use dispatch::{DispatchTable, Resolution, RouteKind, RouteParams};
pub use envelope::{status, CodecError, CorrelationId, Headers, Request, RequestBuilder, Response};
pub use topology::{ServiceRegistration, TopicSpec, Topology, TopologyError};
pub use traits::{RequestHandler, Resource};
