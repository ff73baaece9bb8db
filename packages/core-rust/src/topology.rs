//! Static mapping of logical services to their request and response topics.
//!
//! A [`Topology`] is built once at startup, validated, and then shared
//! read-only (typically as `Arc<Topology>`) by the gateway client and every
//! worker runtime. There is no process-wide registry to mutate.

use std::collections::{BTreeMap, HashMap};

/// Suffix appended to a service name to form its request topic.
pub const REQUEST_TOPIC_SUFFIX: &str = "-requests";

/// Suffix appended to a service name to form its response topic.
pub const RESPONSE_TOPIC_SUFFIX: &str = "-responses";

/// Partition count used when provisioning bridge topics.
pub const DEFAULT_PARTITIONS: u32 = 1;

/// Replication factor used when provisioning bridge topics.
pub const DEFAULT_REPLICATION_FACTOR: u16 = 1;

/// The services of the standard deployment, in provisioning order.
pub const STANDARD_SERVICES: &[&str] = &[
    "patients",
    "prescriptions",
    "referrals",
    "examinations",
    "samples",
];

// ---------------------------------------------------------------------------
// TopicSpec
// ---------------------------------------------------------------------------

/// Shape of a topic to create on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
}

impl TopicSpec {
    /// A topic with the default single partition and single replica.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: DEFAULT_PARTITIONS,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistration
// ---------------------------------------------------------------------------

/// A logical service bound to exactly one request and one response topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    name: String,
    request_topic: String,
    response_topic: String,
}

impl ServiceRegistration {
    /// Registration with explicit topic names. Validated when added to a [`Topology`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            request_topic: request_topic.into(),
            response_topic: response_topic.into(),
        }
    }

    /// Registration using the `<service>-requests` / `<service>-responses` convention.
    #[must_use]
    pub fn conventional(name: &str) -> Self {
        Self::new(
            name,
            format!("{name}{REQUEST_TOPIC_SUFFIX}"),
            format!("{name}{RESPONSE_TOPIC_SUFFIX}"),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    #[must_use]
    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Consumer group used by this service's workers.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Errors detected while building a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("service {service} has an empty topic name")]
    EmptyTopic { service: String },
    #[error("service {0} is registered twice")]
    DuplicateService(String),
    #[error("service {service} uses {topic} as both request and response topic")]
    SameTopic { service: String, topic: String },
    #[error("topic {topic} is shared by services {first} and {second}")]
    SharedTopic {
        topic: String,
        first: String,
        second: String,
    },
}

/// Immutable, validated set of service registrations.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    services: BTreeMap<String, ServiceRegistration>,
}

impl Topology {
    /// Builds a topology, checking that every topic belongs to exactly one role
    /// of exactly one service.
    ///
    /// # Errors
    ///
    /// Returns a `TopologyError` describing the first violation found.
    pub fn new(
        registrations: impl IntoIterator<Item = ServiceRegistration>,
    ) -> Result<Self, TopologyError> {
        let mut services = BTreeMap::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for reg in registrations {
            if reg.name.is_empty() {
                return Err(TopologyError::EmptyServiceName);
            }
            if reg.request_topic.is_empty() || reg.response_topic.is_empty() {
                return Err(TopologyError::EmptyTopic { service: reg.name });
            }
            if reg.request_topic == reg.response_topic {
                return Err(TopologyError::SameTopic {
                    service: reg.name,
                    topic: reg.request_topic,
                });
            }
            if services.contains_key(&reg.name) {
                return Err(TopologyError::DuplicateService(reg.name));
            }
            for topic in [&reg.request_topic, &reg.response_topic] {
                if let Some(first) = owners.get(topic) {
                    return Err(TopologyError::SharedTopic {
                        topic: topic.clone(),
                        first: first.clone(),
                        second: reg.name.clone(),
                    });
                }
            }
            owners.insert(reg.request_topic.clone(), reg.name.clone());
            owners.insert(reg.response_topic.clone(), reg.name.clone());
            services.insert(reg.name.clone(), reg);
        }

        Ok(Self { services })
    }

    /// Builds a topology of conventionally named services.
    ///
    /// # Errors
    ///
    /// Returns a `TopologyError` for empty or duplicate names, or names whose
    /// conventional topics collide with another service's.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, TopologyError> {
        Self::new(names.into_iter().map(ServiceRegistration::conventional))
    }

    /// The five services of the standard deployment.
    #[must_use]
    pub fn standard() -> Self {
        let services = STANDARD_SERVICES
            .iter()
            .map(|name| ((*name).to_string(), ServiceRegistration::conventional(name)))
            .collect();
        Self { services }
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn registration(&self, service: &str) -> Option<&ServiceRegistration> {
        self.services.get(service)
    }

    /// All registrations, ordered by service name.
    pub fn services(&self) -> impl Iterator<Item = &ServiceRegistration> {
        self.services.values()
    }

    /// Every topic the bridge needs, request topic before response topic per service.
    #[must_use]
    pub fn required_topics(&self) -> Vec<String> {
        self.services
            .values()
            .flat_map(|reg| [reg.request_topic.clone(), reg.response_topic.clone()])
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
