//! Capabilities the registry consumes from a container runtime.
//!
//! The [`Runtime`] trait abstracts over the listing, inspection and lifecycle
//! event subscription of a container engine. [`crate::docker::DockerClient`] is
//! the production implementation; tests plug in scripted fakes.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::stream::BoxStream;

/// A container as reported by a runtime listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// Details obtained by inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inspection {
    /// Raw `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Lifecycle action carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Die,
    Kill,
    Other(String),
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value {
            "create" => Action::Create,
            "update" => Action::Update,
            "die" => Action::Die,
            "kill" => Action::Kill,
            other => Action::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Update => f.write_str("update"),
            Action::Die => f.write_str("die"),
            Action::Kill => f.write_str("kill"),
            Action::Other(other) => f.write_str(other),
        }
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub action: Action,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
    pub time: Cursor,
}

/// Point in time from which an event subscription resumes.
///
/// Stored as nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor(i64);

impl Cursor {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    pub const fn secs(&self) -> i64 {
        self.0.div_euclid(1_000_000_000)
    }

    pub const fn subsec_nanos(&self) -> i64 {
        self.0.rem_euclid(1_000_000_000)
    }
}

impl From<SystemTime> for Cursor {
    fn from(value: SystemTime) -> Self {
        let nanos = match value.duration_since(UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
        };
        Self(nanos)
    }
}

impl From<Cursor> for SystemTime {
    fn from(value: Cursor) -> Self {
        if value.0 >= 0 {
            UNIX_EPOCH + Duration::from_nanos(value.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_nanos(value.0.unsigned_abs())
        }
    }
}

/// `<secs>.<nanos>`, the format the Docker API accepts for `since`.
impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs(), self.subsec_nanos())
    }
}

pub type EventStream<E> = BoxStream<'static, Result<Event, E>>;

/// A container runtime the registry can be built from.
pub trait Runtime: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists all currently running containers.
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerSummary>, Self::Error>> + Send;

    fn inspect(&self, id: &str) -> impl Future<Output = Result<Inspection, Self::Error>> + Send;

    /// Subscribes to container lifecycle events that happened at or after `since`.
    ///
    /// Errors on the returned stream end the subscription; callers resubscribe
    /// with a newer cursor.
    fn subscribe_events(
        &self,
        since: Cursor,
    ) -> impl Future<Output = Result<EventStream<Self::Error>, Self::Error>> + Send;
}
