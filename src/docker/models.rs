use std::collections::HashMap;

use crate::container::normalize_name;
use crate::runtime::{Action, ContainerSummary, Cursor, Event, Inspection};

/// Entry of `GET /containers/json`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ListEntry {
    pub id: String,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl From<ListEntry> for ContainerSummary {
    fn from(value: ListEntry) -> Self {
        let name = value
            .names
            .as_deref()
            .and_then(|names| names.first())
            .map(|name| normalize_name(name).to_owned())
            .unwrap_or_default();
        Self {
            id: value.id,
            name,
            image: value.image,
            labels: value.labels.unwrap_or_default(),
        }
    }
}

/// Subset of `GET /containers/{id}/json`.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InspectResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<InspectConfig>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InspectConfig {
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub image: Option<String>,
}

impl From<InspectResponse> for Inspection {
    fn from(value: InspectResponse) -> Self {
        let (env, image) = match value.config {
            Some(config) => (config.env.unwrap_or_default(), config.image),
            None => (Vec::default(), None),
        };
        Self {
            env,
            name: value
                .name
                .as_deref()
                .map(normalize_name)
                .filter(|name| !name.is_empty())
                .map(str::to_owned),
            image,
        }
    }
}

/// One message of the `GET /events` stream.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct EventMessage {
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: Actor,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "timeNano", default)]
    pub time_nano: i64,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Actor {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
}

impl From<EventMessage> for Event {
    fn from(value: EventMessage) -> Self {
        let time = if value.time_nano != 0 {
            Cursor::from_nanos(value.time_nano)
        } else {
            Cursor::from_secs(value.time)
        };
        Self {
            action: Action::from(value.action.as_str()),
            actor_id: value.actor.id,
            attributes: value.actor.attributes.unwrap_or_default(),
            time,
        }
    }
}
