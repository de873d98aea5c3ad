//! Helpers for attaching registry data to log records.
//!
//! Log records are plain JSON objects. An [`Enricher`] finds a container key
//! in the record, either in one of the configured fields or in the path of the
//! log file the record came from, resolves it through a [`ContainerLookup`]
//! and writes the container metadata under `docker.container`.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::{Map, Value};

use crate::container::{Container, is_container_id};
use crate::runtime::{Cursor, Runtime};
use crate::store::{Snapshot, Store};
use crate::watcher::Watcher;

/// Default root of Docker's JSON log files.
pub const DEFAULT_LOGS_PATH: &str = "/var/lib/docker/containers/";

const APPLOGS_PATH: &str = "/var/log/containers/applogs/";

const FILELOG_PATH: &str = "/var/log/filelog/containers/";

static APPLOGS_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*)-(.{64})\.log.(.*)").expect("valid applogs regex"));

/// Read access to a container registry.
pub trait ContainerLookup {
    fn container(&self, key: &str) -> Option<Arc<Container>>;

    fn containers(&self) -> Snapshot;
}

impl ContainerLookup for Store {
    fn container(&self, key: &str) -> Option<Arc<Container>> {
        self.get(key)
    }

    fn containers(&self) -> Snapshot {
        self.snapshot()
    }
}

impl<R: Runtime> ContainerLookup for Watcher<R> {
    fn container(&self, key: &str) -> Option<Arc<Container>> {
        Watcher::container(self, key)
    }

    fn containers(&self) -> Snapshot {
        Watcher::containers(self)
    }
}

impl<L: ContainerLookup + ?Sized> ContainerLookup for Arc<L> {
    fn container(&self, key: &str) -> Option<Arc<Container>> {
        L::container(self, key)
    }

    fn containers(&self) -> Snapshot {
        L::containers(self)
    }
}

/// Metadata attached to an enriched record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContainerMetadata {
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl From<&Container> for ContainerMetadata {
    fn from(value: &Container) -> Self {
        Self {
            id: value.id().to_owned(),
            name: value.name().to_owned(),
            image: value.image().to_owned(),
            labels: value.labels().clone(),
        }
    }
}

/// Container ID found in a log file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPathMatch {
    pub container_id: String,
    /// Path of the application log relative to the container, for
    /// `applogs` paths.
    pub file_path: Option<String>,
}

/// Extracts container IDs from log file paths.
#[derive(Debug, Clone)]
pub struct LogPathMatcher {
    logs_path: String,
}

impl Default for LogPathMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_LOGS_PATH)
    }
}

impl LogPathMatcher {
    /// Creates a matcher for Docker log files below `logs_path`.
    pub fn new(logs_path: &str) -> Self {
        let mut logs_path = logs_path.to_owned();
        if !logs_path.ends_with('/') {
            logs_path.push('/');
        }
        Self { logs_path }
    }

    /// Returns the container ID encoded in `source`, if any.
    ///
    /// Recognizes `<logs_path>/<id>/...` and
    /// `/var/log/containers/applogs/<prefix>-<id>.log.<file>`.
    pub fn container_id(&self, source: &str) -> Option<LogPathMatch> {
        if let Some(pos) = source.find(&self.logs_path) {
            let start = pos + self.logs_path.len();
            let id = source.get(start..start + crate::container::CONTAINER_ID_LEN)?;
            return is_container_id(id).then(|| LogPathMatch {
                container_id: id.to_owned(),
                file_path: None,
            });
        }

        if source.contains(APPLOGS_PATH) {
            let captures = APPLOGS_FILE.captures(source)?;
            let id = captures.get(2)?.as_str();
            if !is_container_id(id) {
                return None;
            }
            return Some(LogPathMatch {
                container_id: id.to_owned(),
                file_path: captures.get(3).map(|m| m.as_str().to_owned()),
            });
        }

        None
    }
}

/// Adds `docker.container.*` fields to JSON log records.
pub struct Enricher<L> {
    lookup: L,
    fields: Vec<String>,
    matcher: Option<LogPathMatcher>,
}

impl<L: ContainerLookup> Enricher<L> {
    /// `fields` are dotted paths checked for a container ID or name; the last
    /// one holding a string wins. With a `matcher`, an ID found in the
    /// `source` field takes precedence over all of them.
    pub fn new(lookup: L, fields: Vec<String>, matcher: Option<LogPathMatcher>) -> Self {
        Self {
            lookup,
            fields,
            matcher,
        }
    }

    /// Enriches `record` in place and returns the container it was matched to.
    ///
    /// Records without a key are left untouched. Records with a key get
    /// `time_nano` whether or not the container is known.
    pub fn enrich(&self, record: &mut Map<String, Value>) -> Option<Arc<Container>> {
        let mut key = self
            .fields
            .iter()
            .filter_map(|field| get_path(record, field).and_then(Value::as_str))
            .last()
            .map(str::to_owned);

        let source = record
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let mut file_path = None;
        if let Some(found) = source
            .as_deref()
            .and_then(|source| self.matcher.as_ref()?.container_id(source))
        {
            key = Some(found.container_id);
            file_path = found.file_path;
        }

        let key = key.filter(|key| !key.is_empty())?;
        let container = self.lookup.container(&key);
        match &container {
            Some(container) => annotate(record, container, file_path, source.as_deref()),
            None => log::debug!("Container not found: {key}"),
        }
        record.insert(
            "time_nano".to_owned(),
            Value::from(Cursor::now().as_nanos()),
        );

        container
    }
}

fn annotate(
    record: &mut Map<String, Value>,
    container: &Container,
    file_path: Option<String>,
    source: Option<&str>,
) {
    match serde_json::to_value(ContainerMetadata::from(container)) {
        Ok(value) => put_path(record, "docker.container", value),
        Err(err) => log::error!("failed to serialize container metadata: {err}"),
    }
    for (env, field) in [("CLUSTER_ID", "cluster_id"), ("USER_ID", "user_id")] {
        if let Some(value) = container.env().get(env) {
            record.insert(field.to_owned(), Value::String(value.clone()));
        }
    }
    if let Some(file_path) = file_path {
        record.insert("filepath".to_owned(), Value::String(file_path));
    }
    if let Some(source) = source.filter(|source| source.starts_with(FILELOG_PATH)) {
        if let Some(filename) = filelog_name(source) {
            record.insert("filename".to_owned(), Value::String(filename));
        }
        record.insert("stream".to_owned(), Value::String("file".to_owned()));
    }
}

/// Rebuilds the original file name of a `filelog` source.
///
/// The parent directory holds the base64-encoded directory of the file.
fn filelog_name(source: &str) -> Option<String> {
    let path = Path::new(source);
    let encoded = path.parent()?.file_name()?.to_str()?;
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|err| log::debug!("invalid filelog directory `{encoded}`: {err}"))
        .ok()?;
    let dir = String::from_utf8_lossy(&decoded);
    let file = path.file_name()?;
    Some(Path::new(dir.as_ref()).join(file).to_string_lossy().into_owned())
}

fn get_path<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut value = record.get(parts.next()?)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

/// Sets `path` to `value`, creating or replacing intermediate objects.
fn put_path(record: &mut Map<String, Value>, path: &str, value: Value) {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = record;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        let entry = current
            .entry(part.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(next) => next,
            _ => return,
        };
    }
    current.insert(leaf.to_owned(), value);
}
