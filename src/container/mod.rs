use std::collections::HashMap;

mod utils;

pub use utils::is_container_id;

/// Length of a full Docker container ID in hex characters.
pub const CONTAINER_ID_LEN: usize = 64;

/// Metadata snapshot of a single runtime container.
///
/// A `Container` is never modified after construction. The registry replaces
/// the whole record on update, so readers observe either the previous or the
/// next record in full.
///
/// # Examples
///
/// ```
/// # use std::collections::HashMap;
/// # use docker_metadata::container::Container;
/// let env = docker_metadata::container::parse_env(["PATH=/usr/bin", "broken"]);
/// let container = Container::new("abc123", "web1", "nginx", HashMap::new(), env);
/// assert_eq!(container.name(), "web1");
/// assert_eq!(container.env().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Container {
    id: String,
    name: String,
    image: String,
    labels: HashMap<String, String>,
    env: HashMap<String, String>,
}

impl Container {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: impl Into<String>,
        labels: HashMap<String, String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
            labels,
            env,
        }
    }

    /// Runtime-assigned unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable name. May be empty if the runtime did not report one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

/// Parses `KEY=VALUE` environment entries into a map.
///
/// Entries without a `=` are skipped. Only the first `=` separates key and
/// value, so `A=b=c` yields `A -> b=c`. Later duplicates win.
pub fn parse_env<I, S>(entries: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .as_ref()
                .split_once('=')
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Strips the leading `/` Docker puts in front of container names.
pub fn normalize_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}
