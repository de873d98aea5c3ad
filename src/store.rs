use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::container::Container;

/// Snapshot of every known key, mapped to the record it resolves to.
pub type Snapshot = HashMap<String, Arc<Container>>;

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, Arc<Container>>,
    by_name: HashMap<String, Arc<Container>>,
    tombstones: HashMap<String, Instant>,
}

impl Inner {
    fn lookup(&self, key: &str) -> Option<&Arc<Container>> {
        self.by_id.get(key).or_else(|| self.by_name.get(key))
    }

    /// Drops `key` from both indexes and the tombstone set.
    fn remove_key(&mut self, key: &str) {
        self.by_id.remove(key);
        self.by_name.remove(key);
        self.tombstones.remove(key);
    }
}

/// In-memory registry of live and recently dead containers.
///
/// Every record is indexed under its ID and, if non-empty, under its name. Both
/// indexes share a single [`Arc<Container>`]. All mutations take the write lock,
/// lookups take the read lock, so writers never interleave and readers never
/// observe a half-applied update.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a container by ID or name.
    pub fn get(&self, key: &str) -> Option<Arc<Container>> {
        self.inner.read().lookup(key).cloned()
    }

    /// Installs `container` under its ID and name, replacing any previous record
    /// and clearing pending tombstones for both keys.
    pub fn upsert(&self, container: Container) {
        let container = Arc::new(container);
        let mut inner = self.inner.write();

        let id = container.id().to_owned();
        let name = container.name().to_owned();

        // A renamed container must not keep answering to its old name.
        if let Some(previous) = inner.by_id.get(&id).map(Arc::clone) {
            let old_name = previous.name();
            if !old_name.is_empty()
                && old_name != name
                && inner
                    .by_name
                    .get(old_name)
                    .is_some_and(|c| c.id() == previous.id())
            {
                inner.by_name.remove(old_name);
                inner.tombstones.remove(old_name);
            }
        }

        inner.tombstones.remove(&id);
        inner.by_id.insert(id, Arc::clone(&container));

        if !name.is_empty() {
            if let Some(other) = inner.by_name.get(&name) {
                if other.id() != container.id() {
                    log::warn!(
                        "name collision: name={}, previous_id={}, new_id={}",
                        name,
                        other.id(),
                        container.id()
                    );
                }
            }
            inner.tombstones.remove(&name);
            inner.by_name.insert(name, container);
        }
    }

    /// Marks `id` and its names as dead at `now`. The records stay resolvable
    /// until [`Store::sweep_expired`] removes them.
    ///
    /// Both `name` and the name the record is stored under are marked, so a
    /// die event without a name, or with a stale one, still ends the name key.
    /// A name is skipped when empty or when it belongs to a different
    /// container. Keys that are already tombstoned keep their original time.
    pub fn tombstone(&self, id: &str, name: &str, now: Instant) {
        let mut inner = self.inner.write();
        if !id.is_empty() {
            inner.tombstones.entry(id.to_owned()).or_insert(now);
        }

        let stored_name = inner
            .by_id
            .get(id)
            .map(|record| record.name().to_owned())
            .filter(|stored| !stored.is_empty() && stored != name);
        for name in std::iter::once(name.to_owned()).chain(stored_name) {
            if name.is_empty() {
                continue;
            }
            let owner_id = inner.by_name.get(&name).map(|owner| owner.id().to_owned());
            match owner_id {
                Some(owner_id) if owner_id != id => {
                    log::warn!(
                        "not tombstoning name owned by another container: name={}, owner_id={}, dead_id={}",
                        name,
                        owner_id,
                        id
                    );
                }
                _ => {
                    inner.tombstones.entry(name).or_insert(now);
                }
            }
        }
    }

    /// Removes every key whose tombstone is older than `grace` at `now`.
    ///
    /// A swept ID also takes any name still pointing at its record.
    /// Returns the number of keys removed.
    pub fn sweep_expired(&self, now: Instant, grace: Duration) -> usize {
        let mut inner = self.inner.write();
        let mut expired: Vec<String> = inner
            .tombstones
            .iter()
            .filter(|(_, marked)| now.saturating_duration_since(**marked) > grace)
            .map(|(key, _)| key.clone())
            .collect();

        let mut orphans = Vec::new();
        for key in &expired {
            let Some(record) = inner.by_id.get(key) else {
                continue;
            };
            let name = record.name();
            if !name.is_empty()
                && !expired.iter().any(|key| key == name)
                && inner
                    .by_name
                    .get(name)
                    .is_some_and(|owner| Arc::ptr_eq(owner, record))
            {
                orphans.push(name.to_owned());
            }
        }
        expired.extend(orphans);

        for key in &expired {
            inner.remove_key(key);
        }
        expired.len()
    }

    /// Returns an independent copy of all known keys.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        let mut out = HashMap::with_capacity(inner.by_id.len() + inner.by_name.len());
        for (key, container) in inner.by_name.iter().chain(inner.by_id.iter()) {
            out.insert(key.clone(), Arc::clone(container));
        }
        out
    }

    /// Returns `true` if `key` is pending removal.
    pub fn is_tombstoned(&self, key: &str) -> bool {
        self.inner.read().tombstones.contains_key(key)
    }

    /// Number of distinct containers indexed by ID.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(20);

    fn container(id: &str, name: &str, image: &str) -> Container {
        Container::new(id, name, image, HashMap::new(), HashMap::new())
    }

    #[test]
    fn upsert_indexes_id_and_name() {
        let store = Store::new();
        store.upsert(container("c1", "web1", "nginx"));

        assert_eq!(store.get("c1").unwrap().image(), "nginx");
        assert_eq!(store.get("web1").unwrap().id(), "c1");
        assert!(Arc::ptr_eq(
            &store.get("c1").unwrap(),
            &store.get("web1").unwrap()
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_key_is_absent() {
        let store = Store::new();
        assert!(store.get("nope").is_none());
        store.upsert(container("c1", "web1", "nginx"));
        assert!(store.get("nope").is_none());
        assert!(store.get("").is_none());
    }

    #[test]
    fn empty_name_is_not_indexed() {
        let store = Store::new();
        store.upsert(container("c1", "", "nginx"));

        assert!(store.get("c1").is_some());
        assert!(store.get("").is_none());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn tombstoned_key_resolves_until_swept() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        store.tombstone("c1", "web1", t0);

        assert!(store.is_tombstoned("c1"));
        assert!(store.is_tombstoned("web1"));
        assert_eq!(store.sweep_expired(t0 + GRACE / 2, GRACE), 0);
        assert!(store.get("c1").is_some());

        // The window is exclusive: exactly `grace` old is still kept.
        assert_eq!(store.sweep_expired(t0 + GRACE, GRACE), 0);

        assert_eq!(store.sweep_expired(t0 + GRACE + Duration::from_secs(1), GRACE), 2);
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
        assert!(!store.is_tombstoned("c1"));
        assert!(store.is_empty());
    }

    #[test]
    fn upsert_after_tombstone_resurrects() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx:1"));
        store.tombstone("c1", "web1", t0);
        store.upsert(container("c1", "web1", "nginx:2"));

        assert!(!store.is_tombstoned("c1"));
        assert!(!store.is_tombstoned("web1"));
        assert_eq!(store.sweep_expired(t0 + GRACE * 2, GRACE), 0);
        assert_eq!(store.get("web1").unwrap().image(), "nginx:2");
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = Store::new();
        store.upsert(container("c1", "web1", "nginx"));
        let once = store.snapshot();
        store.upsert(container("c1", "web1", "nginx"));
        let twice = store.snapshot();

        assert_eq!(once.len(), twice.len());
        for (key, value) in &once {
            assert_eq!(twice[key], *value);
        }
    }

    #[test]
    fn rename_drops_old_name() {
        let store = Store::new();
        store.upsert(container("c1", "old", "nginx"));
        store.upsert(container("c1", "new", "nginx"));

        assert!(store.get("old").is_none());
        assert_eq!(store.get("new").unwrap().id(), "c1");
    }

    #[test]
    fn die_does_not_tombstone_name_reused_by_other_container() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        // Same name handed to a new container before the old one died.
        store.upsert(container("c2", "web1", "nginx"));
        store.tombstone("c1", "web1", t0);

        assert!(store.is_tombstoned("c1"));
        assert!(!store.is_tombstoned("web1"));

        store.sweep_expired(t0 + GRACE * 2, GRACE);
        assert!(store.get("c1").is_none());
        assert_eq!(store.get("web1").unwrap().id(), "c2");
        assert!(store.get("c2").is_some());
    }

    #[test]
    fn die_without_name_still_ends_name_key() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        store.tombstone("c1", "", t0);

        assert!(store.is_tombstoned("web1"));
        assert_eq!(store.sweep_expired(t0 + GRACE * 3, GRACE), 2);
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn die_with_stale_name_ends_stored_name() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        store.tombstone("c1", "renamed", t0);

        assert!(store.is_tombstoned("web1"));
        store.sweep_expired(t0 + GRACE * 3, GRACE);
        assert!(store.get("c1").is_none());
        assert!(store.get("web1").is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn sweeping_id_drops_name_pointing_at_it() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        store.tombstone("c1", "", t0);
        // Only the ID is left pending, as after an ignored rename.
        store.inner.write().tombstones.remove("web1");

        assert_eq!(store.sweep_expired(t0 + GRACE * 3, GRACE), 2);
        assert!(store.get("web1").is_none());
    }

    #[test]
    fn repeated_tombstone_keeps_first_time() {
        let store = Store::new();
        let t0 = Instant::now();
        store.upsert(container("c1", "web1", "nginx"));
        store.tombstone("c1", "web1", t0);
        store.tombstone("c1", "web1", t0 + GRACE);

        assert_eq!(
            store.sweep_expired(t0 + GRACE + Duration::from_secs(1), GRACE),
            2
        );
        assert!(store.get("c1").is_none());
    }

    #[test]
    fn tombstone_for_unknown_key_is_harmless() {
        let store = Store::new();
        let t0 = Instant::now();
        store.tombstone("ghost", "", t0);

        assert!(store.get("ghost").is_none());
        assert_eq!(store.sweep_expired(t0 + GRACE * 2, GRACE), 1);
        assert!(!store.is_tombstoned("ghost"));
    }

    #[test]
    fn snapshot_is_detached() {
        let store = Store::new();
        store.upsert(container("c1", "web1", "nginx"));
        let snapshot = store.snapshot();

        store.upsert(container("c2", "web2", "redis"));
        store.upsert(container("c1", "web1", "nginx:latest"));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["c1"].image(), "nginx");
        assert!(!snapshot.contains_key("c2"));
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let store = Arc::new(Store::new());
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("c{n}-{i}");
                        store.upsert(container(&id, &format!("name-{id}"), "img"));
                        assert!(store.get(&id).is_some());
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(store.len(), 400);
        assert_eq!(store.snapshot().len(), 800);
    }
}
