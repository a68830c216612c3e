//! # Listeners and Listener Indices
//!
//! A listener is a live, filtered subscription registered with the
//! dispatcher. Every listener belongs to exactly one of three indices:
//! the global set, the topic-keyed map, or the originator-keyed map.
//!
//! Per-key listener sets are created lazily on first registration and
//! pruned when they become empty to bound memory.

use dashmap::DashMap;
use parking_lot::RwLock;
use shared_types::{GatewayEnvelope, OriginatorId, SequenceId, Topic};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A deserialized published record as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct PublishedEnvelope {
    /// Node that assigned the sequence position.
    pub originator_id: OriginatorId,
    /// Position in that originator's stream.
    pub sequence_id: SequenceId,
    /// Topic the payload belongs to.
    pub topic: Topic,
    /// The signed envelope, deserialized once per row on dispatch.
    pub envelope: GatewayEnvelope,
}

/// The batch type delivered on listener channels. Payloads are shared, not
/// copied, across listeners.
pub type EnvelopeBatch = Vec<Arc<PublishedEnvelope>>;

/// A subscription request, as received from the transport layer.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionQuery {
    /// Deliver only rows whose topic is in this set.
    pub topics: Vec<Topic>,
    /// Deliver only rows from these originators.
    pub originator_ids: Vec<OriginatorId>,
}

impl SubscriptionQuery {
    /// An unfiltered subscription.
    #[must_use]
    pub fn global() -> Self {
        Self::default()
    }

    /// A topic-filtered subscription.
    #[must_use]
    pub fn for_topics(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
            originator_ids: Vec::new(),
        }
    }

    /// An originator-filtered subscription.
    #[must_use]
    pub fn for_originators(originator_ids: impl IntoIterator<Item = OriginatorId>) -> Self {
        Self {
            topics: Vec::new(),
            originator_ids: originator_ids.into_iter().collect(),
        }
    }
}

/// The filter category of a listener, decided exactly once at creation.
///
/// A closed variant instead of ad hoc boolean checks: a listener can never
/// match zero or more than one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerFilter {
    /// No filter; receives every row.
    Global,
    /// Receives rows whose topic is in the set.
    Topics(HashSet<Topic>),
    /// Receives rows from originators in the set.
    Originators(HashSet<OriginatorId>),
}

impl ListenerFilter {
    /// Classifies a query by filter precedence: both sets empty is global,
    /// a non-empty topic set wins over originators.
    #[must_use]
    pub fn classify(query: &SubscriptionQuery) -> Self {
        if query.topics.is_empty() && query.originator_ids.is_empty() {
            return Self::Global;
        }
        if !query.topics.is_empty() {
            return Self::Topics(query.topics.iter().cloned().collect());
        }
        Self::Originators(query.originator_ids.iter().cloned().collect())
    }

    /// Returns true if a row with this key would be delivered.
    #[must_use]
    pub fn matches(&self, originator_id: OriginatorId, topic: &Topic) -> bool {
        match self {
            Self::Global => true,
            Self::Topics(topics) => topics.contains(topic),
            Self::Originators(originators) => originators.contains(&originator_id),
        }
    }
}

/// A registered listener.
///
/// The `closed` flag is flipped exactly once; the channel itself closes
/// when the last sender clone is dropped on index removal.
pub(crate) struct Listener {
    pub(crate) id: Uuid,
    pub(crate) filter: ListenerFilter,
    pub(crate) sender: mpsc::Sender<EnvelopeBatch>,
    closed: AtomicBool,
}

impl Listener {
    pub(crate) fn new(filter: ListenerFilter, sender: mpsc::Sender<EnvelopeBatch>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            filter,
            sender,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the listener closed; returns true for the first caller only,
    /// so eviction runs exactly once.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// A concurrent, unordered set of listeners.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: DashMap<Uuid, Arc<Listener>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<Listener>) {
        self.listeners.insert(listener.id, listener);
    }

    pub(crate) fn remove(&self, id: &Uuid) {
        self.listeners.remove(id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(&Arc<Listener>)) {
        for entry in self.listeners.iter() {
            f(entry.value());
        }
    }
}

/// A concurrent map from key to listener set.
///
/// The outer lock only serializes map bookkeeping (find-or-create against
/// prune-when-empty); it is never held for the duration of a send.
pub(crate) struct ListenersMap<K: Eq + Hash + Clone> {
    data: DashMap<K, Arc<ListenerSet>>,
    guard: RwLock<()>,
}

impl<K: Eq + Hash + Clone> Default for ListenersMap<K> {
    fn default() -> Self {
        Self {
            data: DashMap::new(),
            guard: RwLock::new(()),
        }
    }
}

impl<K: Eq + Hash + Clone> ListenersMap<K> {
    /// Adds a listener under every key, creating per-key sets lazily.
    pub(crate) fn add(&self, keys: &HashSet<K>, listener: &Arc<Listener>) {
        let _guard = self.guard.read();
        for key in keys {
            self.data
                .entry(key.clone())
                .or_default()
                .add(listener.clone());
        }
    }

    /// Removes a listener from every key, pruning sets that become empty.
    pub(crate) fn remove(&self, keys: &HashSet<K>, id: &Uuid) {
        let _guard = self.guard.write();
        for key in keys {
            let Some(set) = self.data.get(key).map(|entry| entry.value().clone()) else {
                continue;
            };
            set.remove(id);
            if set.is_empty() {
                self.data.remove_if(key, |_, set| set.is_empty());
            }
        }
    }

    /// Returns the listener set for a key, if any.
    pub(crate) fn get(&self, key: &K) -> Option<Arc<ListenerSet>> {
        // No guard needed; the map itself is not being mutated.
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Visits every `(key, set)` pair.
    pub(crate) fn for_each_key(&self, mut f: impl FnMut(&K, &Arc<ListenerSet>)) {
        for entry in self.data.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(filter: ListenerFilter) -> Arc<Listener> {
        let (sender, _receiver) = mpsc::channel(1);
        Listener::new(filter, sender)
    }

    #[test]
    fn test_classify_global() {
        let filter = ListenerFilter::classify(&SubscriptionQuery::global());
        assert_eq!(filter, ListenerFilter::Global);
    }

    #[test]
    fn test_classify_topics_wins_over_originators() {
        let query = SubscriptionQuery {
            topics: vec![Topic::from("a")],
            originator_ids: vec![1],
        };
        assert!(matches!(
            ListenerFilter::classify(&query),
            ListenerFilter::Topics(_)
        ));
    }

    #[test]
    fn test_classify_originators() {
        let query = SubscriptionQuery::for_originators([3, 4]);
        let filter = ListenerFilter::classify(&query);
        assert_eq!(
            filter,
            ListenerFilter::Originators([3, 4].into_iter().collect())
        );
    }

    #[test]
    fn test_filter_matches() {
        let topic_a = Topic::from("a");
        let topic_b = Topic::from("b");

        assert!(ListenerFilter::Global.matches(1, &topic_a));

        let by_topic = ListenerFilter::Topics([topic_a.clone()].into_iter().collect());
        assert!(by_topic.matches(1, &topic_a));
        assert!(!by_topic.matches(1, &topic_b));

        let by_originator = ListenerFilter::Originators([1].into_iter().collect());
        assert!(by_originator.matches(1, &topic_b));
        assert!(!by_originator.matches(2, &topic_b));
    }

    #[test]
    fn test_mark_closed_is_single_shot() {
        let listener = listener(ListenerFilter::Global);
        assert!(listener.mark_closed());
        assert!(!listener.mark_closed());
        assert!(listener.is_closed());
    }

    #[test]
    fn test_listeners_map_prunes_empty_sets() {
        let map: ListenersMap<Topic> = ListenersMap::default();
        let keys: HashSet<Topic> = [Topic::from("a"), Topic::from("b")].into_iter().collect();
        let subscriber = listener(ListenerFilter::Topics(keys.clone()));

        map.add(&keys, &subscriber);
        assert_eq!(map.key_count(), 2);
        assert_eq!(map.get(&Topic::from("a")).expect("set").len(), 1);

        map.remove(&keys, &subscriber.id);
        assert_eq!(map.key_count(), 0);
        assert!(map.get(&Topic::from("a")).is_none());
    }

    #[test]
    fn test_listeners_map_keeps_non_empty_sets() {
        let map: ListenersMap<Topic> = ListenersMap::default();
        let keys: HashSet<Topic> = [Topic::from("a")].into_iter().collect();
        let first = listener(ListenerFilter::Topics(keys.clone()));
        let second = listener(ListenerFilter::Topics(keys.clone()));

        map.add(&keys, &first);
        map.add(&keys, &second);
        map.remove(&keys, &first.id);

        assert_eq!(map.key_count(), 1);
        assert_eq!(map.get(&Topic::from("a")).expect("set").len(), 1);
    }
}
