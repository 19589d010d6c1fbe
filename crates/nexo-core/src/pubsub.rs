//! PubSub broker (C5): hierarchical topic bus with `+`/`#` wildcards and
//! retained messages.
//!
//! Subscriptions are stored as a flat `(connection, pattern)` list rather
//! than an exact-topics-map-plus-wildcard-trie split, because duplicate
//! registrations of the same pattern on one connection must produce
//! duplicate deliveries -- a flat list is the simplest structure that
//! preserves that without extra bookkeeping. Matching is linear per
//! publish.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use nexo_protocol::AnyValue;
use tokio::sync::RwLock;

use crate::error::PubSubError;
use crate::ids::ConnId;
use crate::snapshot::{render_any, PubSubSnapshot, TopicView, WildcardEntry, WildcardSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Plus,
    Hash,
}

/// A parsed subscription pattern. `+` matches exactly one non-empty
/// segment; `#` matches zero-or-more trailing segments and is only valid
/// as the final segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, PubSubError> {
        let parts: Vec<&str> = raw.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let seg = match *part {
                "+" => Segment::Plus,
                "#" => {
                    if i != parts.len() - 1 {
                        return Err(PubSubError::InvalidPattern(raw.to_owned()));
                    }
                    Segment::Hash
                }
                lit => Segment::Literal(lit.to_owned()),
            };
            segments.push(seg);
        }
        Ok(Pattern { raw: raw.to_owned(), segments })
    }

    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn matches(&self, topic: &str) -> bool {
        let topic_segs: Vec<&str> = topic.split('/').collect();
        Self::match_segments(&self.segments, &topic_segs)
    }

    fn match_segments(pattern: &[Segment], topic: &[&str]) -> bool {
        match pattern.first() {
            None => topic.is_empty(),
            Some(Segment::Hash) => true,
            Some(Segment::Plus) => match topic.first() {
                Some(t) if !t.is_empty() => Self::match_segments(&pattern[1..], &topic[1..]),
                _ => false,
            },
            Some(Segment::Literal(lit)) => match topic.first() {
                Some(t) if t == lit => Self::match_segments(&pattern[1..], &topic[1..]),
                _ => false,
            },
        }
    }
}

struct Subscription {
    conn_id: ConnId,
    pattern: Pattern,
}

#[derive(Default)]
pub struct PubSubBroker {
    subs: RwLock<Vec<Subscription>>,
    retained: RwLock<HashMap<String, AnyValue>>,
}

impl PubSubBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(conn_id, pattern)`. Duplicate registrations are
    /// preserved, not deduplicated, so the same connection receives one
    /// delivery per matching registration on publish. Returns the retained
    /// values that immediately match, to be delivered to the subscriber
    /// before the `OK` response.
    pub async fn subscribe(
        &self,
        conn_id: ConnId,
        pattern_str: &str,
    ) -> Result<Vec<(String, AnyValue)>, PubSubError> {
        let pattern = Pattern::parse(pattern_str)?;
        let is_exact = pattern.is_exact();
        self.subs.write().await.push(Subscription { conn_id, pattern: pattern.clone() });

        let retained = self.retained.read().await;
        let matches = if is_exact {
            retained
                .get(pattern_str)
                .map(|v| vec![(pattern_str.to_owned(), v.clone())])
                .unwrap_or_default()
        } else {
            retained
                .iter()
                .filter(|(topic, _)| pattern.matches(topic))
                .map(|(topic, value)| (topic.clone(), value.clone()))
                .collect()
        };
        Ok(matches)
    }

    /// Removes every registration matching `(conn_id, pattern_str)`
    /// exactly (there is no partial/count-limited unsubscribe in the wire
    /// protocol).
    pub async fn unsubscribe(&self, conn_id: ConnId, pattern_str: &str) {
        self.subs.write().await.retain(|s| !(s.conn_id == conn_id && s.pattern.raw == pattern_str));
    }

    /// Publishes `value` to `topic`. An empty `value` with `retain = true`
    /// deletes any existing retained value for that exact topic (the
    /// resolved "retained deletion" convention) rather than storing an
    /// empty retained entry. Returns the connections to deliver to, in
    /// registration order, with one entry per matching subscription
    /// (including duplicates for a connection registered more than once).
    pub async fn publish(&self, topic: &str, retain: bool, value: AnyValue) -> Vec<ConnId> {
        if retain {
            let mut retained = self.retained.write().await;
            if value.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_owned(), value);
            }
        }
        let subs = self.subs.read().await;
        subs.iter().filter(|s| s.pattern.matches(topic)).map(|s| s.conn_id).collect()
    }

    pub async fn on_disconnect(&self, conn_id: ConnId) {
        self.subs.write().await.retain(|s| s.conn_id != conn_id);
    }

    pub async fn snapshot(&self) -> PubSubSnapshot {
        let subs = self.subs.read().await;
        let retained = self.retained.read().await;

        let active_clients = subs.iter().map(|s| s.conn_id).collect::<HashSet<_>>().len();

        let mut exact_subscriber_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut multi_level = Vec::new();
        let mut single_level = Vec::new();
        for sub in subs.iter() {
            if sub.pattern.is_exact() {
                *exact_subscriber_counts.entry(sub.pattern.raw.clone()).or_insert(0) += 1;
            } else {
                let entry = WildcardEntry {
                    pattern: sub.pattern.raw.clone(),
                    client_id: sub.conn_id.to_string(),
                };
                if matches!(sub.pattern.segments.last(), Some(Segment::Hash)) {
                    multi_level.push(entry);
                } else {
                    single_level.push(entry);
                }
            }
        }

        let mut topic_names: BTreeSet<String> = exact_subscriber_counts.keys().cloned().collect();
        topic_names.extend(retained.keys().cloned());
        let topics = topic_names
            .into_iter()
            .map(|name| TopicView {
                subscribers: *exact_subscriber_counts.get(&name).unwrap_or(&0),
                retained_value: retained.get(&name).map(render_any),
                full_path: name,
            })
            .collect();

        PubSubSnapshot {
            active_clients,
            topics,
            wildcards: WildcardSnapshot { multi_level, single_level },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(s: &str) -> AnyValue {
        AnyValue::Raw(s.as_bytes().to_vec())
    }

    #[test]
    fn plus_matches_single_segment_only() {
        let p = Pattern::parse("home/+/temp").unwrap();
        assert!(p.matches("home/kitchen/temp"));
        assert!(!p.matches("home/kitchen/light"));
        assert!(!p.matches("home/kitchen/cupboard/temp"));
    }

    #[test]
    fn hash_matches_zero_or_more_trailing_segments() {
        let p = Pattern::parse("sensors/#").unwrap();
        assert!(p.matches("sensors/x"));
        assert!(p.matches("sensors/a/b/c"));
        assert!(p.matches("sensors"));
        assert!(!p.matches("other/sensors/x"));
    }

    #[test]
    fn hash_only_valid_as_last_segment() {
        assert!(Pattern::parse("a/#/b").is_err());
        assert!(Pattern::parse("a/#").is_ok());
    }

    #[test]
    fn exact_topic_isolation() {
        let p = Pattern::parse("a/b").unwrap();
        assert!(p.matches("a/b"));
        assert!(!p.matches("a/c"));
        assert!(!p.matches("a"));
        assert!(!p.matches("a/b/c"));
    }

    #[tokio::test]
    async fn publish_delivers_to_exact_and_wildcard_subscribers() {
        let broker = PubSubBroker::new();
        broker.subscribe(1, "a/b").await.unwrap();
        broker.subscribe(2, "a/+").await.unwrap();
        broker.subscribe(3, "x/y").await.unwrap();

        let recipients = broker.publish("a/b", false, raw("v")).await;
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains(&1));
        assert!(recipients.contains(&2));
        assert!(!recipients.contains(&3));
    }

    #[tokio::test]
    async fn duplicate_registration_yields_duplicate_delivery() {
        let broker = PubSubBroker::new();
        broker.subscribe(1, "a/b").await.unwrap();
        broker.subscribe(1, "a/b").await.unwrap();
        let recipients = broker.publish("a/b", false, raw("v")).await;
        assert_eq!(recipients, vec![1, 1]);
    }

    #[tokio::test]
    async fn retained_value_delivered_immediately_on_matching_subscribe() {
        let broker = PubSubBroker::new();
        broker.publish("config/app/db/host", true, AnyValue::String("localhost".into())).await;
        broker.publish("config/app/db/port", true, AnyValue::String("5432".into())).await;
        broker.publish("config/app/cache/ttl", true, AnyValue::String("60".into())).await;
        broker.publish("config/system/os", true, AnyValue::String("linux".into())).await;

        let retained = broker.subscribe(1, "config/app/#").await.unwrap();
        let topics: HashSet<_> = retained.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(topics.len(), 3);
        assert!(topics.contains("config/app/db/host"));
        assert!(topics.contains("config/app/db/port"));
        assert!(topics.contains("config/app/cache/ttl"));
        assert!(!topics.contains("config/system/os"));
    }

    #[tokio::test]
    async fn empty_retained_publish_deletes_retained_value() {
        let broker = PubSubBroker::new();
        broker.publish("t", true, AnyValue::Raw(vec![1])).await;
        broker.publish("t", true, AnyValue::Raw(vec![])).await;
        let retained = broker.subscribe(1, "t").await.unwrap();
        assert!(retained.is_empty());
    }

    #[tokio::test]
    async fn disconnect_removes_all_subscriptions_for_connection() {
        let broker = PubSubBroker::new();
        broker.subscribe(1, "a/b").await.unwrap();
        broker.subscribe(1, "a/b").await.unwrap();
        broker.on_disconnect(1).await;
        let recipients = broker.publish("a/b", false, raw("v")).await;
        assert!(recipients.is_empty());
    }
}
