//! Stream broker (C7): partitioned, append-only, replayable topics with
//! consumer-group coordination.
//!
//! Each partition and each consumer group carries its own
//! `tokio::sync::RwLock` so that unrelated partitions/groups never
//! contend; the outer `topics` map lock is only taken for topic creation
//! and lookup, never held across a partition or group operation.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nexo_protocol::AnyValue;
use tokio::sync::RwLock;

use crate::error::StreamError;
use crate::ids::ConnId;
use crate::snapshot::{GroupView, PartitionView, StreamSnapshot, StreamTopicView};

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionConfig {
    pub max_age_ms: u64,
    pub max_bytes: u64,
}

/// Where `S_SEEK` repositions a consumer group's cursors to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Beginning,
    End,
}

struct Record {
    seq: u64,
    timestamp: Instant,
    payload: AnyValue,
}

struct Partition {
    records: VecDeque<Record>,
    next_seq: u64,
}

impl Partition {
    fn append(&mut self, payload: AnyValue) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(Record { seq, timestamp: Instant::now(), payload });
        seq
    }

    /// Records from `from_seq` (clamped to what retention still holds),
    /// up to `max` of them, oldest first.
    fn fetch_from(&self, from_seq: u64, max: usize) -> Vec<(u64, AnyValue)> {
        let Some(front) = self.records.front() else { return Vec::new() };
        let start = from_seq.max(front.seq);
        if start >= self.next_seq {
            return Vec::new();
        }
        let index = (start - front.seq) as usize;
        self.records.iter().skip(index).take(max).map(|r| (r.seq, r.payload.clone())).collect()
    }
}

struct ConsumerGroup {
    generation: u64,
    members: BTreeSet<ConnId>,
    assignment: HashMap<ConnId, BTreeSet<u32>>,
    committed_offsets: Vec<u64>,
    read_cursors: Vec<u64>,
}

impl ConsumerGroup {
    fn new(n_partitions: u32) -> Self {
        Self {
            generation: 0,
            members: BTreeSet::new(),
            assignment: HashMap::new(),
            committed_offsets: vec![0; n_partitions as usize],
            read_cursors: vec![0; n_partitions as usize],
        }
    }
}

struct StreamTopic {
    partitions: Vec<RwLock<Partition>>,
    groups: RwLock<HashMap<String, RwLock<ConsumerGroup>>>,
    retention: RetentionConfig,
    round_robin: AtomicU64,
}

/// Recomputes the partition-to-member mapping and bumps the generation.
/// Any partition whose owner changes (including becoming unowned, or
/// gaining an owner after having none) has its read cursor rolled back to
/// the last committed offset, so the new owner re-reads from there rather
/// than from wherever the previous owner's in-flight fetch left off --
/// otherwise uncommitted records in `(committed, read_cursor]` would never
/// be redelivered after a rebalance.
fn recompute_assignment(group: &mut ConsumerGroup, n_partitions: u32) {
    let previous_owner: HashMap<u32, ConnId> = group
        .assignment
        .iter()
        .flat_map(|(conn_id, partitions)| partitions.iter().map(move |p| (*p, *conn_id)))
        .collect();

    group.generation += 1;
    group.assignment.clear();

    let members: Vec<ConnId> = group.members.iter().copied().collect();
    for p in 0..n_partitions {
        let new_owner = if members.is_empty() { None } else { Some(members[(p as usize) % members.len()]) };
        if let Some(owner) = new_owner {
            group.assignment.entry(owner).or_default().insert(p);
        }
        if previous_owner.get(&p).copied() != new_owner {
            group.read_cursors[p as usize] = group.committed_offsets[p as usize];
        }
    }
}

#[derive(Default)]
pub struct StreamBroker {
    topics: RwLock<HashMap<String, Arc<StreamTopic>>>,
}

impl StreamBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, name: String, partitions: u32, retention: RetentionConfig) -> Result<(), StreamError> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(&name) {
            return Err(StreamError::AlreadyExists(name));
        }
        let partitions =
            (0..partitions).map(|_| RwLock::new(Partition { records: VecDeque::new(), next_seq: 0 })).collect();
        topics.insert(
            name,
            Arc::new(StreamTopic {
                partitions,
                groups: RwLock::new(HashMap::new()),
                retention,
                round_robin: AtomicU64::new(0),
            }),
        );
        Ok(())
    }

    async fn get_topic(&self, name: &str) -> Result<Arc<StreamTopic>, StreamError> {
        self.topics.read().await.get(name).cloned().ok_or_else(|| StreamError::NotFound(name.to_owned()))
    }

    /// Appends to the partition selected by `hash(routing_key) mod n`, or
    /// round-robin when no routing key is given.
    pub async fn publish(&self, name: &str, routing_key: Option<&str>, payload: AnyValue) -> Result<(u32, u64), StreamError> {
        let topic = self.get_topic(name).await?;
        let n = topic.partitions.len() as u64;
        let partition_id = match routing_key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % n) as u32
            }
            None => (topic.round_robin.fetch_add(1, Ordering::Relaxed) % n) as u32,
        };
        let mut partition = topic.partitions[partition_id as usize].write().await;
        let seq = partition.append(payload);
        Ok((partition_id, seq))
    }

    pub async fn join(&self, name: &str, group_name: &str, conn_id: ConnId) -> Result<(u64, Vec<u32>), StreamError> {
        let topic = self.get_topic(name).await?;
        let n_partitions = topic.partitions.len() as u32;
        let mut groups = topic.groups.write().await;
        let group_lock = groups.entry(group_name.to_owned()).or_insert_with(|| RwLock::new(ConsumerGroup::new(n_partitions)));
        let mut group = group_lock.write().await;
        group.members.insert(conn_id);
        recompute_assignment(&mut group, n_partitions);
        let assigned = group.assignment.get(&conn_id).cloned().unwrap_or_default().into_iter().collect();
        Ok((group.generation, assigned))
    }

    pub async fn leave(&self, name: &str, group_name: &str, conn_id: ConnId) -> Result<(), StreamError> {
        let topic = self.get_topic(name).await?;
        let n_partitions = topic.partitions.len() as u32;
        let groups = topic.groups.read().await;
        let Some(group_lock) = groups.get(group_name) else { return Ok(()) };
        let mut group = group_lock.write().await;
        if group.members.remove(&conn_id) {
            recompute_assignment(&mut group, n_partitions);
        }
        Ok(())
    }

    /// Removes `conn_id` from every group on every topic, bumping the
    /// generation of each group it belonged to.
    pub async fn on_disconnect(&self, conn_id: ConnId) {
        let topics = self.topics.read().await;
        for topic in topics.values() {
            let n_partitions = topic.partitions.len() as u32;
            let groups = topic.groups.read().await;
            for group_lock in groups.values() {
                let mut group = group_lock.write().await;
                if group.members.remove(&conn_id) {
                    recompute_assignment(&mut group, n_partitions);
                }
            }
        }
    }

    /// Fetches up to `max_per_partition` unread records from each
    /// partition assigned to `conn_id` under `generation`. A stale
    /// generation yields `ERR "REBALANCE"`.
    pub async fn fetch(
        &self,
        name: &str,
        group_name: &str,
        conn_id: ConnId,
        generation: u64,
        max_per_partition: usize,
    ) -> Result<Vec<(u32, Vec<(u64, AnyValue)>)>, StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let group_lock = groups
            .get(group_name)
            .ok_or_else(|| StreamError::GroupNotFound { topic: name.to_owned(), group: group_name.to_owned() })?;
        let mut group = group_lock.write().await;
        if group.generation != generation {
            return Err(StreamError::Rebalance);
        }
        let assigned = group.assignment.get(&conn_id).cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(assigned.len());
        for p in assigned {
            let partition = topic.partitions[p as usize].read().await;
            let from = group.read_cursors[p as usize];
            let records = partition.fetch_from(from, max_per_partition);
            if let Some((last_seq, _)) = records.last() {
                group.read_cursors[p as usize] = last_seq + 1;
            }
            out.push((p, records));
        }
        Ok(out)
    }

    /// Advances the committed offset for `partition`. A stale generation
    /// yields `ERR "FENCED"`.
    pub async fn commit(
        &self,
        name: &str,
        group_name: &str,
        generation: u64,
        partition: u32,
        offset: u64,
    ) -> Result<(), StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let group_lock = groups
            .get(group_name)
            .ok_or_else(|| StreamError::GroupNotFound { topic: name.to_owned(), group: group_name.to_owned() })?;
        let mut group = group_lock.write().await;
        if group.generation != generation {
            return Err(StreamError::Fenced);
        }
        let slot = group.committed_offsets.get_mut(partition as usize).ok_or(StreamError::InvalidPartition(partition))?;
        *slot = offset.max(*slot);
        Ok(())
    }

    /// Rolls the read cursor for `partition` back to its last committed
    /// offset, making the uncommitted reads visible to the next fetch
    /// again. A stale generation yields `ERR "FENCED"`.
    pub async fn nack(&self, name: &str, group_name: &str, generation: u64, partition: u32) -> Result<(), StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let group_lock = groups
            .get(group_name)
            .ok_or_else(|| StreamError::GroupNotFound { topic: name.to_owned(), group: group_name.to_owned() })?;
        let mut group = group_lock.write().await;
        if group.generation != generation {
            return Err(StreamError::Fenced);
        }
        let committed =
            *group.committed_offsets.get(partition as usize).ok_or(StreamError::InvalidPartition(partition))?;
        group.read_cursors[partition as usize] = committed;
        Ok(())
    }

    /// Administrative repositioning of both the committed offset and the
    /// read cursor. A stale generation yields `ERR "FENCED"`.
    pub async fn seek(
        &self,
        name: &str,
        group_name: &str,
        generation: u64,
        partition: u32,
        offset: u64,
    ) -> Result<(), StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let group_lock = groups
            .get(group_name)
            .ok_or_else(|| StreamError::GroupNotFound { topic: name.to_owned(), group: group_name.to_owned() })?;
        let mut group = group_lock.write().await;
        if group.generation != generation {
            return Err(StreamError::Fenced);
        }
        let idx = partition as usize;
        if idx >= group.committed_offsets.len() {
            return Err(StreamError::InvalidPartition(partition));
        }
        group.committed_offsets[idx] = offset;
        group.read_cursors[idx] = offset;
        Ok(())
    }

    /// Group-wide seek (S_SEEK): repositions every partition's committed
    /// offset and read cursor at once. `Beginning` rewinds to 0; `End`
    /// jumps past the last record currently appended to each partition. A
    /// stale generation yields `ERR "FENCED"`.
    pub async fn seek_all(&self, name: &str, group_name: &str, generation: u64, target: SeekTarget) -> Result<(), StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let group_lock = groups
            .get(group_name)
            .ok_or_else(|| StreamError::GroupNotFound { topic: name.to_owned(), group: group_name.to_owned() })?;
        let mut group = group_lock.write().await;
        if group.generation != generation {
            return Err(StreamError::Fenced);
        }
        for (idx, partition_lock) in topic.partitions.iter().enumerate() {
            let offset = match target {
                SeekTarget::Beginning => 0,
                SeekTarget::End => partition_lock.read().await.next_seq,
            };
            group.committed_offsets[idx] = offset;
            group.read_cursors[idx] = offset;
        }
        Ok(())
    }

    /// C9 sweep: drops the oldest prefix of each partition past
    /// `max_age_ms`/`max_bytes`, never crossing the minimum committed
    /// offset across the topic's groups. Returns records dropped.
    pub async fn sweep_retention(&self, name: &str) -> Result<usize, StreamError> {
        let topic = self.get_topic(name).await?;
        let groups = topic.groups.read().await;
        let mut dropped_total = 0;
        let now = Instant::now();
        let max_age = Duration::from_millis(topic.retention.max_age_ms);

        for (idx, partition_lock) in topic.partitions.iter().enumerate() {
            let mut watermark = u64::MAX;
            for group_lock in groups.values() {
                let group = group_lock.read().await;
                if let Some(&committed) = group.committed_offsets.get(idx) {
                    watermark = watermark.min(committed);
                }
            }
            let unconstrained = groups.is_empty();

            let mut partition = partition_lock.write().await;
            let mut bytes: u64 = partition.records.iter().map(|r| r.payload.as_bytes().len() as u64).sum();
            while let Some(front) = partition.records.front() {
                let too_old = topic.retention.max_age_ms > 0 && now.duration_since(front.timestamp) >= max_age;
                let too_big = topic.retention.max_bytes > 0 && bytes > topic.retention.max_bytes;
                let safe = unconstrained || front.seq < watermark;
                if (too_old || too_big) && safe {
                    bytes -= partition.records.front().map(|r| r.payload.as_bytes().len() as u64).unwrap_or(0);
                    partition.records.pop_front();
                    dropped_total += 1;
                } else {
                    if (too_old || too_big) && !safe {
                        tracing::warn!(topic = name, partition = idx, watermark, "retention truncation stalled at consumer watermark");
                    }
                    break;
                }
            }
        }
        Ok(dropped_total)
    }

    /// Topic names, for the retention sweeper to iterate without holding
    /// the broker lock across each topic's own operations.
    pub async fn names(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> StreamSnapshot {
        let topics = self.topics.read().await;
        let mut out = Vec::with_capacity(topics.len());
        for (name, topic) in topics.iter() {
            let mut partitions = Vec::with_capacity(topic.partitions.len());
            for (idx, p_lock) in topic.partitions.iter().enumerate() {
                let p = p_lock.read().await;
                partitions.push(PartitionView { partition: idx as u32, message_count: p.records.len(), next_seq: p.next_seq });
            }
            let groups_map = topic.groups.read().await;
            let mut groups = Vec::with_capacity(groups_map.len());
            for (group_name, g_lock) in groups_map.iter() {
                let g = g_lock.read().await;
                groups.push(GroupView {
                    group: group_name.clone(),
                    generation: g.generation,
                    members: g.members.iter().map(ConnId::to_string).collect(),
                    committed_offsets: g.committed_offsets.clone(),
                });
            }
            out.push(StreamTopicView { name: name.clone(), partitions, groups });
        }
        StreamSnapshot { topics: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(n: u8) -> AnyValue {
        AnyValue::Raw(vec![n])
    }

    #[tokio::test]
    async fn publish_is_fifo_within_a_partition() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 1, RetentionConfig::default()).await.unwrap();
        broker.publish("t", None, raw(1)).await.unwrap();
        broker.publish("t", None, raw(2)).await.unwrap();
        let (gen, _) = broker.join("t", "g", 1).await.unwrap();
        let fetched = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        let (_, records) = &fetched[0];
        assert_eq!(records.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn same_routing_key_always_lands_on_same_partition() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 8, RetentionConfig::default()).await.unwrap();
        let (p1, _) = broker.publish("t", Some("device-42"), raw(1)).await.unwrap();
        let (p2, _) = broker.publish("t", Some("device-42"), raw(2)).await.unwrap();
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn fetch_does_not_redeliver_already_served_offsets() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 1, RetentionConfig::default()).await.unwrap();
        broker.publish("t", None, raw(1)).await.unwrap();
        let (gen, _) = broker.join("t", "g", 1).await.unwrap();
        let first = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        assert_eq!(first[0].1.len(), 1);
        let second = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        assert!(second[0].1.is_empty());
    }

    #[tokio::test]
    async fn nack_rolls_back_uncommitted_reads_for_redelivery() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 1, RetentionConfig::default()).await.unwrap();
        broker.publish("t", None, raw(1)).await.unwrap();
        let (gen, _) = broker.join("t", "g", 1).await.unwrap();
        broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        broker.nack("t", "g", gen, 0).await.unwrap();
        let redelivered = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        assert_eq!(redelivered[0].1.len(), 1);
    }

    #[tokio::test]
    async fn second_member_joining_rebalances_and_fences_the_first() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 2, RetentionConfig::default()).await.unwrap();
        let (gen1, _) = broker.join("t", "g", 1).await.unwrap();
        let (gen2, _) = broker.join("t", "g", 2).await.unwrap();
        assert_ne!(gen1, gen2);

        assert!(matches!(broker.fetch("t", "g", 1, gen1, 10).await, Err(StreamError::Rebalance)));
        assert!(matches!(broker.commit("t", "g", gen1, 0, 1).await, Err(StreamError::Fenced)));
    }

    #[tokio::test]
    async fn disconnect_reassigns_partitions_to_remaining_members() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 2, RetentionConfig::default()).await.unwrap();
        broker.join("t", "g", 1).await.unwrap();
        let (_, assigned_before) = broker.join("t", "g", 2).await.unwrap();
        assert_eq!(assigned_before.len(), 1);

        broker.on_disconnect(1).await;
        let (gen_after, _) = broker.join("t", "g", 2).await.unwrap();
        let fetched = broker.fetch("t", "g", 2, gen_after, 10).await.unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn rebalance_redelivers_records_fetched_but_not_committed_by_the_departed_member() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 2, RetentionConfig::default()).await.unwrap();
        broker.publish("t", Some("a"), raw(1)).await.unwrap();
        broker.publish("t", Some("a"), raw(2)).await.unwrap();

        let (gen1, assigned1) = broker.join("t", "g", 1).await.unwrap();
        let owned_partition = assigned1[0];
        // member 1 fetches both records on its partition but never commits.
        let fetched = broker.fetch("t", "g", 1, gen1, 10).await.unwrap();
        let (_, records) = fetched.iter().find(|(p, _)| *p == owned_partition).unwrap();
        assert_eq!(records.len(), 2);

        broker.on_disconnect(1).await;
        let (gen2, _) = broker.join("t", "g", 2).await.unwrap();
        let redelivered = broker.fetch("t", "g", 2, gen2, 10).await.unwrap();
        let (_, records) = redelivered.iter().find(|(p, _)| *p == owned_partition).unwrap();
        assert_eq!(records.len(), 2, "uncommitted records must be redelivered to the new owner, not skipped");
    }

    #[tokio::test]
    async fn seek_all_end_skips_every_partition_to_its_current_tail() {
        let broker = StreamBroker::new();
        broker.create("t".into(), 2, RetentionConfig::default()).await.unwrap();
        broker.publish("t", Some("a"), raw(1)).await.unwrap();
        broker.publish("t", Some("a"), raw(2)).await.unwrap();
        let (gen, _) = broker.join("t", "g", 1).await.unwrap();

        broker.seek_all("t", "g", gen, SeekTarget::End).await.unwrap();
        let fetched = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        assert!(fetched.iter().all(|(_, records)| records.is_empty()));

        broker.seek_all("t", "g", gen, SeekTarget::Beginning).await.unwrap();
        let replayed = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        let total: usize = replayed.iter().map(|(_, records)| records.len()).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn retention_never_drops_past_the_minimum_committed_offset() {
        let broker = StreamBroker::new();
        let retention = RetentionConfig { max_age_ms: 0, max_bytes: 1 };
        broker.create("t".into(), 1, retention).await.unwrap();
        broker.publish("t", None, raw(1)).await.unwrap();
        broker.publish("t", None, raw(2)).await.unwrap();
        let (gen, _) = broker.join("t", "g", 1).await.unwrap();
        // nothing committed yet: retention must not drop anything despite exceeding max_bytes.
        broker.sweep_retention("t").await.unwrap();
        let fetched = broker.fetch("t", "g", 1, gen, 10).await.unwrap();
        assert_eq!(fetched[0].1.len(), 2);
    }
}
