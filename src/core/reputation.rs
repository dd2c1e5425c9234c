//! Dynamic reputation and ban store.
//!
//! One mutex guards the whole structure: an ordered map keyed by host-order
//! IPv4 plus a sequence-keyed recency index (smallest sequence = least
//! recently used). Nodes are reclaimed only by eviction; an expired ban is
//! reset in place, never deleted.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::utils::format_ipv4;

/// Per-IP reputation state.
#[derive(Debug, Clone)]
struct ReputationNode {
    score: u64,
    window_start: u64,
    ban_expiry: u64,
    lru_seq: u64,
}

/// Result of one score contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub new_score: u64,
    /// The ban was created by this contribution.
    pub newly_banned: bool,
    /// `(previous_score, previous_window_start)` when an expired window was
    /// reset and the previous score was non-zero.
    pub window_reset: Option<(u64, u64)>,
    /// The update was dropped because the store is full of banned nodes.
    pub dropped: bool,
}

struct StoreInner {
    nodes: BTreeMap<u32, ReputationNode>,
    recency: BTreeMap<u64, u32>,
    next_seq: u64,
    capacity: usize,
}

impl StoreInner {
    fn touch(&mut self, ip: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(node) = self.nodes.get_mut(&ip) {
            self.recency.remove(&node.lru_seq);
            node.lru_seq = seq;
            self.recency.insert(seq, ip);
        }
    }

    /// Evict one node from the LRU tail. Stops at the first node with a live
    /// ban; live bans are never evicted and the walk never passes them.
    fn evict_one(&mut self, now_ms: u64) -> bool {
        let tail = match self.recency.iter().next() {
            Some((&seq, &ip)) => (seq, ip),
            None => return false,
        };
        let banned = self
            .nodes
            .get(&tail.1)
            .map(|node| node.ban_expiry > now_ms)
            .unwrap_or(false);
        if banned {
            return false;
        }
        self.recency.remove(&tail.0);
        self.nodes.remove(&tail.1);
        true
    }
}

/// Process-shared reputation store.
pub struct ReputationStore {
    inner: Mutex<StoreInner>,
}

impl ReputationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                nodes: BTreeMap::new(),
                recency: BTreeMap::new(),
                next_seq: 0,
                capacity,
            }),
        }
    }

    /// Add `delta` to the IP's windowed score. Creates the node on first
    /// contribution; at capacity, tries one tail eviction and otherwise
    /// drops the update (fail-open on scoring).
    pub fn add_score(
        &self,
        ip: u32,
        delta: u64,
        now_ms: u64,
        window_ms: u64,
        threshold: u64,
        ban_ms: u64,
    ) -> ScoreOutcome {
        let mut inner = self.lock();

        if !inner.nodes.contains_key(&ip) {
            if inner.capacity > 0 && inner.nodes.len() >= inner.capacity && !inner.evict_one(now_ms)
            {
                log::warn!(
                    "reputation store full of banned nodes, dropping score for {}",
                    format_ipv4(ip)
                );
                return ScoreOutcome {
                    new_score: 0,
                    newly_banned: false,
                    window_reset: None,
                    dropped: true,
                };
            }
            inner.nodes.insert(
                ip,
                ReputationNode {
                    score: 0,
                    window_start: now_ms,
                    ban_expiry: 0,
                    lru_seq: 0,
                },
            );
        }
        inner.touch(ip);

        let node = inner.nodes.get_mut(&ip).unwrap();
        let mut window_reset = None;
        if now_ms.saturating_sub(node.window_start) >= window_ms {
            if node.score > 0 {
                window_reset = Some((node.score, node.window_start));
            }
            node.score = 0;
            node.window_start = now_ms;
        }
        node.score = node.score.saturating_add(delta);

        let already_banned = node.ban_expiry > now_ms;
        let newly_banned = !already_banned && node.score > threshold;
        if newly_banned {
            node.ban_expiry = now_ms + ban_ms;
        }

        ScoreOutcome {
            new_score: node.score,
            newly_banned,
            window_reset,
            dropped: false,
        }
    }

    /// Whether the IP is currently banned. Every lookup refreshes recency;
    /// an expired ban is reset to zero in place.
    pub fn is_banned(&self, ip: u32, now_ms: u64) -> bool {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(&ip) {
            return false;
        }
        inner.touch(ip);
        let node = inner.nodes.get_mut(&ip).unwrap();
        if node.ban_expiry == 0 {
            return false;
        }
        if node.ban_expiry > now_ms {
            true
        } else {
            node.ban_expiry = 0;
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
