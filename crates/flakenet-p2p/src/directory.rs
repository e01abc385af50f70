//! Tiered peer directory.
//!
//! Three keyed collections -- anchor, white, gray -- keyed by the string
//! form of the peer address. White never leaks into gray; gray merges
//! keep whichever sighting is fresher. A single coarse mutex guards all
//! three maps and is never held across a network call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::filter::is_routable;
use crate::messages::{AnchorPeerListEntry, NodeAddress, PeerListEntry};

/// Tier capacity limits. The white and gray tiers evict their stalest
/// entry (smallest last-seen) rather than reject fresh gossip when full.
pub const WHITE_CAPACITY: usize = 1000;
pub const GRAY_CAPACITY: usize = 5000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// An entry claimed to be seen after the remote's own clock; the
    /// whole batch is treated as malformed.
    #[error("peer list entry from the future: remote time {remote_time}, last seen {last_seen}")]
    FutureDated { remote_time: i64, last_seen: i64 },
}

#[derive(Default)]
struct Tiers {
    anchor: HashMap<String, AnchorPeerListEntry>,
    white: HashMap<String, PeerListEntry>,
    gray: HashMap<String, PeerListEntry>,
}

/// Concurrency-safe store of the three peer tiers.
#[derive(Default)]
pub struct PeerDirectory {
    tiers: Mutex<Tiers>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a gossiped peer list into the gray tier.
    ///
    /// Every timestamp is shifted by `local_now - remote_local_time` to
    /// cancel clock skew. A batch containing any entry last seen after
    /// the remote's own declared time is rejected unchanged. Returns the
    /// number of entries inserted or refreshed; skipped entries do not
    /// count.
    pub fn merge(
        &self,
        peers: &[PeerListEntry],
        remote_local_time: i64,
    ) -> Result<usize, MergeError> {
        for peer in peers {
            if peer.last_seen > remote_local_time {
                return Err(MergeError::FutureDated {
                    remote_time: remote_local_time,
                    last_seen: peer.last_seen,
                });
            }
        }
        let delta = unix_now() - remote_local_time;

        let mut tiers = self.tiers.lock().expect("directory lock");
        let mut admitted = 0;
        for peer in peers {
            let mut entry = *peer;
            entry.last_seen = entry.last_seen.saturating_add(delta);
            let key = entry.address.to_string();

            if !is_routable(entry.address.ipv4()) {
                debug!(peer = %key, "unroutable address skipped");
                continue;
            }
            if tiers.white.contains_key(&key) {
                continue;
            }
            match tiers.gray.get_mut(&key) {
                Some(existing) => {
                    // A stale resighting changes nothing and counts for
                    // nothing.
                    if existing.last_seen < entry.last_seen {
                        *existing = entry;
                        admitted += 1;
                    }
                }
                None => {
                    if tiers.gray.len() >= GRAY_CAPACITY {
                        evict_stalest(&mut tiers.gray, |e| e.last_seen);
                    }
                    tiers.gray.insert(key, entry);
                    admitted += 1;
                }
            }
        }
        Ok(admitted)
    }

    /// Move an address into the white tier after a verified handshake,
    /// stamped with the local clock. Removes any gray-tier duplicate.
    pub fn promote_white(&self, address: NodeAddress, id: u64) {
        let key = address.to_string();
        let mut tiers = self.tiers.lock().expect("directory lock");
        tiers.gray.remove(&key);
        if !tiers.white.contains_key(&key) && tiers.white.len() >= WHITE_CAPACITY {
            evict_stalest(&mut tiers.white, |e| e.last_seen);
        }
        tiers.white.insert(
            key,
            PeerListEntry {
                address,
                id,
                last_seen: unix_now(),
            },
        );
    }

    /// Pin an address in the anchor tier; first-seen is recorded once.
    pub fn add_anchor(&self, address: NodeAddress, id: u64) {
        let key = address.to_string();
        let mut tiers = self.tiers.lock().expect("directory lock");
        tiers.anchor.entry(key).or_insert(AnchorPeerListEntry {
            address,
            id,
            first_seen: unix_now(),
        });
    }

    pub fn sample_white(&self) -> Option<PeerListEntry> {
        sample(&self.tiers.lock().expect("directory lock").white)
    }

    pub fn sample_gray(&self) -> Option<PeerListEntry> {
        sample(&self.tiers.lock().expect("directory lock").gray)
    }

    pub fn sample_anchor(&self) -> Option<AnchorPeerListEntry> {
        sample(&self.tiers.lock().expect("directory lock").anchor)
    }

    pub fn white_count(&self) -> usize {
        self.tiers.lock().expect("directory lock").white.len()
    }

    pub fn gray_count(&self) -> usize {
        self.tiers.lock().expect("directory lock").gray.len()
    }

    pub fn anchor_count(&self) -> usize {
        self.tiers.lock().expect("directory lock").anchor.len()
    }
}

/// Uniform draw over current members; map iteration order is not a
/// substitute for randomness.
fn sample<T: Copy>(map: &HashMap<String, T>) -> Option<T> {
    if map.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..map.len());
    map.values().nth(index).copied()
}

fn evict_stalest<T: Copy>(map: &mut HashMap<String, T>, seen: impl Fn(&T) -> i64) {
    if let Some(key) = map
        .iter()
        .min_by_key(|(_, entry)| seen(entry))
        .map(|(key, _)| key.clone())
    {
        map.remove(&key);
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
