use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::protocol::AwarenessRecord;

/// How long the clock of a removed client is remembered.
const REMOVED_CLOCK_TTL: Duration = Duration::from_secs(30);

/// Client ids touched by one awareness mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwarenessChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Presence of one peer as shown next to its cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessEntry {
    pub client_id: u64,
    pub name: String,
    pub color: String,
}

/// Ephemeral presence states of one room, keyed by Yjs client id.
///
/// Clocks are kept for removed clients for `REMOVED_CLOCK_TTL` so late
/// updates with an older clock cannot resurrect them.
pub struct Awareness {
    states: HashMap<u64, Value>,
    clocks: HashMap<u64, u32>,
    removed_at: HashMap<u64, Instant>,
    changes: broadcast::Sender<AwarenessChange>,
}

impl Awareness {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            states: HashMap::new(),
            clocks: HashMap::new(),
            removed_at: HashMap::new(),
            changes,
        }
    }

    /// Change events, one per mutation that altered the state set.
    pub fn on_change(&self) -> broadcast::Receiver<AwarenessChange> {
        self.changes.subscribe()
    }

    pub fn set_local_state(&mut self, client_id: u64, state: Value) -> AwarenessRecord {
        let clock = self.clocks.get(&client_id).map_or(0, |c| c + 1);
        let record = AwarenessRecord { client_id, clock, state: Some(state) };
        self.apply(std::slice::from_ref(&record));
        record
    }

    /// Merge records received from a peer. Newer clocks win; a `null`
    /// state with the current clock removes the entry.
    pub fn apply(&mut self, records: &[AwarenessRecord]) -> AwarenessChange {
        self.prune(Instant::now());
        let mut change = AwarenessChange::default();
        for record in records {
            let current = self.clocks.get(&record.client_id).copied();
            let known = self.states.contains_key(&record.client_id);
            let newer = current.map_or(true, |c| c < record.clock);
            let removal_at_same_clock =
                current == Some(record.clock) && record.state.is_none() && known;
            if !newer && !removal_at_same_clock {
                continue;
            }

            self.clocks.insert(record.client_id, record.clock);
            match &record.state {
                Some(state) => {
                    self.removed_at.remove(&record.client_id);
                    let previous = self.states.insert(record.client_id, state.clone());
                    match previous {
                        None => change.added.push(record.client_id),
                        Some(prev) if prev != *state => change.updated.push(record.client_id),
                        Some(_) => {}
                    }
                }
                None => {
                    self.removed_at.insert(record.client_id, Instant::now());
                    if self.states.remove(&record.client_id).is_some() {
                        change.removed.push(record.client_id);
                    }
                }
            }
        }
        self.notify(&change);
        change
    }

    /// Drop the given clients and return the removal records to relay.
    ///
    /// Fires a single change event covering all of them.
    pub fn remove_states(&mut self, client_ids: &HashSet<u64>) -> Vec<AwarenessRecord> {
        self.prune(Instant::now());
        let mut change = AwarenessChange::default();
        let mut records = Vec::new();
        for client_id in client_ids {
            if self.states.remove(client_id).is_none() {
                continue;
            }
            let clock = self.clocks.get(client_id).map_or(0, |c| c + 1);
            self.clocks.insert(*client_id, clock);
            self.removed_at.insert(*client_id, Instant::now());
            records.push(AwarenessRecord { client_id: *client_id, clock, state: None });
            change.removed.push(*client_id);
        }
        self.notify(&change);
        records
    }

    pub fn remove_state(&mut self, client_id: u64) -> Option<AwarenessRecord> {
        self.remove_states(&HashSet::from([client_id])).pop()
    }

    pub fn states(&self) -> &HashMap<u64, Value> {
        &self.states
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Every live state, ready to be sent to a newly joined connection.
    pub fn records(&self) -> Vec<AwarenessRecord> {
        self.states
            .iter()
            .map(|(client_id, state)| AwarenessRecord {
                client_id: *client_id,
                clock: self.clocks.get(client_id).copied().unwrap_or_default(),
                state: Some(state.clone()),
            })
            .collect()
    }

    /// Remote peers as seen by a connection controlling `exclude`.
    pub fn peers(&self, exclude: &HashSet<u64>) -> Vec<AwarenessEntry> {
        let mut peers: Vec<AwarenessEntry> = self
            .states
            .iter()
            .filter(|(client_id, _)| !exclude.contains(client_id))
            .map(|(client_id, state)| {
                let user = state.get("user");
                let field = |name: &str| {
                    user.and_then(|u| u.get(name))
                        .or_else(|| state.get(name))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                AwarenessEntry {
                    client_id: *client_id,
                    name: field("name"),
                    color: field("color"),
                }
            })
            .collect();
        peers.sort_by_key(|p| p.client_id);
        peers
    }

    /// Forget clocks of clients removed longer than `REMOVED_CLOCK_TTL` ago.
    fn prune(&mut self, now: Instant) {
        let clocks = &mut self.clocks;
        self.removed_at.retain(|client_id, removed| {
            let keep = now.saturating_duration_since(*removed) < REMOVED_CLOCK_TTL;
            if !keep {
                clocks.remove(client_id);
            }
            keep
        });
    }

    fn notify(&self, change: &AwarenessChange) {
        if !change.is_empty() {
            // No receivers is fine.
            let _ = self.changes.send(change.clone());
        }
    }
}

impl Default for Awareness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str, color: &str) -> Value {
        json!({"user": {"name": name, "color": color, "colorLight": "rgba(0,0,0,0.25)"}})
    }

    #[test]
    fn newer_clock_wins() {
        let mut awareness = Awareness::new();
        awareness.apply(&[AwarenessRecord { client_id: 1, clock: 3, state: Some(user("a", "#111")) }]);
        let stale = awareness.apply(&[AwarenessRecord { client_id: 1, clock: 2, state: Some(user("b", "#222")) }]);
        assert!(stale.is_empty());

        let fresh = awareness.apply(&[AwarenessRecord { client_id: 1, clock: 4, state: Some(user("c", "#333")) }]);
        assert_eq!(fresh.updated, vec![1]);
        assert_eq!(awareness.peers(&HashSet::new())[0].name, "c");
    }

    #[test]
    fn null_state_at_current_clock_removes() {
        let mut awareness = Awareness::new();
        awareness.apply(&[AwarenessRecord { client_id: 9, clock: 1, state: Some(user("a", "#111")) }]);
        let change = awareness.apply(&[AwarenessRecord { client_id: 9, clock: 1, state: None }]);
        assert_eq!(change.removed, vec![9]);
        assert!(awareness.is_empty());
    }

    #[test]
    fn peers_exclude_own_client_ids() {
        let mut awareness = Awareness::new();
        awareness.set_local_state(1, user("ada", "#e74c3c"));
        awareness.set_local_state(2, user("bob", "#3498db"));

        let peers = awareness.peers(&HashSet::from([1]));
        assert_eq!(
            peers,
            vec![AwarenessEntry { client_id: 2, name: "bob".into(), color: "#3498db".into() }]
        );
        // The own entry is still kept for bookkeeping.
        assert_eq!(awareness.states().len(), 2);
    }

    #[test]
    fn removal_fires_exactly_one_event_and_bumps_clock() {
        let mut awareness = Awareness::new();
        awareness.set_local_state(1, user("ada", "#e74c3c"));
        awareness.set_local_state(2, user("ada", "#e74c3c"));
        let mut events = awareness.on_change();

        let records = awareness.remove_states(&HashSet::from([1, 2, 3]));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.state.is_none() && r.clock == 1));

        let event = events.try_recv().unwrap();
        assert_eq!(event.removed.len(), 2);
        assert!(events.try_recv().is_err());

        // A late update carrying the old clock cannot bring the peer back.
        awareness.apply(&[AwarenessRecord { client_id: 1, clock: 0, state: Some(user("x", "#000")) }]);
        assert!(awareness.is_empty());
    }

    #[test]
    fn removed_clocks_are_forgotten_after_a_while() {
        let mut awareness = Awareness::new();
        awareness.set_local_state(1, user("ada", "#e74c3c"));
        awareness.set_local_state(2, user("bob", "#3498db"));
        awareness.remove_state(1);
        awareness.apply(&[AwarenessRecord { client_id: 2, clock: 1, state: None }]);
        assert_eq!(awareness.clocks.len(), 2);

        awareness.prune(Instant::now() + REMOVED_CLOCK_TTL / 2);
        assert_eq!(awareness.clocks.len(), 2);

        awareness.prune(Instant::now() + REMOVED_CLOCK_TTL + Duration::from_secs(1));
        assert!(awareness.clocks.is_empty());
        assert!(awareness.removed_at.is_empty());
    }

    #[test]
    fn rejoining_clients_keep_their_clock() {
        let mut awareness = Awareness::new();
        awareness.set_local_state(1, user("ada", "#e74c3c"));
        awareness.remove_state(1);
        awareness.apply(&[AwarenessRecord { client_id: 1, clock: 2, state: Some(user("ada", "#e74c3c")) }]);

        awareness.prune(Instant::now() + REMOVED_CLOCK_TTL + Duration::from_secs(1));
        assert_eq!(awareness.clocks.get(&1), Some(&2));
        assert!(!awareness.is_empty());
    }

    #[test]
    fn removing_unknown_clients_is_silent() {
        let mut awareness = Awareness::new();
        let mut events = awareness.on_change();
        assert!(awareness.remove_state(42).is_none());
        assert!(events.try_recv().is_err());
    }
}
