//! Client-side peer mirror
//!
//! The local cache of related peers, fed by `presence`/`alter`/`leave`
//! events and reconciled wholesale on every full resync. Filter tags gate
//! what enters the mirror on presence and resync; an `alter` for an
//! already-mirrored peer is applied regardless (filters are deliberately
//! not re-applied retroactively).

use peerwire::PeerInfo;
use std::collections::HashMap;

/// What a mirror mutation asks the connection to report
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    Add(PeerInfo),
    /// `None` when an alter arrived for a peer the mirror never held
    Alter(Option<PeerInfo>),
    Remove(PeerInfo),
}

#[derive(Default)]
pub struct PeerMirror {
    peers: HashMap<String, PeerInfo>,
    filter_tags: Vec<String>,
}

impl PeerMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    pub fn find(&self, mut predicate: impl FnMut(&PeerInfo) -> bool) -> Option<&PeerInfo> {
        self.peers.values().find(|peer| predicate(peer))
    }

    pub fn filter(&self, mut predicate: impl FnMut(&PeerInfo) -> bool) -> Vec<PeerInfo> {
        self.peers
            .values()
            .filter(|peer| predicate(peer))
            .cloned()
            .collect()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn filter_tags(&self) -> &[String] {
        &self.filter_tags
    }

    /// Returns how many tags were actually added
    pub fn add_filter_tags(&mut self, tags: &[String]) -> usize {
        let mut added = 0;
        for tag in tags {
            if !self.filter_tags.contains(tag) {
                self.filter_tags.push(tag.clone());
                added += 1;
            }
        }
        added
    }

    /// Returns how many tags were actually removed
    pub fn remove_filter_tags(&mut self, tags: &[String]) -> usize {
        let before = self.filter_tags.len();
        self.filter_tags.retain(|tag| !tags.contains(tag));
        before - self.filter_tags.len()
    }

    fn complies(&self, peer: &PeerInfo) -> bool {
        peer.has_all_tags(&self.filter_tags)
    }

    /// A related peer appeared; mirrored only when it passes the filter
    pub fn apply_presence(&mut self, peer: PeerInfo) -> Option<MirrorEvent> {
        if !self.complies(&peer) {
            return None;
        }
        self.peers.insert(peer.id.clone(), peer.clone());
        Some(MirrorEvent::Add(peer))
    }

    /// A mirrored peer changed: the snapshot is replaced wholesale.
    /// Always reported, even when the peer was absent.
    pub fn apply_alter(&mut self, peer: PeerInfo) -> MirrorEvent {
        match self.peers.get_mut(&peer.id) {
            Some(existing) => {
                *existing = peer.clone();
                MirrorEvent::Alter(Some(peer))
            }
            None => MirrorEvent::Alter(None),
        }
    }

    /// A peer left; reports the removed record, or the announced one when
    /// the mirror never held it
    pub fn apply_leave(&mut self, peer: PeerInfo) -> MirrorEvent {
        let removed = self.peers.remove(&peer.id).unwrap_or(peer);
        MirrorEvent::Remove(removed)
    }

    /// Replace the mirror with a full listing from the hub, reporting the
    /// delta: adds for new peers, alters for changed ones (deep equality on
    /// tags and properties), removes for everything that vanished
    pub fn resync(&mut self, listing: Vec<PeerInfo>) -> Vec<MirrorEvent> {
        let previous = std::mem::take(&mut self.peers);
        let mut leftover = previous.clone();
        let mut events = Vec::new();

        for peer in listing {
            if !self.complies(&peer) {
                continue;
            }
            let existed = leftover.remove(&peer.id).is_some();
            let changed = previous
                .get(&peer.id)
                .map(|old| !same_shape(old, &peer))
                .unwrap_or(false);
            self.peers.insert(peer.id.clone(), peer.clone());
            if !existed {
                events.push(MirrorEvent::Add(peer));
            } else if changed {
                events.push(MirrorEvent::Alter(Some(peer)));
            }
        }

        for (_, old) in leftover {
            events.push(MirrorEvent::Remove(old));
        }
        events
    }
}

/// Unchanged for mirror purposes: identical tags and properties
fn same_shape(a: &PeerInfo, b: &PeerInfo) -> bool {
    a.tags == b.tags && a.properties == b.properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer(id: &str, tags: &[&str]) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_presence_respects_filter() {
        let mut mirror = PeerMirror::new();
        mirror.add_filter_tags(&["x".into()]);

        assert!(mirror.apply_presence(peer("a", &["x", "y"])).is_some());
        assert!(mirror.apply_presence(peer("b", &["y"])).is_none());
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_alter_for_unknown_peer_reports_none() {
        let mut mirror = PeerMirror::new();
        match mirror.apply_alter(peer("ghost", &[])) {
            MirrorEvent::Alter(None) => {}
            other => panic!("expected Alter(None), got {:?}", other),
        }
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_alter_replaces_snapshot() {
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("a", &["old"]));

        let mut updated = peer("a", &["new"]);
        updated.properties.insert("k".to_string(), json!(1));
        match mirror.apply_alter(updated) {
            MirrorEvent::Alter(Some(p)) => assert!(p.has_tag("new")),
            other => panic!("expected Alter(Some), got {:?}", other),
        }
        assert!(mirror.get("a").unwrap().has_tag("new"));
        assert!(!mirror.get("a").unwrap().has_tag("old"));
    }

    #[test]
    fn test_alter_bypasses_filter_for_mirrored_peer() {
        // Filters gate presence and resync only, not alters of peers
        // already in the mirror
        let mut mirror = PeerMirror::new();
        mirror.add_filter_tags(&["x".into()]);
        mirror.apply_presence(peer("a", &["x"]));

        match mirror.apply_alter(peer("a", &["y"])) {
            MirrorEvent::Alter(Some(_)) => {}
            other => panic!("expected Alter(Some), got {:?}", other),
        }
        assert!(mirror.get("a").is_some());
    }

    #[test]
    fn test_leave_reports_removed_or_announced_record() {
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("a", &["x"]));

        match mirror.apply_leave(peer("a", &[])) {
            // The mirrored record wins over the announcement
            MirrorEvent::Remove(p) => assert!(p.has_tag("x")),
            other => panic!("expected Remove, got {:?}", other),
        }

        match mirror.apply_leave(peer("never-seen", &["z"])) {
            MirrorEvent::Remove(p) => assert_eq!(p.id, "never-seen"),
            other => panic!("expected Remove, got {:?}", other),
        }
    }

    #[test]
    fn test_resync_reports_delta() {
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("stays", &["a"]));
        mirror.apply_presence(peer("changes", &["a"]));
        mirror.apply_presence(peer("goes", &["a"]));

        let listing = vec![
            peer("stays", &["a"]),
            peer("changes", &["a", "b"]),
            peer("arrives", &[]),
        ];
        let events = mirror.resync(listing);

        let mut adds = 0;
        let mut alters = 0;
        let mut removes = 0;
        for event in &events {
            match event {
                MirrorEvent::Add(p) => {
                    adds += 1;
                    assert_eq!(p.id, "arrives");
                }
                MirrorEvent::Alter(Some(p)) => {
                    alters += 1;
                    assert_eq!(p.id, "changes");
                }
                MirrorEvent::Remove(p) => {
                    removes += 1;
                    assert_eq!(p.id, "goes");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!((adds, alters, removes), (1, 1, 1));
        assert_eq!(mirror.len(), 3);
    }

    #[test]
    fn test_filter_idempotence_on_resync() {
        // Adding a filter tag every mirrored peer already satisfies must
        // not change the peer set
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("a", &["x"]));
        mirror.apply_presence(peer("b", &["x", "y"]));

        mirror.add_filter_tags(&["x".into()]);
        let listing = mirror.peers();
        let events = mirror.resync(listing);

        assert!(events.is_empty());
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn test_resync_drops_filtered_peers() {
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("a", &["x"]));
        mirror.apply_presence(peer("b", &[]));

        mirror.add_filter_tags(&["x".into()]);
        let listing = vec![peer("a", &["x"]), peer("b", &[])];
        let events = mirror.resync(listing);

        // "b" no longer complies: filtered out of the new set and reported
        // as removed
        assert_eq!(events.len(), 1);
        match &events[0] {
            MirrorEvent::Remove(p) => assert_eq!(p.id, "b"),
            other => panic!("expected Remove, got {:?}", other),
        }
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_property_change_counts_as_alter() {
        let mut mirror = PeerMirror::new();
        mirror.apply_presence(peer("a", &[]));

        let mut changed = peer("a", &[]);
        changed.properties.insert("v".to_string(), json!(2));
        let events = mirror.resync(vec![changed]);

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MirrorEvent::Alter(Some(_))));
    }
}
