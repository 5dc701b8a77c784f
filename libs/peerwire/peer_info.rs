//! Public peer record
//!
//! The attributes a peer exposes to related peers: identity, tags,
//! properties and the linkage key that scopes mutual visibility. The hub
//! holds the authoritative copy; clients mirror it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Public attributes of a connected peer
///
/// `id` is assigned by the hub on first connect and survives reconnects;
/// `user_id` is the encrypted opaque form of whatever the client supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerInfo {
    pub id: String,
    pub user_id: String,
    pub linkage_key: String,
    pub tags: Vec<String>,
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debout_cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
}

impl PeerInfo {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// True when every given tag is present (vacuously true for an empty
    /// list)
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|t| self.has_tag(t))
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.has_tag(t))
    }

    /// Add tags, skipping ones already present; returns how many were added
    pub fn add_tags(&mut self, tags: &[String]) -> usize {
        let mut added = 0;
        for tag in tags {
            if !self.has_tag(tag) {
                self.tags.push(tag.clone());
                added += 1;
            }
        }
        added
    }

    /// Remove tags; returns how many were actually removed
    pub fn remove_tags(&mut self, tags: &[String]) -> usize {
        let before = self.tags.len();
        self.tags.retain(|t| !tags.contains(t));
        before - self.tags.len()
    }

    /// Merge properties key by key; existing keys are overwritten, other
    /// keys are kept (merge, never replace)
    pub fn merge_properties(&mut self, properties: Map<String, Value>) {
        for (key, value) in properties {
            self.properties.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer_with_tags(tags: &[&str]) -> PeerInfo {
        PeerInfo {
            id: "p1".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_checks() {
        let peer = peer_with_tags(&["a", "b"]);
        assert!(peer.has_tag("a"));
        assert!(!peer.has_tag("c"));
        assert!(peer.has_all_tags(&["a".into(), "b".into()]));
        assert!(!peer.has_all_tags(&["a".into(), "c".into()]));
        assert!(peer.has_any_tag(&["c".into(), "b".into()]));
        assert!(peer.has_all_tags(&[]));
        assert!(!peer.has_any_tag(&[]));
    }

    #[test]
    fn test_add_tags_deduplicates() {
        let mut peer = peer_with_tags(&["a"]);
        let added = peer.add_tags(&["a".into(), "b".into(), "b".into()]);
        assert_eq!(added, 1);
        assert_eq!(peer.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_remove_tags() {
        let mut peer = peer_with_tags(&["a", "b", "c"]);
        let removed = peer.remove_tags(&["b".into(), "x".into()]);
        assert_eq!(removed, 1);
        assert_eq!(peer.tags, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_merge_properties_keeps_other_keys() {
        let mut peer = PeerInfo::default();
        peer.merge_properties(
            json!({"color": "red", "size": 1}).as_object().unwrap().clone(),
        );
        peer.merge_properties(json!({"size": 2}).as_object().unwrap().clone());

        assert_eq!(peer.properties.get("color"), Some(&json!("red")));
        assert_eq!(peer.properties.get("size"), Some(&json!(2)));
    }

    #[test]
    fn test_wire_field_spelling() {
        let peer = PeerInfo {
            id: "p1".to_string(),
            linkage_key: "k".to_string(),
            start_time: Some(12345),
            ..Default::default()
        };
        let text = serde_json::to_string(&peer).unwrap();
        assert!(text.contains(r#""linkageKey":"k""#));
        assert!(text.contains(r#""userId":"#));
        assert!(text.contains(r#""startTime":12345"#));
    }
}
