//! The relationship rule
//!
//! Pure predicate deciding whether peer `b` must be told about peer `a`'s
//! presence, changes and departure. Evaluated per direction: a fan-out from
//! `a` additionally requires `a`'s own `peer_initiation_sender` option,
//! which the router checks before iterating targets.

use peerwire::PeerInfo;

/// True when `b` should observe `a`: distinct ids, `b` opted into
/// receiving, and both share the same linkage key
pub fn related(a: &PeerInfo, b: &PeerInfo, b_receives: bool) -> bool {
    b.id != a.id && b_receives && b.linkage_key == a.linkage_key
}
