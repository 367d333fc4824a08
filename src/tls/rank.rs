use super::Certificate;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;

/// Earliest known `not_after` in the chain, `None` when no certificate has one
#[must_use]
pub fn effective_expiry(chain: &[Certificate]) -> Option<DateTime<Utc>> {
    chain.iter().filter_map(|cert| cert.not_after).min()
}

/// Order verified chains from the one valid longest to the one expiring
/// soonest. Chains without any known expiry go last, ties keep input order.
///
/// The position in the returned list is the `chain_no` label. It only holds
/// for this call: if the TLS stack hands chains over in a different order on
/// the next probe the numbering can change.
#[must_use]
pub fn rank_chains(chains: &[Vec<Certificate>]) -> Vec<&[Certificate]> {
    let mut ranked: Vec<&[Certificate]> = chains.iter().map(Vec::as_slice).collect();
    // None < Some(_), so reversing puts chains without expiry at the end
    ranked.sort_by_cached_key(|chain| Reverse(effective_expiry(chain)));
    ranked
}
