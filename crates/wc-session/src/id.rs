//! Correlation ids.

use rand::Rng;
use wc_common::helpers::now_millis;

/// Millisecond timestamp scaled by 1000 plus a random offset below 999.
///
/// Unique enough within one process; collisions are tolerated by the
/// pending-callback map.
pub fn new_call_id() -> u64 {
    now_millis() * 1000 + rand::thread_rng().gen_range(0..999)
}
