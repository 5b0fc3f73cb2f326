use rand::Rng;
use rand::seq::SliceRandom;

use crate::core::node::StorageNode;

/// Picks the replica nodes for one chunk, in fetch priority order.
///
/// Every call draws an independent uniform permutation (Fisher-Yates) of
/// `nodes`, so consecutive chunks of a file spread their first replica over the
/// whole cluster. `n_replicas = None` keeps every node.
pub fn plan<R: Rng + ?Sized>(
    nodes: &[StorageNode],
    n_replicas: Option<usize>,
    rng: &mut R,
) -> Vec<StorageNode> {
    let mut order = nodes.to_vec();
    order.shuffle(rng);
    if let Some(n) = n_replicas {
        order.truncate(n);
    }
    order
}
