//! Routing table gauges

use dhtscope_core::BucketNode;

/// Count the contacts held in a bucket tree
///
/// The tree belongs to the engine and may change between reads, so the
/// result is a gauge. Traversal is iterative because split buckets can
/// form arbitrarily deep chains.
pub fn count_contacts(root: Option<&BucketNode>) -> usize {
    let mut count = 0;
    let mut pending: Vec<&BucketNode> = root.into_iter().collect();

    while let Some(bucket) = pending.pop() {
        count += bucket.contacts.len();
        if let Some(left) = bucket.left.as_deref() {
            pending.push(left);
        }
        if let Some(right) = bucket.right.as_deref() {
            pending.push(right);
        }
    }

    count
}
