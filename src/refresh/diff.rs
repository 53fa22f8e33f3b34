//! Snapshot comparison by entity identifier.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Items in `new` whose identifier does not occur in `old`, in `new`'s order.
///
/// Items present in both are never reported, however much their other
/// fields changed.
pub fn new_items<'a, T, K, F>(old: &[T], new: &'a [T], id: F) -> Vec<&'a T>
where
  K: Eq + Hash,
  F: Fn(&T) -> K,
{
  let seen: HashSet<K> = old.iter().map(&id).collect();
  new.iter().filter(|item| !seen.contains(&id(*item))).collect()
}

/// Pairs of (old, new) for items present in both snapshots, in `new`'s order.
pub fn common_items<'a, T, K, F>(old: &'a [T], new: &'a [T], id: F) -> Vec<(&'a T, &'a T)>
where
  K: Eq + Hash,
  F: Fn(&T) -> K,
{
  let by_id: HashMap<K, &T> = old.iter().map(|item| (id(item), item)).collect();
  new
    .iter()
    .filter_map(|item| by_id.get(&id(item)).map(|before| (*before, item)))
    .collect()
}
