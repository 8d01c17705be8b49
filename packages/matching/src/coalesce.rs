//! Last-write-wins de-duplication that keeps first-seen order.

use std::collections::HashMap;
use std::hash::Hash;

/// Result of [`coalesce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coalesced<K, V> {
    /// One entry per distinct key, ordered by the key's first appearance,
    /// holding the value of its last appearance.
    pub items: Vec<(K, V)>,
    /// How many distinct keys appeared more than once.
    pub duplicate_keys: usize,
}

/// Collapses repeated keys so that the last value wins while the key keeps
/// the position where it was first seen.
pub fn coalesce<K, V, I>(entries: I) -> Coalesced<K, V>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = (K, V)>,
{
    // key -> (position in `items`, seen more than once)
    let mut positions: HashMap<K, (usize, bool)> = HashMap::new();
    let mut items: Vec<(K, V)> = Vec::new();
    let mut duplicate_keys = 0;

    for (key, value) in entries {
        if let Some((pos, repeated)) = positions.get_mut(&key) {
            items[*pos].1 = value;
            if !*repeated {
                *repeated = true;
                duplicate_keys += 1;
            }
        } else {
            positions.insert(key.clone(), (items.len(), false));
            items.push((key, value));
        }
    }

    Coalesced {
        items,
        duplicate_keys,
    }
}
