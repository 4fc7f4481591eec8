//! Fast keyed collections, mirroring the teacher's `collections_randomstate_*`
//! feature switch: a `std`-hasher `HashMap` by default, or one keyed with
//! `twox-hash`'s `RandomState` when `collections_randomstate_twox_hash` is
//! active (the crate's default).

#[cfg(feature = "collections_randomstate_twox_hash")]
pub type HashMap<K, V> = std::collections::HashMap<K, V, twox_hash::RandomXxHashBuilder64>;

#[cfg(not(feature = "collections_randomstate_twox_hash"))]
pub type HashMap<K, V> = std::collections::HashMap<K, V>;

pub fn hash_map<K, V>() -> HashMap<K, V> {
    Default::default()
}

pub fn hash_map_capacity<K, V>(capacity: usize) -> HashMap<K, V>
where
    HashMap<K, V>: Default,
{
    #[cfg(feature = "collections_randomstate_twox_hash")]
    {
        std::collections::HashMap::with_capacity_and_hasher(capacity, Default::default())
    }
    #[cfg(not(feature = "collections_randomstate_twox_hash"))]
    {
        std::collections::HashMap::with_capacity(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_basic_usage() {
        let mut m: HashMap<u32, &str> = hash_map();
        m.insert(1, "one");
        assert_eq!(m.get(&1), Some(&"one"));
    }
}
