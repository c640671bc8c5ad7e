use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted `(key, value)` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most series carry fewer than five tags.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set from arbitrary pairs. Later duplicates of a key win.
    pub fn from_pairs(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        let mut tags: SmallVec<[(KeyId, KeyId); 4]> = SmallVec::new();
        for (k, v) in iter {
            match tags.iter_mut().find(|(ek, _)| *ek == k) {
                Some(slot) => slot.1 = v,
                None => tags.push((k, v)),
            }
        }
        tags.sort_unstable();
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_sorts_and_dedups_keys() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::from_pairs([(c, a), (a, b), (c, b)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(b));
        assert_eq!(set.get(b), None);

        let same = TagSet::from_pairs([(a, b), (c, b)]);
        assert_eq!(set, same);
    }
}
