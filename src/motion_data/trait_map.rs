use serde::{Deserialize, Serialize};

use super::pose::MotionTraits;

/// Small ordered map keyed by [`MotionTraits`].
///
/// Databases rarely use more than a handful of trait combinations, so a sorted vector
/// beats hashing and serializes as a plain json array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TraitMap<T>(Vec<(MotionTraits, T)>);

impl<T> TraitMap<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, traits: MotionTraits) -> Option<&T> {
        self.position(traits).ok().map(|index| &self.0[index].1)
    }

    pub fn get_mut(&mut self, traits: MotionTraits) -> Option<&mut T> {
        self.position(traits).ok().map(|index| &mut self.0[index].1)
    }

    /// Insert a value, returning the value previously stored under `traits`.
    pub fn insert(&mut self, traits: MotionTraits, value: T) -> Option<T> {
        match self.position(traits) {
            Ok(index) => Some(std::mem::replace(&mut self.0[index].1, value)),
            Err(index) => {
                self.0.insert(index, (traits, value));
                None
            }
        }
    }

    pub fn contains(&self, traits: MotionTraits) -> bool {
        self.position(traits).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MotionTraits, &T)> {
        self.0.iter().map(|(traits, value)| (*traits, value))
    }

    pub fn keys(&self) -> impl Iterator<Item = MotionTraits> + '_ {
        self.0.iter().map(|(traits, _)| *traits)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn position(&self, traits: MotionTraits) -> Result<usize, usize> {
        self.0.binary_search_by_key(&traits, |(key, _)| *key)
    }
}

impl<T> Default for TraitMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(MotionTraits, T)> for TraitMap<T> {
    fn from_iter<I: IntoIterator<Item = (MotionTraits, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (traits, value) in iter {
            map.insert(traits, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_keys_sorted() {
        let mut map = TraitMap::new();
        map.insert(MotionTraits(4), "c");
        map.insert(MotionTraits(1), "a");
        assert_eq!(map.insert(MotionTraits(4), "d"), Some("c"));

        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec![MotionTraits(1), MotionTraits(4)]);
        assert_eq!(map.get(MotionTraits(4)), Some(&"d"));
        assert_eq!(map.get(MotionTraits(2)), None);
    }
}
