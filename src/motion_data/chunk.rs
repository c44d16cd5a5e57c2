use serde::{Deserialize, Serialize};

/// Offset index for chunks in a flat array or list.
///
/// # Example
///
/// \[0, 3, 5, 7\] contains chunk [0, 3), [3, 5), [5, 7)
///
/// Use [`Self::iter`] to iterate through the chunks.
///
/// ```
/// use bevy_motion_matching_core::motion_data::chunk::ChunkOffsets;
///
/// let mut offsets = ChunkOffsets::new();
/// offsets.push_chunk(3);
/// offsets.push_chunk(2);
/// offsets.push_chunk(2);
///
/// let mut prev_end = 0;
/// for (start, end) in offsets.iter() {
///     // Start index will always equal previous end index.
///     assert_eq!(start, prev_end);
///     assert!(end > start);
///     prev_end = end;
/// }
///
/// assert_eq!(offsets.find_chunk(4), Some(1));
/// assert_eq!(offsets.find_chunk(7), None);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkOffsets(Vec<usize>);

impl ChunkOffsets {
    /// Initialize offsets with `0` as the first default element.
    pub fn new() -> Self {
        Self(vec![0])
    }

    /// Number of chunks present.
    pub fn num_chunks(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Total number of items covered by all chunks.
    pub fn total_len(&self) -> usize {
        self.0.last().copied().unwrap_or_default()
    }

    pub fn push_chunk(&mut self, chunk_len: usize) {
        let end = self.total_len();
        self.0.push(end + chunk_len);
    }

    pub fn get_chunk(&self, index: usize) -> Option<(usize, usize)> {
        Some((*self.0.get(index)?, *self.0.get(index + 1)?))
    }

    /// Find the chunk that holds the item at `item_index`.
    ///
    /// Empty chunks are never returned.
    pub fn find_chunk(&self, item_index: usize) -> Option<usize> {
        if item_index >= self.total_len() {
            return None;
        }

        // First offset strictly larger than the item index marks the chunk end.
        let end = self.0.partition_point(|&offset| offset <= item_index);
        Some(end - 1)
    }

    pub fn iter(&self) -> ChunkOffsetsIter<'_> {
        ChunkOffsetsIter {
            offsets: self,
            chunk_index: 0,
        }
    }
}

pub struct ChunkOffsetsIter<'a> {
    offsets: &'a ChunkOffsets,
    chunk_index: usize,
}

impl Iterator for ChunkOffsetsIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.offsets.get_chunk(self.chunk_index);
        self.chunk_index += 1;
        chunk
    }
}

impl Default for ChunkOffsets {
    fn default() -> Self {
        Self::new()
    }
}

pub trait ChunkIterator {
    type Item;

    fn offsets(&self) -> &ChunkOffsets;

    fn items(&self) -> &[Self::Item];

    /// Create an iterator that iterates through items `Self::Item` chunk by chunk.
    fn iter_chunk<'a>(&'a self) -> impl Iterator<Item = &'a [Self::Item]>
    where
        Self::Item: 'a,
    {
        self.offsets()
            .iter()
            .map(|(start, end)| &self.items()[start..end])
    }

    /// Create an iterator that iterates through the items `Self::Item` inside a given chunk index.
    fn get_chunk(&self, chunk_index: usize) -> Option<&[Self::Item]> {
        let (start, end) = self.offsets().get_chunk(chunk_index)?;
        self.items().get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_chunk_skips_empty_chunks() {
        let mut offsets = ChunkOffsets::new();
        offsets.push_chunk(2);
        offsets.push_chunk(0);
        offsets.push_chunk(3);

        assert_eq!(offsets.find_chunk(0), Some(0));
        assert_eq!(offsets.find_chunk(1), Some(0));
        assert_eq!(offsets.find_chunk(2), Some(2));
        assert_eq!(offsets.find_chunk(4), Some(2));
        assert_eq!(offsets.find_chunk(5), None);
    }
}
