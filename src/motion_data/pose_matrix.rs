use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Index of the favour (cost multiplier) atom inside every pose row.
pub const FAVOUR_ATOM: usize = 0;

/// Flat, row-major storage of pose feature atoms.
///
/// Logically `pose_count × atom_count`, where atom [`FAVOUR_ATOM`] of every row is the
/// pose favour and the remaining atoms are the concatenated feature outputs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseMatrix {
    atom_count: usize,
    pose_count: usize,
    pose_array: Vec<f32>,
}

impl PoseMatrix {
    /// Zero filled matrix with every favour atom set to `1.0`.
    pub fn new(pose_count: usize, atom_count: usize) -> Self {
        let mut pose_array = vec![0.0; pose_count * atom_count];
        if atom_count > 0 {
            for row in pose_array.chunks_exact_mut(atom_count) {
                row[FAVOUR_ATOM] = 1.0;
            }
        }

        Self {
            atom_count,
            pose_count,
            pose_array,
        }
    }

    /// Create a matrix by copying `rows` of a source matrix in order.
    pub fn from_rows<'a>(atom_count: usize, rows: impl Iterator<Item = &'a [f32]>) -> Self {
        let mut pose_array = Vec::new();
        let mut pose_count = 0;
        for row in rows {
            debug_assert_eq!(row.len(), atom_count);
            pose_array.extend_from_slice(row);
            pose_count += 1;
        }

        Self {
            atom_count,
            pose_count,
            pose_array,
        }
    }

    #[inline]
    pub fn row_start(&self, pose_index: usize) -> usize {
        pose_index * self.atom_count
    }

    /// Atoms of a single pose, [`None`] when out of range.
    #[inline]
    pub fn row(&self, pose_index: usize) -> Option<&[f32]> {
        let start = self.row_start(pose_index);
        self.pose_array.get(start..start + self.atom_count)
    }

    #[inline]
    pub fn row_mut(&mut self, pose_index: usize) -> Option<&mut [f32]> {
        let start = self.row_start(pose_index);
        self.pose_array.get_mut(start..start + self.atom_count)
    }

    /// Row of a pose index clamped into `[0, pose_count - 1]`.
    pub fn row_clamped(&self, pose_index: usize) -> Option<&[f32]> {
        self.row(pose_index.min(self.pose_count.checked_sub(1)?))
    }

    /// Favour of a pose, `1.0` when out of range.
    pub fn favour(&self, pose_index: usize) -> f32 {
        self.row(pose_index)
            .map(|row| row[FAVOUR_ATOM])
            .unwrap_or(1.0)
    }

    /// Linearly interpolate two rows into `out`.
    ///
    /// Leaves `out` untouched if either index is out of range.
    pub fn lerp_rows_into(&self, out: &mut Vec<f32>, from: usize, to: usize, factor: f32) {
        let (Some(from), Some(to)) = (self.row(from), self.row(to)) else {
            return;
        };

        out.clear();
        out.extend(
            from.iter()
                .zip(to)
                .map(|(&a, &b)| f32::lerp(a, b, factor)),
        );
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + Clone {
        // chunks_exact panics on 0.
        self.pose_array.chunks_exact(self.atom_count.max(1))
    }

    pub fn atom_count(&self) -> usize {
        self.atom_count
    }

    pub fn pose_count(&self) -> usize {
        self.pose_count
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.pose_array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_matrix_defaults_favour() {
        let matrix = PoseMatrix::new(3, 4);
        assert_eq!(matrix.as_slice().len(), 12);
        for row in matrix.iter_rows() {
            assert_eq!(row, &[1.0, 0.0, 0.0, 0.0]);
        }
        assert_eq!(matrix.favour(10), 1.0);
    }

    #[test]
    fn lerp_rows() {
        let mut matrix = PoseMatrix::new(2, 3);
        matrix.row_mut(0).unwrap().copy_from_slice(&[1.0, 0.0, 2.0]);
        matrix.row_mut(1).unwrap().copy_from_slice(&[1.0, 4.0, 4.0]);

        let mut out = Vec::new();
        matrix.lerp_rows_into(&mut out, 0, 1, 0.5);
        assert_eq!(out, vec![1.0, 2.0, 3.0]);

        assert_eq!(matrix.row_clamped(9), matrix.row(1));
    }
}
