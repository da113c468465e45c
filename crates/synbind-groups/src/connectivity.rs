//! Ragged connectivity layout.
//!
//! Caller-supplied `(pre, post)` index pairs are sorted row-major by source,
//! counted per row and kept unpadded here. Padding to the engine's row
//! capacity happens when rows are scattered into a bound view.

use num_traits::ToPrimitive;

use synbind_core::{BindError, HostView, Result};

/// Host-side ragged connectivity built from explicit index pairs
#[derive(Debug, Clone, PartialEq)]
pub struct SparseConnections {
    row_lengths: Vec<u32>,
    max_row_length: usize,
    column_indices: Vec<u32>,
    order: Vec<usize>,
}

impl SparseConnections {
    /// Sort `(pre, post)` pairs by `(pre, post)` and derive row lengths.
    ///
    /// Pairs that compare equal keep their original relative order.
    pub fn from_indices(
        source_size: usize,
        target_size: usize,
        pre_indices: &[u32],
        post_indices: &[u32],
    ) -> Result<Self> {
        if pre_indices.len() != post_indices.len() {
            return Err(BindError::SizeMismatch {
                name: "post_indices".into(),
                expected: pre_indices.len(),
                got: post_indices.len(),
            });
        }
        check_range(pre_indices, source_size)?;
        check_range(post_indices, target_size)?;

        let mut order: Vec<usize> = (0..pre_indices.len()).collect();
        order.sort_by_key(|&i| (pre_indices[i], post_indices[i]));

        let mut row_lengths = vec![0u32; source_size];
        for &pre in pre_indices {
            row_lengths[pre as usize] += 1;
        }
        let max_row_length = row_lengths.iter().copied().max().unwrap_or(0) as usize;
        let column_indices = order.iter().map(|&i| post_indices[i]).collect();

        Ok(Self {
            row_lengths,
            max_row_length,
            column_indices,
            order,
        })
    }

    pub fn num_synapses(&self) -> usize {
        self.column_indices.len()
    }

    pub fn row_lengths(&self) -> &[u32] {
        &self.row_lengths
    }

    pub fn max_row_length(&self) -> usize {
        self.max_row_length
    }

    /// Sorted target indices, unpadded
    pub fn column_indices(&self) -> &[u32] {
        &self.column_indices
    }

    /// Source index of every synapse in sorted order
    pub fn pre_indices(&self) -> Vec<u32> {
        expand_rows(&self.row_lengths)
    }

    /// `order[k]` is the caller's index of the `k`-th sorted synapse
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Reorder values given in the caller's synapse order into sorted order
    pub fn permute(&self, values: &[f64]) -> Result<Vec<f64>> {
        if values.len() != self.order.len() {
            return Err(BindError::SizeMismatch {
                name: "synapse values".into(),
                expected: self.order.len(),
                got: values.len(),
            });
        }
        Ok(self.order.iter().map(|&i| values[i]).collect())
    }
}

fn check_range(indices: &[u32], size: usize) -> Result<()> {
    match indices.iter().find(|&&i| i as usize >= size) {
        Some(&bad) => Err(BindError::IndexOutOfRange {
            index: bad as usize,
            size,
        }),
        None => Ok(()),
    }
}

/// Row index repeated once per synapse in that row
pub fn expand_rows(row_lengths: &[u32]) -> Vec<u32> {
    row_lengths
        .iter()
        .enumerate()
        .flat_map(|(i, &len)| std::iter::repeat(i as u32).take(len as usize))
        .collect()
}

/// Copy a dense row-major sequence into a padded view.
///
/// Row `i` lands at `i * stride`; the tail of each row is left untouched.
pub fn scatter_rows<T>(view: &HostView, row_lengths: &[u32], stride: usize, values: &[T]) -> Result<()>
where
    T: ToPrimitive + Copy,
{
    let total: usize = row_lengths.iter().map(|&len| len as usize).sum();
    if values.len() != total {
        return Err(BindError::SizeMismatch {
            name: view.name().to_string(),
            expected: total,
            got: values.len(),
        });
    }

    let mut array = view.write();
    let mut start = 0;
    for (i, &len) in row_lengths.iter().enumerate() {
        let len = len as usize;
        if len > stride {
            return Err(BindError::SizeMismatch {
                name: view.name().to_string(),
                expected: stride,
                got: len,
            });
        }
        array.write(i * stride, &values[start..start + len])?;
        start += len;
    }
    Ok(())
}

/// Inverse of [`scatter_rows`]: concatenate the used prefix of every row
pub fn gather_rows(view: &HostView, row_lengths: &[u32], stride: usize) -> Result<Vec<f64>> {
    let array = view.read();
    let mut values = Vec::with_capacity(row_lengths.iter().map(|&len| len as usize).sum());
    for (i, &len) in row_lengths.iter().enumerate() {
        values.extend(array.read(i * stride, len as usize)?);
    }
    Ok(values)
}
