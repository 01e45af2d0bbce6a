//! Shared state estimate: mean vector, covariance matrix and the block arena.
//!
//! The estimate has a fixed capacity `N` chosen at construction. Physical
//! quantities occupy named blocks of coordinates handed out by the arena and
//! referred to by [`BlockId`] handles, so a block's identity never depends on
//! where its coordinates happen to live.

use nalgebra::{DMatrix, DVector};

use crate::error::{EkfError, Result};
use crate::index_set::IndexSet;

/// Opaque handle to a block in a [`StateEstimate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

/// Whether a block already takes part in the joint covariance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Coordinates allocated, correlations not yet initialized
    Reserved,
    /// Part of the filtered state
    Filtered,
}

/// A named group of coordinates.
#[derive(Clone, Debug)]
pub struct StateBlock {
    pub name: String,
    pub indices: IndexSet,
    pub status: BlockStatus,
}

/// Mean and covariance over every filtered quantity.
#[derive(Clone, Debug)]
pub struct StateEstimate {
    x: DVector<f64>,
    p: DMatrix<f64>,
    used: Vec<bool>,
    blocks: Vec<Option<StateBlock>>,
}

impl StateEstimate {
    /// Zero mean and zero covariance over `capacity` coordinates.
    pub fn new(capacity: usize) -> Self {
        Self {
            x: DVector::zeros(capacity),
            p: DMatrix::zeros(capacity, capacity),
            used: vec![false; capacity],
            blocks: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.x.len()
    }

    /// Coordinates not held by any block.
    pub fn free_coordinates(&self) -> usize {
        self.used.iter().filter(|u| !**u).count()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    pub fn mean_mut(&mut self) -> &mut DVector<f64> {
        &mut self.x
    }

    /// Direct covariance access. Writes must keep `P` symmetric.
    pub fn covariance_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.p
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut DVector<f64>, &mut DMatrix<f64>) {
        (&mut self.x, &mut self.p)
    }

    /// Reserves `size` free coordinates for a new block (first fit).
    ///
    /// The coordinates come back with zero mean and no correlations.
    pub fn allocate_block(&mut self, name: impl Into<String>, size: usize) -> Result<BlockId> {
        let available = self.free_coordinates();
        if size > available {
            return Err(EkfError::CapacityExceeded {
                requested: size,
                available,
            });
        }
        let positions: Vec<usize> = self
            .used
            .iter()
            .enumerate()
            .filter(|(_, u)| !**u)
            .map(|(i, _)| i)
            .take(size)
            .collect();
        for &i in &positions {
            self.used[i] = true;
        }
        let positions = IndexSet::new(positions)?;
        self.clear_coordinates(&positions);
        let id = BlockId(self.blocks.len());
        let name = name.into();
        tracing::trace!(block = id.0, %name, size, "allocated state block");
        self.blocks.push(Some(StateBlock {
            name,
            indices: positions,
            status: BlockStatus::Reserved,
        }));
        Ok(id)
    }

    /// Adds a quantity uncorrelated with everything already filtered.
    ///
    /// The block's mean and covariance are written and its cross-covariance is
    /// left at zero. Used for quantities known independently of the map, such as
    /// the initial robot pose or a filtered sensor mounting pose.
    pub fn insert_independent_block(
        &mut self,
        name: impl Into<String>,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> Result<BlockId> {
        let n = mean.len();
        EkfError::check_shape("block covariance", (n, n), covariance.shape())?;
        let id = self.allocate_block(name, n)?;
        self.set_block_mean(id, mean)?;
        let indices = self.block(id)?.indices.clone();
        for (r, gr) in indices.iter().enumerate() {
            for (c, gc) in indices.iter().enumerate() {
                self.p[(gr, gc)] = covariance[(r, c)];
            }
        }
        self.set_status(id, BlockStatus::Filtered)?;
        Ok(id)
    }

    pub fn block(&self, id: BlockId) -> Result<&StateBlock> {
        self.blocks
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(EkfError::UnknownBlock(id.0))
    }

    pub fn indices(&self, id: BlockId) -> Result<&IndexSet> {
        Ok(&self.block(id)?.indices)
    }

    /// Iterates live blocks.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &StateBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (BlockId(i), b)))
    }

    pub(crate) fn set_status(&mut self, id: BlockId, status: BlockStatus) -> Result<()> {
        let block = self
            .blocks
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(EkfError::UnknownBlock(id.0))?;
        block.status = status;
        Ok(())
    }

    /// Union of the coordinates of every filtered block, in block order.
    pub fn filtered_indices(&self) -> IndexSet {
        self.blocks()
            .filter(|(_, b)| b.status == BlockStatus::Filtered)
            .fold(IndexSet::empty(), |acc, (_, b)| IndexSet::union(&acc, &b.indices))
    }

    /// Marks every reserved block lying inside `indices` as filtered.
    pub(crate) fn promote_reserved_within(&mut self, indices: &IndexSet) {
        for block in self.blocks.iter_mut().flatten() {
            if block.status == BlockStatus::Reserved && block.indices.is_subset_of(indices) {
                block.status = BlockStatus::Filtered;
            }
        }
    }

    /// Writes a block's mean. The caller does this before `initialize`.
    pub fn set_block_mean(&mut self, id: BlockId, mean: &DVector<f64>) -> Result<()> {
        let indices = self.indices(id)?.clone();
        EkfError::check_shape("block mean", (indices.len(), 1), mean.shape())?;
        for (k, i) in indices.iter().enumerate() {
            self.x[i] = mean[k];
        }
        Ok(())
    }

    pub fn block_mean(&self, id: BlockId) -> Result<DVector<f64>> {
        Ok(self.indices(id)?.gather(&self.x))
    }

    pub fn block_covariance(&self, id: BlockId) -> Result<DMatrix<f64>> {
        let indices = self.indices(id)?;
        Ok(IndexSet::gather_matrix(indices, indices, &self.p))
    }

    /// Points a block at new coordinates, e.g. after `reparametrize`.
    ///
    /// Coordinates no longer used by the block are cleared and released; the
    /// new coordinates must be free or already the block's own.
    pub fn rebind_block(&mut self, id: BlockId, indices: IndexSet) -> Result<()> {
        indices.check_bounds(self.capacity())?;
        let old = self.indices(id)?.clone();
        if let Some(taken) = indices.iter().find(|&i| self.used[i] && !old.contains(i)) {
            return Err(EkfError::AliasingViolation(format!(
                "coordinate {taken} already belongs to another block"
            )));
        }
        let vacated = IndexSet::new(old.iter().filter(|&i| !indices.contains(i)).collect())?;
        self.clear_coordinates(&vacated);
        for i in vacated.iter() {
            self.used[i] = false;
        }
        for i in indices.iter() {
            self.used[i] = true;
        }
        if let Some(block) = self.blocks.get_mut(id.0).and_then(Option::as_mut) {
            block.indices = indices;
        }
        Ok(())
    }

    /// Removes a block and clears its rows and columns so they can be reused.
    pub fn release_block(&mut self, id: BlockId) -> Result<StateBlock> {
        let block = self
            .blocks
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(EkfError::UnknownBlock(id.0))?;
        self.clear_coordinates(&block.indices);
        for i in block.indices.iter() {
            self.used[i] = false;
        }
        tracing::trace!(block = id.0, name = %block.name, "released state block");
        Ok(block)
    }

    /// Zeroes the mean and every covariance row and column of `indices`.
    fn clear_coordinates(&mut self, indices: &IndexSet) {
        let n = self.capacity();
        for i in indices.iter() {
            self.x[i] = 0.0;
            for j in 0..n {
                self.p[(i, j)] = 0.0;
                self.p[(j, i)] = 0.0;
            }
        }
    }

    /// Largest absolute entry of `P − Pᵗ`.
    pub fn symmetry_error(&self) -> f64 {
        let n = self.capacity();
        let mut worst = 0.0_f64;
        for r in 0..n {
            for c in (r + 1)..n {
                worst = worst.max((self.p[(r, c)] - self.p[(c, r)]).abs());
            }
        }
        worst
    }

    /// Trace of `P[indices, indices]`.
    pub fn trace_of(&self, indices: &IndexSet) -> f64 {
        indices.iter().map(|i| self.p[(i, i)]).sum()
    }
}
