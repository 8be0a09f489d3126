use crate::effects::fixed_mask;
use crate::population::PopulationPrior;

use matrix_param::GaussianMoments;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter blocks of a state-space model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    /// observation parameters (phi)
    Observation,
    /// evolution parameters (theta)
    Evolution,
    /// initial conditions (x0)
    InitialCondition,
}

impl BlockTag {
    pub const ALL: [BlockTag; 3] = [
        BlockTag::Observation,
        BlockTag::Evolution,
        BlockTag::InitialCondition,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BlockTag::Observation => "phi",
            BlockTag::Evolution => "theta",
            BlockTag::InitialCondition => "x0",
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One value per present block, iterated in [`BlockTag`] order
pub type BlockMap<T> = BTreeMap<BlockTag, T>;

/// Dimension, active set and fixed/random partition of one block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockDescriptor {
    pub tag: BlockTag,
    pub dim: usize,
    /// `active[i]` iff the prior variance of `i` is non-zero
    pub active: Vec<bool>,
    /// active ∩ fixed, sorted
    pub fixed: Vec<usize>,
    /// active ∖ fixed, sorted
    pub random: Vec<usize>,
}

impl BlockDescriptor {
    pub fn new(tag: BlockTag, active: Vec<bool>, is_fixed: &[bool]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            active.len() == is_fixed.len(),
            "{}: active mask ({}) and effect mask ({}) lengths differ",
            tag,
            active.len(),
            is_fixed.len()
        );

        let (fixed, random): (Vec<usize>, Vec<usize>) = (0..active.len())
            .filter(|&i| active[i])
            .partition(|&i| is_fixed[i]);

        Ok(Self {
            tag,
            dim: active.len(),
            active,
            fixed,
            random,
        })
    }

    pub fn active_indices(&self) -> Vec<usize> {
        (0..self.dim).filter(|&i| self.active[i]).collect()
    }

    pub fn num_active(&self) -> usize {
        self.fixed.len() + self.random.len()
    }
}

/// The blocks of a model that have non-zero dimension.
///
/// Absent blocks are simply not in the list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlockRegistry {
    blocks: Vec<BlockDescriptor>,
}

impl BlockRegistry {
    /// Partition each block by its population precision prior:
    /// `(a0, b0) = (+inf, 0)` entries are fixed effects.
    pub fn from_population_priors(priors: &BlockMap<PopulationPrior>) -> anyhow::Result<Self> {
        let mut blocks = vec![];
        for (&tag, prior) in priors.iter() {
            if prior.gaussian.is_empty() {
                continue;
            }
            let is_fixed = fixed_mask(&prior.shape, &prior.rate)?;
            blocks.push(BlockDescriptor::new(
                tag,
                prior.gaussian.active_mask(),
                &is_fixed,
            )?);
        }
        Ok(Self { blocks })
    }

    /// Every active parameter is governed by its block precision
    pub fn all_random(priors: &BlockMap<GaussianMoments>) -> anyhow::Result<Self> {
        let mut blocks = vec![];
        for (&tag, prior) in priors.iter() {
            if prior.is_empty() {
                continue;
            }
            blocks.push(BlockDescriptor::new(
                tag,
                prior.active_mask(),
                &vec![false; prior.len()],
            )?);
        }
        Ok(Self { blocks })
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.blocks.iter()
    }

    pub fn get(&self, tag: BlockTag) -> Option<&BlockDescriptor> {
        self.blocks.iter().find(|b| b.tag == tag)
    }

    pub fn tags(&self) -> Vec<BlockTag> {
        self.blocks.iter().map(|b| b.tag).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
