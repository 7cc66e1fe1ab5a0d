//! Batch sources for the training flows.
//!
//! A [`BatchSource`] produces, per pass over a seed set, a finite sequence of
//! [`MetapathBatch`] values: the seed nodes of interest plus, per metapath,
//! the minimal aggregation structure ([`Block`]) and the input-node set whose
//! features must be materialized. Two implementations are provided:
//!
//! - [`FullGraphSource`] yields exactly one batch covering every category
//!   node, with whole-neighborhood blocks and no randomness;
//! - [`NeighborSampler`] shuffles the seed set, partitions it into
//!   `batch_size` chunks (every seed appears exactly once per pass), and
//!   samples up to `num_neighbors` metapath neighbors per seed.
//!
//! Batches are consumable exactly once; the flows never retain one past the
//! step that consumed it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::errors::HgnnError;
use crate::graph::{HeteroGraph, MetapathGraph, NodeIndex};

/// Aggregation structure for one metapath within one batch.
///
/// Neighborhood entries are row positions into the batch's input-node list
/// for the same metapath, so the model can aggregate directly over the
/// materialized embedding matrix. Every neighborhood contains its own seed.
#[derive(Debug, Clone)]
pub struct Block {
    seed_neighbors: Vec<Vec<usize>>,
}

impl Block {
    pub fn num_seeds(&self) -> usize {
        self.seed_neighbors.len()
    }

    /// Embedding-row positions aggregated for the seed at `seed_pos`.
    pub fn neighbor_rows(&self, seed_pos: usize) -> &[usize] {
        &self.seed_neighbors[seed_pos]
    }
}

/// One unit of sampled computation: seeds plus per-metapath input-node sets
/// and blocks.
#[derive(Debug, Clone)]
pub struct MetapathBatch {
    /// Metapath name -> nodes whose features must be looked up, in
    /// embedding-row order.
    pub input_nodes: HashMap<String, Vec<NodeIndex>>,
    /// The nodes whose labels/predictions this batch produces.
    pub seeds: Vec<NodeIndex>,
    /// Metapath name -> aggregation structure over the input rows.
    pub blocks: HashMap<String, Block>,
}

/// A finite, per-pass-restartable producer of batches over a seed set.
pub trait BatchSource {
    /// Start one pass over `seeds`. The union of seed sets across the yielded
    /// batches equals `seeds` exactly once each.
    fn batches<'a>(
        &'a mut self,
        seeds: &[NodeIndex],
    ) -> Result<Box<dyn Iterator<Item = MetapathBatch> + 'a>, HgnnError>;
}

fn build_batch(
    seeds: Vec<NodeIndex>,
    views: &[(String, &MetapathGraph)],
    mut sample: impl FnMut(&[NodeIndex]) -> Vec<NodeIndex>,
) -> MetapathBatch {
    let mut input_nodes = HashMap::new();
    let mut blocks = HashMap::new();
    for (name, view) in views {
        let mut inputs: Vec<NodeIndex> = Vec::new();
        let mut row_of: HashMap<NodeIndex, usize> = HashMap::new();
        let mut seed_neighbors = Vec::with_capacity(seeds.len());
        for &seed in &seeds {
            let picked = sample(view.neighbors(seed));
            let mut rows = Vec::with_capacity(picked.len() + 1);
            for node in picked.into_iter().chain(std::iter::once(seed)) {
                let row = *row_of.entry(node).or_insert_with(|| {
                    inputs.push(node);
                    inputs.len() - 1
                });
                rows.push(row);
            }
            seed_neighbors.push(rows);
        }
        input_nodes.insert(name.clone(), inputs);
        blocks.insert(name.clone(), Block { seed_neighbors });
    }
    MetapathBatch {
        input_nodes,
        seeds,
        blocks,
    }
}

/// Trivial source: one batch per pass covering every requested node, with the
/// complete neighborhood of each seed. Deterministic.
pub struct FullGraphSource<'g> {
    views: Vec<(String, &'g MetapathGraph)>,
}

impl<'g> FullGraphSource<'g> {
    pub fn new(graph: &'g HeteroGraph, meta_paths: &[String]) -> Result<Self, HgnnError> {
        let mut views = Vec::with_capacity(meta_paths.len());
        for name in meta_paths {
            views.push((name.clone(), graph.metapath(name)?));
        }
        Ok(Self { views })
    }
}

impl BatchSource for FullGraphSource<'_> {
    fn batches<'a>(
        &'a mut self,
        seeds: &[NodeIndex],
    ) -> Result<Box<dyn Iterator<Item = MetapathBatch> + 'a>, HgnnError> {
        let batch = build_batch(seeds.to_vec(), &self.views, |neighbors| {
            neighbors.to_vec()
        });
        Ok(Box::new(std::iter::once(batch)))
    }
}

/// Metapath neighbor sampler with a fixed fan-out.
///
/// Each pass shuffles the seed set and partitions it into `batch_size`
/// chunks, so batch order is not stable across epochs but every seed is
/// classified exactly once per pass. Per seed and metapath, at most
/// `num_neighbors` neighbors are drawn without replacement.
pub struct NeighborSampler<'g> {
    views: Vec<(String, &'g MetapathGraph)>,
    batch_size: usize,
    num_neighbors: usize,
    rng: StdRng,
}

impl<'g> NeighborSampler<'g> {
    pub fn new(
        graph: &'g HeteroGraph,
        meta_paths: &[String],
        batch_size: usize,
        num_neighbors: usize,
        seed: Option<u64>,
    ) -> Result<Self, HgnnError> {
        if batch_size == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if num_neighbors == 0 {
            return Err(HgnnError::InvalidConfiguration(
                "num_neighbors must be at least 1".to_string(),
            ));
        }
        if meta_paths.is_empty() {
            return Err(HgnnError::InvalidConfiguration(
                "at least one metapath is required for sampling".to_string(),
            ));
        }
        let mut views = Vec::with_capacity(meta_paths.len());
        for name in meta_paths {
            views.push((name.clone(), graph.metapath(name)?));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            views,
            batch_size,
            num_neighbors,
            rng,
        })
    }
}

impl BatchSource for NeighborSampler<'_> {
    fn batches<'a>(
        &'a mut self,
        seeds: &[NodeIndex],
    ) -> Result<Box<dyn Iterator<Item = MetapathBatch> + 'a>, HgnnError> {
        let mut order = seeds.to_vec();
        order.shuffle(&mut self.rng);
        Ok(Box::new(SampledBatches {
            sampler: self,
            order,
            cursor: 0,
        }))
    }
}

struct SampledBatches<'a, 'g> {
    sampler: &'a mut NeighborSampler<'g>,
    order: Vec<NodeIndex>,
    cursor: usize,
}

impl Iterator for SampledBatches<'_, '_> {
    type Item = MetapathBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = usize::min(self.cursor + self.sampler.batch_size, self.order.len());
        let chunk = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let fan_out = self.sampler.num_neighbors;
        let rng = &mut self.sampler.rng;
        let batch = build_batch(chunk, &self.sampler.views, |neighbors| {
            if neighbors.len() <= fan_out {
                neighbors.to_vec()
            } else {
                neighbors
                    .choose_multiple(rng, fan_out)
                    .copied()
                    .collect()
            }
        });
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ring_graph(n: usize) -> HeteroGraph {
        let mut counts = HashMap::new();
        counts.insert("paper".to_string(), n);
        let mut graph = HeteroGraph::new("paper", counts).unwrap();
        let edges: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| [(i, (i + 1) % n), (i, (i + n - 1) % n)])
            .collect();
        graph
            .add_metapath("pap", MetapathGraph::new(n, &edges).unwrap())
            .unwrap();
        graph
            .add_metapath("psp", MetapathGraph::new(n, &edges).unwrap())
            .unwrap();
        graph
    }

    fn meta_paths() -> Vec<String> {
        vec!["pap".to_string(), "psp".to_string()]
    }

    #[test]
    fn sampled_pass_partitions_the_seed_set() {
        let graph = ring_graph(23);
        let mut sampler = NeighborSampler::new(&graph, &meta_paths(), 5, 2, Some(7)).unwrap();
        let seeds: Vec<usize> = (0..23).collect();

        let mut yielded = Vec::new();
        let mut sizes = Vec::new();
        for batch in sampler.batches(&seeds).unwrap() {
            yielded.extend_from_slice(&batch.seeds);
            sizes.push(batch.seeds.len());
        }

        let unique: HashSet<usize> = yielded.iter().copied().collect();
        assert_eq!(yielded.len(), seeds.len(), "no duplicate seeds in a pass");
        assert_eq!(unique, seeds.iter().copied().collect::<HashSet<_>>());
        assert_eq!(sizes, vec![5, 5, 5, 5, 3], "last chunk may be short");
    }

    #[test]
    fn fan_out_bounds_sampled_neighborhoods() {
        let graph = ring_graph(10);
        let mut sampler = NeighborSampler::new(&graph, &meta_paths(), 4, 1, Some(3)).unwrap();
        let seeds: Vec<usize> = (0..10).collect();

        for batch in sampler.batches(&seeds).unwrap() {
            for (name, block) in &batch.blocks {
                for pos in 0..block.num_seeds() {
                    // fan-out 1 plus the seed itself
                    assert!(
                        block.neighbor_rows(pos).len() <= 2,
                        "metapath {name} exceeded fan-out"
                    );
                }
            }
        }
    }

    #[test]
    fn blocks_reference_materialized_rows() {
        let graph = ring_graph(8);
        let mut sampler = NeighborSampler::new(&graph, &meta_paths(), 3, 2, Some(11)).unwrap();
        let seeds: Vec<usize> = (0..8).collect();

        for batch in sampler.batches(&seeds).unwrap() {
            for (name, block) in &batch.blocks {
                let inputs = &batch.input_nodes[name];
                for pos in 0..block.num_seeds() {
                    let rows = block.neighbor_rows(pos);
                    assert!(rows.iter().all(|&r| r < inputs.len()));
                    // the seed itself is always part of its neighborhood
                    assert!(rows.iter().any(|&r| inputs[r] == batch.seeds[pos]));
                }
            }
        }
    }

    #[test]
    fn full_source_yields_one_covering_batch() {
        let graph = ring_graph(6);
        let mut source = FullGraphSource::new(&graph, &meta_paths()).unwrap();
        let seeds: Vec<usize> = (0..6).collect();

        let batches: Vec<MetapathBatch> = source.batches(&seeds).unwrap().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].seeds, seeds);
        // ring nodes have two neighbors plus themselves
        let block = &batches[0].blocks["pap"];
        assert!((0..6).all(|pos| block.neighbor_rows(pos).len() == 3));
    }

    #[test]
    fn unknown_metapath_is_rejected_at_construction() {
        let graph = ring_graph(4);
        let bad = vec!["nope".to_string()];
        assert!(NeighborSampler::new(&graph, &bad, 2, 2, Some(1)).is_err());
        assert!(FullGraphSource::new(&graph, &bad).is_err());
    }
}
