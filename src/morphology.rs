// src/morphology.rs - Thinning, skeleton graph and iterative spur pruning

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::Bfs;

use crate::binary::BinaryMask;
use crate::config::Config;
use crate::geometry::{define_structure, path_length, Connectivity, Pixel};

/// Neighbor offsets in thinning order: E, NE, N, NW, W, SW, S, SE
const THINNING_NEIGHBORHOOD: [(i64, i64); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Reduce every foreground region to a 1-pixel-wide, 8-connected curve.
///
/// Two-subiteration parallel thinning (Guo-Hall conditions as refined by
/// Lam, Lee and Suen). Only simple points are deleted, so the number of
/// components and holes of the input is preserved.
pub fn thin(mask: &BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let mut current = mask.clone();
    let mut passes = 0usize;

    loop {
        let mut changed = false;
        for first_pass in [true, false] {
            let deletions: Vec<Pixel> = current
                .foreground()
                .into_iter()
                .filter(|&(x, y)| is_deletable(&current, x, y, first_pass))
                .collect();

            if !deletions.is_empty() {
                changed = true;
                for (x, y) in deletions {
                    current.set(x, y, false);
                }
            }
        }
        passes += 1;

        if !changed {
            break;
        }
    }

    log::debug!("Thinning converged after {} passes on {}x{} mask", passes, width, height);
    current
}

fn is_deletable(mask: &BinaryMask, x: u32, y: u32, first_pass: bool) -> bool {
    let mut p = [false; 8];
    for (i, (dx, dy)) in THINNING_NEIGHBORHOOD.iter().enumerate() {
        p[i] = mask.get_signed(x as i64 + dx, y as i64 + dy);
    }
    // p[0] = x1 ... p[7] = x8, x9 wraps to x1
    let nb = |i: usize| p[(i - 1) % 8];

    // G1: Hilditch crossing number
    let crossing: usize = (1..=4)
        .filter(|&i| !nb(2 * i - 1) && (nb(2 * i) || nb(2 * i + 1)))
        .count();
    if crossing != 1 {
        return false;
    }

    // G2
    let n1: usize = (1..=4).filter(|&k| nb(2 * k - 1) || nb(2 * k)).count();
    let n2: usize = (1..=4).filter(|&k| nb(2 * k) || nb(2 * k + 1)).count();
    let m = n1.min(n2);
    if !(2..=3).contains(&m) {
        return false;
    }

    // G3 / G3'
    if first_pass {
        !((nb(2) || nb(3) || !nb(8)) && nb(1))
    } else {
        !((nb(6) || nb(7) || !nb(4)) && nb(5))
    }
}

/// Skeleton as an explicit pixel graph.
///
/// Nodes are foreground pixels. Orthogonal neighbors are always joined;
/// diagonal neighbors are joined only when no shared orthogonal neighbor is
/// foreground, so staircase corners do not create spurious branch points.
#[derive(Debug, Clone)]
pub struct Skeleton {
    width: u32,
    height: u32,
    graph: StableUnGraph<Pixel, ()>,
    index: HashMap<Pixel, NodeIndex>,
}

impl Skeleton {
    /// Build the graph of an already thin mask
    pub fn from_mask(mask: &BinaryMask) -> Self {
        let (width, height) = mask.dimensions();
        Self::from_pixels(width, height, &mask.foreground())
    }

    pub fn from_pixels(width: u32, height: u32, pixels: &[Pixel]) -> Self {
        let mut graph = StableUnGraph::default();
        let mut index = HashMap::with_capacity(pixels.len());

        let mut sorted: Vec<Pixel> = pixels
            .iter()
            .copied()
            .filter(|&(x, y)| x < width && y < height)
            .collect();
        sorted.sort_by_key(|&(x, y)| (y, x));
        sorted.dedup();

        for &p in &sorted {
            let node = graph.add_node(p);
            index.insert(p, node);
        }

        let se = define_structure(Connectivity::Eight);
        for &p in &sorted {
            for n in se.neighbors(p, width, height) {
                // each pair once
                if (n.1, n.0) <= (p.1, p.0) || !index.contains_key(&n) {
                    continue;
                }
                let diagonal = n.0 != p.0 && n.1 != p.1;
                if diagonal
                    && (index.contains_key(&(n.0, p.1)) || index.contains_key(&(p.0, n.1)))
                {
                    continue;
                }
                graph.add_edge(index[&p], index[&n], ());
            }
        }

        Self {
            width,
            height,
            graph,
            index,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Pixels in raster order
    pub fn pixels(&self) -> Vec<Pixel> {
        let mut pixels: Vec<Pixel> = self.graph.node_indices().map(|n| self.graph[n]).collect();
        pixels.sort_by_key(|&(x, y)| (y, x));
        pixels
    }

    pub fn degree(&self, p: Pixel) -> Option<usize> {
        self.index.get(&p).map(|&n| self.node_degree(n))
    }

    fn node_degree(&self, n: NodeIndex) -> usize {
        self.graph.neighbors(n).count()
    }

    /// Degree-1 pixels in raster order
    pub fn endpoints(&self) -> Vec<Pixel> {
        self.pixels()
            .into_iter()
            .filter(|&p| self.degree(p) == Some(1))
            .collect()
    }

    /// Degree-3+ pixels in raster order
    pub fn branch_points(&self) -> Vec<Pixel> {
        self.pixels()
            .into_iter()
            .filter(|&p| self.degree(p).map_or(false, |d| d >= 3))
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Connected components, ordered by their first pixel in raster order
    fn components(&self) -> Vec<Vec<NodeIndex>> {
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut components = Vec::new();

        for p in self.pixels() {
            let start = self.index[&p];
            if seen.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(n) = bfs.next(&self.graph) {
                seen.insert(n);
                component.push(n);
            }
            components.push(component);
        }

        components
    }

    pub fn component_count(&self) -> usize {
        self.components().len()
    }

    /// Number of independent loops (edges - nodes + components)
    pub fn cycle_rank(&self) -> usize {
        (self.edge_count() + self.component_count()).saturating_sub(self.pixel_count())
    }

    pub fn to_mask(&self) -> BinaryMask {
        BinaryMask::from_pixels(self.width, self.height, &self.pixels())
    }

    fn remove(&mut self, n: NodeIndex) {
        if let Some(p) = self.graph.remove_node(n) {
            self.index.remove(&p);
        }
    }
}

/// Thin a mask and return its skeleton graph
pub fn skeletonize(mask: &BinaryMask) -> Skeleton {
    Skeleton::from_mask(&thin(mask))
}

/// One fiber: a simple path of skeleton pixels, ordered endpoint to endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// 1-based number in raster order of the path's first pixel
    pub label: usize,
    pub path: Vec<Pixel>,
    /// Pixels removed from this component by pruning
    pub pruned_pixels: usize,
}

impl Element {
    pub fn pixel_count(&self) -> usize {
        self.path.len()
    }

    /// Euclidean arc length in pixels
    pub fn length(&self) -> f64 {
        path_length(&self.path)
    }
}

/// Why a component did not become an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Branch points survive the iteration bound
    IterationBoundReached { iterations: usize },
    /// Branch points remain but every branch is at least the spur length
    UnresolvedBranches,
    /// Pruning would leave less than the minimum element length
    WouldRemoveComponent,
    /// The component is a closed loop with no endpoints
    ClosedLoop,
    /// The component is a simple path shorter than the minimum element length
    TooShort,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::IterationBoundReached { iterations } => {
                write!(f, "branch points remain after {} pruning rounds", iterations)
            }
            ExclusionReason::UnresolvedBranches => write!(f, "branches longer than spur length"),
            ExclusionReason::WouldRemoveComponent => write!(f, "pruning would remove the component"),
            ExclusionReason::ClosedLoop => write!(f, "closed loop"),
            ExclusionReason::TooShort => write!(f, "shorter than minimum element length"),
        }
    }
}

/// A skeleton component excluded from measurement, with its diagnostic flag
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedComponent {
    pub label: usize,
    pub pixel_count: usize,
    pub reason: ExclusionReason,
}

/// Pruning parameters
#[derive(Debug, Clone, Copy)]
pub struct PruneConfig {
    /// Endpoint branches with fewer pixels than this are removed
    pub min_spur_length: usize,
    /// Maximum number of removal rounds per component
    pub max_iterations: usize,
    /// Minimum pixels a component must keep to become an element
    pub min_element_length: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            min_spur_length: 10,
            max_iterations: 50,
            min_element_length: 10,
        }
    }
}

impl PruneConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_spur_length: config.min_spur_length,
            max_iterations: config.max_prune_iterations,
            min_element_length: config.min_element_length,
        }
    }
}

/// Result of pruning a skeleton
#[derive(Debug, Clone, Default)]
pub struct PruneOutcome {
    pub elements: Vec<Element>,
    pub excluded: Vec<ExcludedComponent>,
}

impl PruneOutcome {
    /// Skeleton made of the surviving elements only
    pub fn to_skeleton(&self, width: u32, height: u32) -> Skeleton {
        let pixels: Vec<Pixel> = self
            .elements
            .iter()
            .flat_map(|e| e.path.iter().copied())
            .collect();
        Skeleton::from_pixels(width, height, &pixels)
    }
}

fn raster_first(pixels: impl Iterator<Item = Pixel>) -> Option<Pixel> {
    pixels.min_by_key(|&(x, y)| (y, x))
}

/// Iteratively remove short endpoint branches until every component is a
/// simple path, or exclude it with a diagnostic flag.
///
/// Each round removes every spur shorter than `min_spur_length` and then
/// re-evaluates endpoints, stopping at a fixed point. A component that is
/// already a simple path is left untouched, so pruning is idempotent.
///
/// Elements are labelled `1..=n` in raster order of the first pixel of their
/// pruned path, so pruning the result again keeps every label. Excluded
/// components follow as `n+1..` in raster order of their first pixel.
pub fn prune(skeleton: &Skeleton, config: &PruneConfig) -> PruneOutcome {
    let mut work = skeleton.clone();
    let mut kept: Vec<(Option<Pixel>, Vec<Pixel>, usize)> = Vec::new();
    let mut dropped: Vec<(Option<Pixel>, usize, ExclusionReason)> = Vec::new();

    for component in skeleton.components() {
        let original = component.len();
        let first = raster_first(component.iter().map(|&n| skeleton.graph[n]));

        match prune_component(&mut work, component, config) {
            Ok(path) => kept.push((raster_first(path.iter().copied()), path, original)),
            Err(reason) => {
                log::debug!("Skeleton component at {:?} ({} px) excluded: {}", first, original, reason);
                dropped.push((first, original, reason));
            }
        }
    }

    let raster = |p: &Option<Pixel>| p.map(|(x, y)| (y, x));
    kept.sort_by_key(|(first, _, _)| raster(first));
    dropped.sort_by_key(|(first, _, _)| raster(first));

    let elements: Vec<Element> = kept
        .into_iter()
        .enumerate()
        .map(|(i, (_, path, original))| Element {
            label: i + 1,
            pruned_pixels: original - path.len(),
            path,
        })
        .collect();

    let excluded = dropped
        .into_iter()
        .enumerate()
        .map(|(i, (_, pixel_count, reason))| ExcludedComponent {
            label: elements.len() + i + 1,
            pixel_count,
            reason,
        })
        .collect();

    PruneOutcome { elements, excluded }
}

fn prune_component(
    work: &mut Skeleton,
    mut alive: Vec<NodeIndex>,
    config: &PruneConfig,
) -> std::result::Result<Vec<Pixel>, ExclusionReason> {
    for round in 0..=config.max_iterations {
        let has_branches = alive.iter().any(|&n| work.node_degree(n) >= 3);

        if !has_branches {
            return finish_component(work, &alive, config);
        }

        if round == config.max_iterations {
            return Err(ExclusionReason::IterationBoundReached { iterations: round });
        }

        let endpoints: Vec<NodeIndex> = alive
            .iter()
            .copied()
            .filter(|&n| work.node_degree(n) == 1)
            .collect();

        let mut marked: Vec<NodeIndex> = Vec::new();
        for endpoint in endpoints {
            if let Some(spur) = trace_spur(work, endpoint) {
                if spur.len() < config.min_spur_length {
                    marked.extend(spur);
                }
            }
        }

        if marked.is_empty() {
            return Err(ExclusionReason::UnresolvedBranches);
        }

        let remaining = alive.len() - marked.len();
        if remaining == 0 || remaining < config.min_element_length {
            return Err(ExclusionReason::WouldRemoveComponent);
        }

        let marked_set: HashSet<NodeIndex> = marked.iter().copied().collect();
        for n in marked {
            work.remove(n);
        }
        alive.retain(|n| !marked_set.contains(n));
    }

    Err(ExclusionReason::IterationBoundReached {
        iterations: config.max_iterations,
    })
}

/// Pixels from an endpoint up to (not including) the first branch point.
/// `None` when the walk ends at another endpoint instead.
fn trace_spur(work: &Skeleton, endpoint: NodeIndex) -> Option<Vec<NodeIndex>> {
    let mut spur = vec![endpoint];
    let mut prev = endpoint;
    let mut current = work.graph.neighbors(endpoint).next()?;

    loop {
        match work.node_degree(current) {
            2 => {
                spur.push(current);
                let next = work.graph.neighbors(current).find(|&n| n != prev)?;
                prev = current;
                current = next;
            }
            d if d >= 3 => return Some(spur),
            _ => return None,
        }
    }
}

/// Classify a branch-free component and order its path
fn finish_component(
    work: &Skeleton,
    alive: &[NodeIndex],
    config: &PruneConfig,
) -> std::result::Result<Vec<Pixel>, ExclusionReason> {
    let mut endpoints: Vec<NodeIndex> = alive
        .iter()
        .copied()
        .filter(|&n| work.node_degree(n) == 1)
        .collect();

    if alive.len() == 1 {
        return Err(ExclusionReason::TooShort);
    }
    if endpoints.len() != 2 {
        return Err(ExclusionReason::ClosedLoop);
    }

    // Start from the endpoint that comes first in raster order
    endpoints.sort_by_key(|&n| {
        let (x, y) = work.graph[n];
        (y, x)
    });

    let mut path = vec![work.graph[endpoints[0]]];
    let mut prev = endpoints[0];
    let mut current = work.graph.neighbors(prev).next();

    while let Some(node) = current {
        path.push(work.graph[node]);
        let next = work.graph.neighbors(node).find(|&n| n != prev);
        prev = node;
        current = next;
    }

    if path.len() < config.min_element_length {
        return Err(ExclusionReason::TooShort);
    }

    Ok(path)
}
