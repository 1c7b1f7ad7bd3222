//! Graph partitioning for the block-Jacobi preconditioner.
//!
//! The Jacobian's symmetrized pattern is partitioned into approximately
//! equal vertex blocks. A level-set recursive bisection serves as the
//! Metis-style partitioner; a contiguous splitter exists for tests and for
//! matrices with no useful structure.

use crate::sparse::SparseLayout;

/// Undirected adjacency of a sparse matrix: the pattern of A + Aᵀ without
/// self-loops, in compressed form.
pub struct Adjacency {
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
}

impl Adjacency {
    pub fn from_matrix<L: SparseLayout>(m: &L) -> Self {
        let n = m.nrows().max(m.ncols());
        let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(2 * m.nnz());
        m.for_each_entry(|r, c, _| {
            if r != c {
                pairs.push((r, c));
                pairs.push((c, r));
            }
        });
        pairs.sort_unstable();
        pairs.dedup();

        let mut offsets = vec![0usize; n + 1];
        for &(r, _) in &pairs {
            offsets[r + 1] += 1;
        }
        for i in 1..=n {
            offsets[i] += offsets[i - 1];
        }
        let neighbors = pairs.into_iter().map(|(_, c)| c).collect();
        Self { offsets, neighbors }
    }

    pub fn nvertices(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn neighbors(&self, v: usize) -> &[usize] {
        &self.neighbors[self.offsets[v]..self.offsets[v + 1]]
    }
}

/// Graph partitioner. Returns a partition ID per vertex; IDs are dense in
/// `0..nparts` (a part may be empty only when nparts exceeds the vertex count).
pub trait Partitioner {
    fn partition(&self, adjacency: &Adjacency, nparts: usize) -> Vec<usize>;
}

/// Recursive level-set bisection: BFS from a pseudo-peripheral vertex orders
/// each subset, which is then split proportionally and recursed.
pub struct RecursiveBisection;

impl Partitioner for RecursiveBisection {
    fn partition(&self, adjacency: &Adjacency, nparts: usize) -> Vec<usize> {
        let n = adjacency.nvertices();
        let mut parts = vec![0usize; n];
        if nparts <= 1 || n == 0 {
            return parts;
        }
        let vertices: Vec<usize> = (0..n).collect();
        let mut scratch = BfsScratch::new(n);
        let mut next_id = 0;
        bisect(
            adjacency,
            &vertices,
            nparts.min(n),
            &mut next_id,
            &mut parts,
            &mut scratch,
        );
        parts
    }
}

/// Splits `0..n` into `nparts` equal contiguous ranges, ignoring structure.
pub struct Contiguous;

impl Partitioner for Contiguous {
    fn partition(&self, adjacency: &Adjacency, nparts: usize) -> Vec<usize> {
        let n = adjacency.nvertices();
        let p = nparts.max(1);
        (0..n).map(|v| (v * p / n.max(1)).min(p - 1)).collect()
    }
}

struct BfsScratch {
    /// in_set[v] == stamp marks membership of the current subset.
    in_set: Vec<usize>,
    /// visited[v] == stamp marks BFS discovery.
    visited: Vec<usize>,
    stamp: usize,
}

impl BfsScratch {
    fn new(n: usize) -> Self {
        Self {
            in_set: vec![usize::MAX; n],
            visited: vec![usize::MAX; n],
            stamp: 0,
        }
    }
}

fn bisect(
    adj: &Adjacency,
    vertices: &[usize],
    nparts: usize,
    next_id: &mut usize,
    parts: &mut [usize],
    scratch: &mut BfsScratch,
) {
    if nparts <= 1 || vertices.len() <= 1 {
        let id = *next_id;
        *next_id += 1;
        for &v in vertices {
            parts[v] = id;
        }
        return;
    }

    let left_parts = nparts / 2;
    let target_left = vertices.len() * left_parts / nparts;
    let order = level_set_order(adj, vertices, scratch);
    let (left, right) = order.split_at(target_left);
    bisect(adj, left, left_parts, next_id, parts, scratch);
    bisect(adj, right, nparts - left_parts, next_id, parts, scratch);
}

/// Order a vertex subset by BFS levels from a pseudo-peripheral start (the
/// last vertex discovered by a first BFS pass). Disconnected pieces are
/// appended in index order.
fn level_set_order(adj: &Adjacency, vertices: &[usize], scratch: &mut BfsScratch) -> Vec<usize> {
    scratch.stamp += 1;
    let stamp = scratch.stamp;
    for &v in vertices {
        scratch.in_set[v] = stamp;
    }

    let first = bfs(adj, vertices, vertices[0], scratch, stamp);
    let start = first.last().copied().unwrap_or(vertices[0]);
    scratch.stamp += 1;
    let stamp = scratch.stamp;
    for &v in vertices {
        scratch.in_set[v] = stamp;
    }
    bfs(adj, vertices, start, scratch, stamp)
}

fn bfs(
    adj: &Adjacency,
    vertices: &[usize],
    start: usize,
    scratch: &mut BfsScratch,
    stamp: usize,
) -> Vec<usize> {
    let mut order = Vec::with_capacity(vertices.len());
    let mut head = 0;
    scratch.visited[start] = stamp;
    order.push(start);

    // Restart from the next unvisited subset vertex when a component runs dry.
    let mut restart_cursor = 0;
    while order.len() < vertices.len() {
        while head < order.len() {
            let v = order[head];
            head += 1;
            for &w in adj.neighbors(v) {
                if scratch.in_set[w] == stamp && scratch.visited[w] != stamp {
                    scratch.visited[w] = stamp;
                    order.push(w);
                }
            }
        }
        while restart_cursor < vertices.len() {
            let v = vertices[restart_cursor];
            restart_cursor += 1;
            if scratch.visited[v] != stamp {
                scratch.visited[v] = stamp;
                order.push(v);
                break;
            }
        }
        if head == order.len() {
            break; // nothing left to grow
        }
    }
    order
}
