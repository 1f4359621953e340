use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

/// Write-write conflict bit.
pub const WW: u8 = 1;
/// Read-write / write-read conflict bit. Relations at or above this value
/// ("type-2") constrain the execution order inside a component; plain
/// write-write edges do not.
pub const RW: u8 = 2;

/// Dense handle into a graph's vertex arena.
///
/// Handles are only meaningful within the graph that issued them and are
/// invalidated by nothing during normal operation: vertices are never
/// deleted while their graph is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexIdx(u32);

impl VertexIdx {
    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Payload carried by every vertex of a [`DepGraph`].
///
/// `union_data` merges the observation of the same vertex arriving from
/// another graph and must be monotonic, so that aggregation commutes and
/// repeated deliveries are idempotent. `trigger` fires exactly once per
/// touched vertex at the end of an aggregate.
pub trait VertexData {
    fn new(id: u64) -> Self;
    fn union_data(&mut self, other: &Self, is_client_view: bool, is_server: bool);
    fn trigger(&mut self);
}

#[derive(Debug, Clone)]
pub struct Vertex<T> {
    id: u64,
    pub data: T,
    outgoing: HashMap<VertexIdx, u8>,
    incoming: HashMap<VertexIdx, u8>,
}

impl<T> Vertex<T> {
    fn new(id: u64, data: T) -> Self {
        Self {
            id,
            data,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn out_degree(&self) -> usize {
        self.outgoing.len()
    }

    /// Successors with their relation masks, in arbitrary order.
    pub fn outgoing(&self) -> impl Iterator<Item = (VertexIdx, u8)> + '_ {
        self.outgoing.iter().map(|(&v, &r)| (v, r))
    }

    /// Predecessors with their relation masks, in arbitrary order.
    pub fn incoming(&self) -> impl Iterator<Item = (VertexIdx, u8)> + '_ {
        self.incoming.iter().map(|(&v, &r)| (v, r))
    }
}

/// Arena-backed dependency graph indexed by 64-bit vertex id.
///
/// The graph owns its vertices exclusively; ids are never reused within a
/// graph's lifetime. The incoming map of every vertex mirrors the outgoing
/// maps of its predecessors with identical relation masks, and the graph
/// API is the only writer of either, so the mirror cannot drift.
#[derive(Debug, Clone, Default)]
pub struct DepGraph<T> {
    vertices: Vec<Vertex<T>>,
    index: HashMap<u64, VertexIdx>,
}

impl<T> DepGraph<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: u64) -> Option<VertexIdx> {
        self.index.get(&id).copied()
    }

    /// Insert a vertex under a fresh id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already present; ids are unique for the lifetime
    /// of a graph.
    pub fn add_vertex(&mut self, id: u64, data: T) -> VertexIdx {
        #[allow(clippy::cast_possible_truncation)]
        let idx = VertexIdx(self.vertices.len() as u32);
        let prev = self.index.insert(id, idx);
        assert!(prev.is_none(), "vertex id {id} already present in graph");
        self.vertices.push(Vertex::new(id, data));
        idx
    }

    #[must_use]
    pub fn vertex(&self, v: VertexIdx) -> &Vertex<T> {
        &self.vertices[v.slot()]
    }

    pub fn vertex_mut(&mut self, v: VertexIdx) -> &mut Vertex<T> {
        &mut self.vertices[v.slot()]
    }

    #[must_use]
    pub fn id_of(&self, v: VertexIdx) -> u64 {
        self.vertices[v.slot()].id
    }

    /// All vertex handles, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (VertexIdx, &Vertex<T>)> {
        #[allow(clippy::cast_possible_truncation)]
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexIdx(i as u32), v))
    }

    /// Set the relation of edge `u -> v`, overwriting any previous mask.
    ///
    /// Callers that want the OR-merge semantics use [`or_edge`] or
    /// [`aggregate`].
    ///
    /// [`or_edge`]: DepGraph::or_edge
    /// [`aggregate`]: DepGraph::aggregate
    pub fn add_edge(&mut self, u: VertexIdx, v: VertexIdx, relation: u8) {
        self.vertices[u.slot()].outgoing.insert(v, relation);
        self.vertices[v.slot()].incoming.insert(u, relation);
    }

    /// OR `relation` into the mask of edge `u -> v`, creating it if absent.
    pub fn or_edge(&mut self, u: VertexIdx, v: VertexIdx, relation: u8) {
        *self.vertices[u.slot()].outgoing.entry(v).or_insert(0) |= relation;
        *self.vertices[v.slot()].incoming.entry(u).or_insert(0) |= relation;
    }

    #[must_use]
    pub fn edge(&self, u: VertexIdx, v: VertexIdx) -> Option<u8> {
        self.vertices[u.slot()].outgoing.get(&v).copied()
    }

    /// Walk predecessors of `from` up to `depth` hops, visiting each vertex
    /// at most once. A negative depth walks without bound. The traversal
    /// stops early and returns `false` as soon as `visit` does.
    pub fn traverse_pred<F>(&self, from: VertexIdx, depth: i64, visit: &mut F) -> bool
    where
        F: FnMut(VertexIdx) -> bool,
    {
        let mut walked = HashSet::new();
        self.traverse_pred_inner(from, depth, visit, &mut walked)
    }

    fn traverse_pred_inner<F>(
        &self,
        vertex: VertexIdx,
        depth: i64,
        visit: &mut F,
        walked: &mut HashSet<VertexIdx>,
    ) -> bool
    where
        F: FnMut(VertexIdx) -> bool,
    {
        if !walked.insert(vertex) {
            return true;
        }
        for (&p, _) in &self.vertices[vertex.slot()].incoming {
            if !visit(p) {
                return false;
            }
            if depth != 0 && !self.traverse_pred_inner(p, depth - 1, visit, walked) {
                return false;
            }
        }
        true
    }
}

impl<T> DepGraph<T>
where
    T: VertexData,
{
    pub fn find_or_create(&mut self, id: u64) -> VertexIdx {
        self.find(id)
            .unwrap_or_else(|| self.add_vertex(id, T::new(id)))
    }
}

impl<T> DepGraph<T>
where
    T: VertexData + Clone,
{
    /// Union `other` into this graph.
    ///
    /// Every vertex of `other` is matched to a local vertex by id (created
    /// if absent) and its payload merged through
    /// [`VertexData::union_data`]; every edge of `other` is OR-merged into
    /// the local edge mask. After all edges have merged, each touched
    /// vertex's [`VertexData::trigger`] fires exactly once. The order of
    /// the trigger fan-out is unspecified.
    ///
    /// Payloads are copied, never shared: a `TxnInfo` belongs to exactly
    /// one graph.
    ///
    /// # Panics
    ///
    /// Panics if `other` is empty; empty graphs exist only as freshly
    /// constructed holders and are never exchanged.
    pub fn aggregate(&mut self, other: &Self, is_server: bool) -> Vec<VertexIdx> {
        assert!(!other.is_empty(), "aggregate of an empty graph");

        let mut touched = Vec::with_capacity(other.len());
        for ov in &other.vertices {
            let local = match self.find(ov.id) {
                Some(v) => {
                    self.vertices[v.slot()]
                        .data
                        .union_data(&ov.data, false, is_server);
                    v
                }
                None => self.add_vertex(ov.id, ov.data.clone()),
            };

            for (&ot, &relation) in &ov.outgoing {
                let target = &other.vertices[ot.slot()];
                let lt = match self.find(target.id) {
                    Some(v) => v,
                    None => self.add_vertex(target.id, target.data.clone()),
                };
                self.or_edge(local, lt, relation);
            }

            touched.push(local);
        }

        for &v in &touched {
            self.vertices[v.slot()].data.trigger();
        }
        touched
    }
}
