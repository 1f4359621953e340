//! Strongly-connected-component analysis over a [`DepGraph`].
//!
//! Two entry points matter to the protocol:
//!
//! - [`DepGraph::find_scc`] -- plain Tarjan from a start vertex, returning
//!   the single component containing it. No ordering guarantees.
//! - [`DepGraph::find_sorted_scc`] -- the same component linearized into
//!   the protocol's commit order. The order is a pure function of the
//!   current edge set and the vertex ids, so any two replicas holding the
//!   same edges produce the same sequence regardless of how the edges
//!   arrived.
//!
//! # Linearization rules
//!
//! Within the component, only "type-2" edges (relation mask >= [`RW`])
//! constrain the order: a write-write conflict was already serialized by
//! row locking, while any dependency involving a read must be respected.
//! Members without a type-2 predecessor inside the component are roots,
//! consumed largest-id-first; a member becomes eligible once all of its
//! in-component type-2 predecessors have been emitted, and simultaneously
//! eligible members are again consumed largest-id-first. Sorting by id
//! gives cross-replica determinism independent of insertion order.
//!
//! Tarjan runs on an explicit machine stack with a per-vertex on-stack
//! flag, so deep chains neither overflow the call stack nor pay a linear
//! stack scan per edge.

use alloc::{vec, vec::Vec};

use hashbrown::HashSet;

use super::depgraph::{DepGraph, VertexIdx, RW};

struct TarjanState {
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    next_index: u32,
    stack: Vec<VertexIdx>,
}

impl TarjanState {
    fn new(vertices: usize) -> Self {
        Self {
            index: vec![None; vertices],
            lowlink: vec![0; vertices],
            on_stack: vec![false; vertices],
            next_index: 0,
            stack: Vec::new(),
        }
    }

    fn visit(&mut self, v: VertexIdx) {
        self.index[v.slot()] = Some(self.next_index);
        self.lowlink[v.slot()] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v.slot()] = true;
    }
}

struct Frame {
    v: VertexIdx,
    successors: Vec<VertexIdx>,
    next: usize,
}

impl<T> DepGraph<T> {
    fn successors_of(&self, v: VertexIdx) -> Vec<VertexIdx> {
        self.vertex(v).outgoing().map(|(w, _)| w).collect()
    }

    /// Iterative Tarjan from `root`. Completed components are appended to
    /// `components` in postorder; the component containing `root` is
    /// always the last one appended.
    fn strong_connect(
        &self,
        root: VertexIdx,
        state: &mut TarjanState,
        components: &mut Vec<Vec<VertexIdx>>,
    ) {
        debug_assert!(state.index[root.slot()].is_none());

        state.visit(root);
        let mut frames = vec![Frame {
            v: root,
            successors: self.successors_of(root),
            next: 0,
        }];

        while let Some(frame) = frames.last_mut() {
            let v = frame.v;

            if frame.next < frame.successors.len() {
                let w = frame.successors[frame.next];
                frame.next += 1;

                if state.index[w.slot()].is_none() {
                    state.visit(w);
                    frames.push(Frame {
                        v: w,
                        successors: self.successors_of(w),
                        next: 0,
                    });
                } else if state.on_stack[w.slot()] {
                    let w_index = state.index[w.slot()].expect("visited vertex has an index");
                    state.lowlink[v.slot()] = state.lowlink[v.slot()].min(w_index);
                }
                continue;
            }

            let v_index = state.index[v.slot()].expect("visited vertex has an index");
            if state.lowlink[v.slot()] == v_index {
                let mut component = Vec::new();
                loop {
                    let w = state
                        .stack
                        .pop()
                        .expect("component root is still on the tarjan stack");
                    state.on_stack[w.slot()] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }

            frames.pop();
            if let Some(parent) = frames.last() {
                let p = parent.v.slot();
                state.lowlink[p] = state.lowlink[p].min(state.lowlink[v.slot()]);
            }
        }
    }

    /// The strongly connected component containing `v`.
    ///
    /// Ordering within the returned component is unspecified; use
    /// [`find_sorted_scc`] for the commit order.
    ///
    /// [`find_sorted_scc`]: DepGraph::find_sorted_scc
    #[must_use]
    pub fn find_scc(&self, v: VertexIdx) -> Vec<VertexIdx> {
        let mut state = TarjanState::new(self.len());
        let mut components = Vec::new();
        self.strong_connect(v, &mut state, &mut components);
        let component = components
            .pop()
            .expect("tarjan from a vertex yields its component");
        debug_assert!(component.contains(&v));
        component
    }

    /// Decompose the whole graph into strongly connected components, in
    /// postorder of the underlying Tarjan traversal.
    #[must_use]
    pub fn all_scc(&self) -> Vec<Vec<VertexIdx>> {
        let mut state = TarjanState::new(self.len());
        let mut components = Vec::new();
        for (v, _) in self.iter() {
            if state.index[v.slot()].is_none() {
                self.strong_connect(v, &mut state, &mut components);
            }
        }
        components
    }

    /// The component containing `v`, linearized into the commit order.
    ///
    /// Replicas that hold the same set of edges produce identical
    /// sequences; the order depends only on edge masks and vertex ids.
    ///
    /// # Panics
    ///
    /// Panics when the component's type-2 subgraph has no root, or when
    /// the emitted order does not cover the whole component. Both indicate
    /// a corrupted graph and the process must not continue from one.
    #[must_use]
    pub fn find_sorted_scc(&self, v: VertexIdx) -> Vec<VertexIdx> {
        let scc = self.find_scc(v);
        assert!(!scc.is_empty(), "strongly connected component is empty");
        let scc_set: HashSet<VertexIdx> = scc.iter().copied().collect();
        assert_eq!(scc_set.len(), scc.len(), "component contains duplicates");

        let scc_ref = &scc_set;
        let in_scc_type2_parents = move |m: VertexIdx| {
            self.vertex(m)
                .incoming()
                .filter(move |&(p, r)| r >= RW && scc_ref.contains(&p))
                .map(|(p, _)| p)
        };

        // Roots of the type-2 subgraph restricted to the component.
        let mut work: Vec<VertexIdx> = scc_set
            .iter()
            .copied()
            .filter(|&m| in_scc_type2_parents(m).next().is_none())
            .collect();
        assert!(
            !work.is_empty(),
            "component of size {} has no type-2 root",
            scc.len()
        );

        // The work list is consumed from the back, so ascending sort keys
        // yield the largest-id-first convention.
        work.sort_unstable_by_key(|&m| self.id_of(m));

        let mut emitted: HashSet<VertexIdx> = HashSet::with_capacity(scc.len());
        let mut order: Vec<VertexIdx> = Vec::with_capacity(scc.len());

        while let Some(m) = work.pop() {
            emitted.insert(m);
            order.push(m);

            let mut children: Vec<VertexIdx> = self
                .vertex(m)
                .outgoing()
                .filter(|&(w, r)| r >= RW && scc_set.contains(&w))
                .map(|(w, _)| w)
                .collect();
            children.sort_unstable_by_key(|&w| self.id_of(w));

            for child in children {
                if in_scc_type2_parents(child).all(|p| emitted.contains(&p)) {
                    work.push(child);
                }
            }
        }

        assert_eq!(
            order.len(),
            scc.len(),
            "linearization does not cover the component"
        );
        order
    }
}
