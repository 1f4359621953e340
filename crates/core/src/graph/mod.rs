pub mod depgraph;
pub mod scc;

pub use depgraph::{DepGraph, Vertex, VertexData, VertexIdx, RW, WW};
