//! The fixed wire format for commands, values, and dependency graphs.
//!
//! Every multi-byte integer is little-endian; the layout below is
//! normative and shared by all replicas:
//!
//! ```text
//! graph stream:
//!   i32  vertex_count N          (N > 0; empty graphs are not transmitted)
//!   repeat N times:
//!     u64  vertex_id
//!     payload                    (delegated to the payload codec)
//!     i32  out_degree K
//!     repeat K times:
//!       u64  target_id
//!       i8   relation_mask
//! ```
//!
//! Maps encode as an `i32` entry count followed by key-sorted entries, so
//! equal values encode to equal bytes on every replica. Decoders never
//! trust lengths: every read is bounds-checked and truncation surfaces as
//! [`Error::Truncated`] rather than a panic. The two non-recoverable
//! decoder conditions are a duplicate vertex id inside a single stream
//! and a relinked edge pointing outside the received vertex set; the
//! first is an invariant violation and halts, the second is reported as a
//! framing error.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use bytes::{Buf, BufMut};
use derive_more::From;
use hashbrown::HashSet;

use crate::command::{ContainerCommand, SimpleCommand, Value, MAX_INPUT_ENTRIES};
use crate::graph::depgraph::DepGraph;
use crate::txn::{TxnInfo, TxnStatus};

/// Framing and protocol errors surfaced to the caller. The connection
/// that produced one is dropped and the transaction retried.
#[derive(Debug, PartialEq, Eq, From)]
pub enum Error {
    /// The stream ended before a field was complete.
    Truncated { needed: usize, remaining: usize },
    /// A graph stream advertised zero vertices.
    EmptyGraph,
    /// A count field was negative.
    NegativeCount(i32),
    /// A command input map at or above [`MAX_INPUT_ENTRIES`].
    OversizedInput(usize),
    /// An unknown [`Value`] tag byte.
    UnknownValueTag(u8),
    /// An out-of-range transaction status.
    UnknownStatus(i32),
    /// An edge whose endpoint is not part of the received vertex set.
    DanglingEdge { from: u64, to: u64 },
    /// A string field that is not UTF-8.
    #[from]
    Utf8(alloc::string::FromUtf8Error),
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), Error> {
    if buf.remaining() < needed {
        return Err(Error::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn get_u8<B: Buf>(buf: &mut B) -> Result<u8, Error> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_i32<B: Buf>(buf: &mut B) -> Result<i32, Error> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn get_u32<B: Buf>(buf: &mut B) -> Result<u32, Error> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_i64<B: Buf>(buf: &mut B) -> Result<i64, Error> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}

fn get_u64<B: Buf>(buf: &mut B) -> Result<u64, Error> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_f64<B: Buf>(buf: &mut B) -> Result<f64, Error> {
    ensure(buf, 8)?;
    Ok(buf.get_f64_le())
}

fn get_count<B: Buf>(buf: &mut B) -> Result<usize, Error> {
    let raw = get_i32(buf)?;
    usize::try_from(raw).map_err(|_| Error::NegativeCount(raw))
}

fn put_count<B: BufMut>(buf: &mut B, count: usize) {
    let raw = i32::try_from(count).expect("count fits the i32 wire field");
    buf.put_i32_le(raw);
}

/// Types with a fixed wire encoding.
pub trait WireEncode {
    /// # Errors
    ///
    /// Fails only on checked preconditions such as the command input
    /// guard; plain field writes are infallible.
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), Error>;
}

/// Types with a fixed wire decoding.
pub trait WireDecode: Sized {
    /// # Errors
    ///
    /// Any [`Error`] variant describing why the stream is unusable.
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, Error>;
}

impl WireEncode for Value {
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        buf.put_u8(self.tag());
        match self {
            Self::I32(v) => buf.put_i32_le(*v),
            Self::I64(v) => buf.put_i64_le(*v),
            Self::F64(v) => buf.put_f64_le(*v),
            Self::Str(s) => {
                put_count(buf, s.len());
                buf.put_slice(s.as_bytes());
            }
        }
        Ok(())
    }
}

impl WireDecode for Value {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, Error> {
        match get_u8(buf)? {
            0 => Ok(Self::I32(get_i32(buf)?)),
            1 => Ok(Self::I64(get_i64(buf)?)),
            2 => Ok(Self::F64(get_f64(buf)?)),
            3 => {
                let len = get_count(buf)?;
                ensure(buf, len)?;
                let mut raw = Vec::with_capacity(len);
                raw.resize(len, 0);
                buf.copy_to_slice(&mut raw);
                Ok(Self::Str(String::from_utf8(raw)?))
            }
            tag => Err(Error::UnknownValueTag(tag)),
        }
    }
}

fn put_value_map<B: BufMut>(buf: &mut B, map: &BTreeMap<i32, Value>) -> Result<(), Error> {
    put_count(buf, map.len());
    for (key, value) in map {
        buf.put_i32_le(*key);
        value.encode(buf)?;
    }
    Ok(())
}

fn get_value_map<B: Buf>(buf: &mut B) -> Result<BTreeMap<i32, Value>, Error> {
    let count = get_count(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = get_i32(buf)?;
        map.insert(key, Value::decode(buf)?);
    }
    Ok(map)
}

impl WireEncode for ContainerCommand {
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        buf.put_u64_le(self.id);
        buf.put_i32_le(self.kind);
        buf.put_i32_le(self.inn_id);
        buf.put_u64_le(self.root_id);
        buf.put_i32_le(self.root_kind);
        Ok(())
    }
}

impl WireDecode for ContainerCommand {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, Error> {
        Ok(Self {
            id: get_u64(buf)?,
            kind: get_i32(buf)?,
            inn_id: get_i32(buf)?,
            root_id: get_u64(buf)?,
            root_kind: get_i32(buf)?,
        })
    }
}

impl WireEncode for SimpleCommand {
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        if self.input.len() >= MAX_INPUT_ENTRIES {
            return Err(Error::OversizedInput(self.input.len()));
        }
        self.head.encode(buf)?;
        put_value_map(buf, &self.input)?;
        put_value_map(buf, &self.output)?;
        buf.put_i32_le(self.output_size);
        buf.put_i32_le(self.partition_id);
        buf.put_i64_le(self.timestamp);
        Ok(())
    }
}

impl WireDecode for SimpleCommand {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, Error> {
        Ok(Self {
            head: ContainerCommand::decode(buf)?,
            input: get_value_map(buf)?,
            output: get_value_map(buf)?,
            output_size: get_i32(buf)?,
            partition_id: get_i32(buf)?,
            timestamp: get_i64(buf)?,
        })
    }
}

/// Wire codec for graph vertex payloads.
///
/// Payloads encode after the vertex id and before the edge list, and must
/// not reference other vertices: the decoder materializes every payload
/// before it relinks a single edge.
pub trait PayloadCodec: Sized {
    /// # Errors
    ///
    /// See [`WireEncode::encode`].
    fn encode_payload<B: BufMut>(&self, buf: &mut B) -> Result<(), Error>;

    /// # Errors
    ///
    /// See [`WireDecode::decode`].
    fn decode_payload<B: Buf>(id: u64, buf: &mut B) -> Result<Self, Error>;
}

impl PayloadCodec for TxnInfo {
    fn encode_payload<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        buf.put_i32_le(self.status().as_wire());
        put_count(buf, self.partitions().len());
        for &partition in self.partitions() {
            buf.put_u32_le(partition);
        }
        Ok(())
    }

    fn decode_payload<B: Buf>(id: u64, buf: &mut B) -> Result<Self, Error> {
        let raw_status = get_i32(buf)?;
        let status = TxnStatus::from_wire(raw_status).ok_or(Error::UnknownStatus(raw_status))?;
        let mut info = Self::new(id);
        info.advance_status(status);
        let count = get_count(buf)?;
        for _ in 0..count {
            info.add_partition(get_u32(buf)?);
        }
        Ok(info)
    }
}

/// Encode a whole graph in the canonical form: vertices sorted by id,
/// each edge list sorted by target id.
///
/// # Errors
///
/// [`Error::EmptyGraph`] when `graph` has no vertices; empty graphs are
/// never transmitted.
pub fn encode_graph<T, B>(graph: &DepGraph<T>, buf: &mut B) -> Result<(), Error>
where
    T: PayloadCodec,
    B: BufMut,
{
    if graph.is_empty() {
        return Err(Error::EmptyGraph);
    }
    let mut vertices: Vec<_> = graph.iter().collect();
    vertices.sort_unstable_by_key(|(_, v)| v.id());

    put_count(buf, vertices.len());
    for (_, vertex) in vertices {
        buf.put_u64_le(vertex.id());
        vertex.data.encode_payload(buf)?;

        let mut edges: Vec<(u64, u8)> = vertex
            .outgoing()
            .map(|(t, r)| (graph.id_of(t), r))
            .collect();
        edges.sort_unstable_by_key(|&(t, _)| t);

        put_count(buf, edges.len());
        for (target, relation) in edges {
            buf.put_u64_le(target);
            buf.put_u8(relation);
        }
    }
    Ok(())
}

/// Encode the subgraph induced by `ret_set`: only selected vertices are
/// emitted, and only edges whose both endpoints are selected, so the
/// receiver can always relink what it reads.
///
/// # Errors
///
/// [`Error::EmptyGraph`] when the selection covers no vertex of `graph`.
pub fn encode_subgraph<T, B>(
    graph: &DepGraph<T>,
    ret_set: &HashSet<u64>,
    buf: &mut B,
) -> Result<(), Error>
where
    T: PayloadCodec,
    B: BufMut,
{
    let mut selected: Vec<_> = graph
        .iter()
        .filter(|(_, v)| ret_set.contains(&v.id()))
        .collect();
    debug_assert_eq!(selected.len(), ret_set.len(), "selection names unknown vertices");
    if selected.is_empty() {
        return Err(Error::EmptyGraph);
    }
    selected.sort_unstable_by_key(|(_, v)| v.id());

    put_count(buf, selected.len());
    for (_, vertex) in selected {
        buf.put_u64_le(vertex.id());
        vertex.data.encode_payload(buf)?;

        let mut edges: Vec<(u64, u8)> = vertex
            .outgoing()
            .map(|(t, r)| (graph.id_of(t), r))
            .filter(|(t, _)| ret_set.contains(t))
            .collect();
        edges.sort_unstable_by_key(|&(t, _)| t);

        put_count(buf, edges.len());
        for (target, relation) in edges {
            buf.put_u64_le(target);
            buf.put_u8(relation);
        }
    }
    Ok(())
}

/// Decode a graph stream into a fresh graph.
///
/// Vertices and payloads materialize first; edges are relinked by id
/// afterwards, with duplicate edges OR-merged.
///
/// # Errors
///
/// [`Error::EmptyGraph`] for a zero vertex count, [`Error::DanglingEdge`]
/// for an edge into a vertex the stream never declared, plus the usual
/// framing errors.
///
/// # Panics
///
/// Panics on a duplicate vertex id within one stream; that is a corrupted
/// message no replica may continue from.
pub fn decode_graph<T, B>(buf: &mut B) -> Result<DepGraph<T>, Error>
where
    T: PayloadCodec,
    B: Buf,
{
    let count = get_count(buf)?;
    if count == 0 {
        return Err(Error::EmptyGraph);
    }

    let mut graph = DepGraph::new();
    let mut edges: BTreeMap<(u64, u64), u8> = BTreeMap::new();
    for _ in 0..count {
        let id = get_u64(buf)?;
        let payload = T::decode_payload(id, buf)?;
        assert!(
            graph.find(id).is_none(),
            "duplicate vertex id {id} in graph stream"
        );
        graph.add_vertex(id, payload);

        let degree = get_count(buf)?;
        for _ in 0..degree {
            let target = get_u64(buf)?;
            let relation = get_u8(buf)?;
            *edges.entry((id, target)).or_insert(0) |= relation;
        }
    }

    for ((from, to), relation) in edges {
        let u = graph.find(from).ok_or(Error::DanglingEdge { from, to })?;
        let v = graph.find(to).ok_or(Error::DanglingEdge { from, to })?;
        graph.add_edge(u, v, relation);
    }
    Ok(graph)
}

/// Adapter over a graph being sent or received.
///
/// A decoded stream yields an [`Owned`] marshaler holding a fresh graph;
/// a participant replying with the vertices it observed borrows its local
/// graph together with the selection in [`Subgraph`].
///
/// [`Owned`]: GraphMarshaler::Owned
/// [`Subgraph`]: GraphMarshaler::Subgraph
#[derive(Debug)]
pub enum GraphMarshaler<'a, T> {
    Owned(DepGraph<T>),
    Subgraph {
        graph: &'a DepGraph<T>,
        ret_set: &'a HashSet<u64>,
    },
}

impl<T> GraphMarshaler<'_, T>
where
    T: PayloadCodec,
{
    /// # Errors
    ///
    /// See [`decode_graph`].
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, Error> {
        decode_graph(buf).map(GraphMarshaler::Owned)
    }

    /// # Errors
    ///
    /// See [`encode_graph`] and [`encode_subgraph`].
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        match self {
            Self::Owned(graph) => encode_graph(graph, buf),
            Self::Subgraph { graph, ret_set } => encode_subgraph(graph, ret_set, buf),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &DepGraph<T> {
        match self {
            Self::Owned(graph) => graph,
            Self::Subgraph { graph, .. } => graph,
        }
    }

    /// The decoded graph, if this marshaler owns one.
    #[must_use]
    pub fn into_graph(self) -> Option<DepGraph<T>> {
        match self {
            Self::Owned(graph) => Some(graph),
            Self::Subgraph { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::depgraph::{RW, WW};

    fn roundtrip_value(value: &Value) -> Value {
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        Value::decode(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn value_roundtrip() {
        assert_eq!(roundtrip_value(&Value::I32(-7)), Value::I32(-7));
        assert_eq!(
            roundtrip_value(&Value::I64(1_i64 << 40)),
            Value::I64(1_i64 << 40)
        );
        assert_eq!(roundtrip_value(&Value::F64(2.5)), Value::F64(2.5));
        assert_eq!(
            roundtrip_value(&Value::Str(String::from("shard-a"))),
            Value::Str(String::from("shard-a"))
        );
    }

    #[test]
    fn truncated_value_reports_needed_bytes() {
        let mut buf = Vec::new();
        Value::I64(9).encode(&mut buf).unwrap();
        buf.truncate(3);
        let err = Value::decode(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 8, .. }));
    }

    #[test]
    fn unknown_value_tag_is_rejected() {
        let buf = [9u8, 0, 0, 0, 0];
        assert_eq!(
            Value::decode(&mut &buf[..]),
            Err(Error::UnknownValueTag(9))
        );
    }

    #[test]
    fn command_roundtrip_preserves_field_order() {
        let mut cmd = SimpleCommand::new(
            ContainerCommand {
                id: 77,
                kind: 2,
                inn_id: 1,
                root_id: 70,
                root_kind: 2,
            },
            3,
        );
        cmd.input.insert(0, Value::Str(String::from("x")));
        cmd.input.insert(1, Value::I32(5));
        cmd.output_size = 16;
        cmd.timestamp = 99;

        let mut buf = Vec::new();
        cmd.encode(&mut buf).unwrap();

        // The header is the first 28 bytes, in declaration order.
        assert_eq!(&buf[0..8], &77u64.to_le_bytes());
        assert_eq!(&buf[8..12], &2i32.to_le_bytes());
        assert_eq!(&buf[12..16], &1i32.to_le_bytes());
        assert_eq!(&buf[16..24], &70u64.to_le_bytes());
        assert_eq!(&buf[24..28], &2i32.to_le_bytes());

        let back = SimpleCommand::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn input_guard_boundary() {
        let mut cmd = SimpleCommand::default();
        for key in 0..9_999i32 {
            cmd.input.insert(key, Value::I32(key));
        }
        let mut buf = Vec::new();
        assert!(cmd.encode(&mut buf).is_ok(), "9999 entries encode fine");

        cmd.input.insert(9_999, Value::I32(0));
        buf.clear();
        assert_eq!(
            cmd.encode(&mut buf),
            Err(Error::OversizedInput(MAX_INPUT_ENTRIES))
        );
    }

    fn sample_graph() -> DepGraph<TxnInfo> {
        let mut g: DepGraph<TxnInfo> = DepGraph::new();
        let a = g.find_or_create(10);
        let b = g.find_or_create(20);
        let c = g.find_or_create(30);
        g.vertex_mut(a).data.advance_status(TxnStatus::Decided);
        g.vertex_mut(a).data.add_partition(0);
        g.vertex_mut(b).data.add_partition(1);
        g.add_edge(a, b, WW);
        g.add_edge(b, c, RW);
        g.add_edge(c, a, WW | RW);
        g
    }

    #[test]
    fn graph_roundtrip() {
        let g = sample_graph();
        let mut buf = Vec::new();
        encode_graph(&g, &mut buf).unwrap();

        let back: DepGraph<TxnInfo> = decode_graph(&mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), g.len());
        for (_, vertex) in g.iter() {
            let idx = back.find(vertex.id()).unwrap();
            assert_eq!(back.vertex(idx).data, vertex.data);
            for (t, r) in vertex.outgoing() {
                let bt = back.find(g.id_of(t)).unwrap();
                assert_eq!(back.edge(idx, bt), Some(r));
            }
        }
    }

    #[test]
    fn canonical_encoding_is_stable() {
        let g = sample_graph();
        let mut first = Vec::new();
        let mut second = Vec::new();
        encode_graph(&g, &mut first).unwrap();
        encode_graph(&g, &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_vertex_stream_is_a_framing_error() {
        let buf = 0i32.to_le_bytes();
        let err = decode_graph::<TxnInfo, _>(&mut &buf[..]).unwrap_err();
        assert_eq!(err, Error::EmptyGraph);
    }

    #[test]
    fn empty_graph_refuses_to_encode() {
        let g: DepGraph<TxnInfo> = DepGraph::new();
        let mut buf = Vec::new();
        assert_eq!(encode_graph(&g, &mut buf), Err(Error::EmptyGraph));
    }

    #[test]
    fn duplicate_stream_edges_or_their_masks() {
        // Hand-build a stream where 1 -> 2 appears twice with different bits.
        let mut buf = Vec::new();
        buf.put_i32_le(2);

        buf.put_u64_le(1);
        TxnInfo::new(1).encode_payload(&mut buf).unwrap();
        buf.put_i32_le(2);
        buf.put_u64_le(2);
        buf.put_u8(WW);
        buf.put_u64_le(2);
        buf.put_u8(RW);

        buf.put_u64_le(2);
        TxnInfo::new(2).encode_payload(&mut buf).unwrap();
        buf.put_i32_le(0);

        let g: DepGraph<TxnInfo> = decode_graph(&mut buf.as_slice()).unwrap();
        let (a, b) = (g.find(1).unwrap(), g.find(2).unwrap());
        assert_eq!(g.edge(a, b), Some(WW | RW));
    }

    #[test]
    fn subgraph_selection_keeps_internal_edges_only() {
        let g = sample_graph();
        let ret_set: HashSet<u64> = [10, 20].into_iter().collect();
        let marshaler = GraphMarshaler::Subgraph {
            graph: &g,
            ret_set: &ret_set,
        };

        let mut buf = Vec::new();
        marshaler.encode(&mut buf).unwrap();

        let back = GraphMarshaler::<TxnInfo>::decode(&mut buf.as_slice())
            .unwrap()
            .into_graph()
            .unwrap();
        assert_eq!(back.len(), 2);
        let (a, b) = (back.find(10).unwrap(), back.find(20).unwrap());
        assert_eq!(back.edge(a, b), Some(WW));
        // 20 -> 30 crossed the selection boundary and was dropped.
        assert_eq!(back.vertex(b).out_degree(), 0);
    }
}
