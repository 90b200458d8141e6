//! Graph-aware affine-gap dynamic programming
//!
//! The input graph is projected into one DP node per graph node with edges
//! in canonical end-to-start orientation. The fill runs Gotoh recurrences
//! over the DAG: each node owns H/E/F matrices (columns = node bases, rows
//! = read bases) and column 0 draws its diagonal and deletion contributions
//! from the maxima over the last columns of its predecessors. Tracebacks
//! walk the explicit H/E/F states and emit per-node CIGARs; the pinned
//! variant supports k-best traceback through a deviation stack.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::encode::{self, NT_N};
use crate::graph::Graph;
use crate::scoring::{QualAdjTable, ScoreMatrix};
use crate::{Error, Result};

/// Node id of the dummy sink appended for pinned alignment.
pub const DUMMY_PIN_ID: u64 = u32::MAX as u64;

/// Sentinel for unreachable cells, far enough from `i32::MIN` that gap
/// arithmetic cannot wrap.
pub(crate) const NEG_INF: i32 = i32::MIN / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CigarOp {
    Match,
    Mismatch,
    /// An aligned column where either side is `N`; scores zero and is
    /// excisable when it came from the pinning dummy.
    NMatch,
    Insertion,
    Deletion,
    SoftClip,
}

impl CigarOp {
    pub(crate) fn as_char(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Mismatch => 'X',
            CigarOp::NMatch => 'N',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::SoftClip => 'S',
        }
    }

    /// Whether the operator consumes node-sequence bases.
    pub(crate) fn consumes_ref(self) -> bool {
        matches!(
            self,
            CigarOp::Match | CigarOp::Mismatch | CigarOp::NMatch | CigarOp::Deletion
        )
    }

    /// Whether the operator consumes read bases.
    pub(crate) fn consumes_read(self) -> bool {
        !matches!(self, CigarOp::Deletion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CigarElement {
    pub op: CigarOp,
    pub len: usize,
}

impl CigarElement {
    pub(crate) fn new(op: CigarOp, len: usize) -> Self {
        Self { op, len }
    }
}

/// A traceback in DP-node space: per-node CIGARs along the path plus the
/// start offset on the first node.
#[derive(Debug, Clone)]
pub(crate) struct GraphMapping {
    pub score: i32,
    pub position: usize,
    pub node_cigars: Vec<(usize, Vec<CigarElement>)>,
}

impl GraphMapping {
    fn empty() -> Self {
        Self {
            score: 0,
            position: 0,
            node_cigars: Vec::new(),
        }
    }

    /// Compact `pos@node:cigar,...` rendering for debug logging.
    pub(crate) fn describe(&self, dp: &DpGraph) -> String {
        use std::fmt::Write as _;
        let mut out = format!("{}@", self.position);
        for (idx, (node, elements)) in self.node_cigars.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}:", dp.nodes[*node].id);
            for element in elements {
                let _ = write!(out, "{}{}", element.len, element.op.as_char());
            }
        }
        out
    }
}

/// One DP node: original id, cleaned 0-4 codes, canonical predecessors.
#[derive(Debug)]
pub(crate) struct DpNode {
    pub id: u64,
    pub codes: Vec<u8>,
    pub preds: Vec<usize>,
}

/// The DP projection of an input graph, nodes in topological order.
#[derive(Debug)]
pub(crate) struct DpGraph {
    pub nodes: Vec<DpNode>,
    pub dummy: Option<usize>,
}

impl DpGraph {
    /// Project `graph` into DP form. Edges are rewritten into canonical
    /// tail-to-head orientation; `(true, true)` edges are reoriented by
    /// swapping endpoints and any other flagged edge is rejected. When
    /// `add_pinning_node` is set, a dummy `N` sink is appended and every
    /// canonical sink gains an edge into it.
    pub fn build(graph: &Graph, add_pinning_node: bool) -> Result<Self> {
        let mut index_of = HashMap::with_capacity(graph.nodes.len());
        let mut nodes: Vec<DpNode> = Vec::with_capacity(graph.nodes.len());
        for (index, node) in graph.nodes.iter().enumerate() {
            if node.sequence.is_empty() {
                return Err(Error::EmptyNodeSequence { node_id: node.id });
            }
            index_of.insert(node.id, index);
            nodes.push(DpNode {
                id: node.id,
                codes: encode::encode_seq(&node.sequence),
                preds: Vec::new(),
            });
        }

        let mut has_outgoing = vec![false; nodes.len()];
        for edge in &graph.edges {
            let (tail_id, head_id) = match (edge.from_start, edge.to_end) {
                (false, false) => (edge.from, edge.to),
                // same adjacency written backwards
                (true, true) => (edge.to, edge.from),
                _ => {
                    return Err(Error::ReversingEdgeUnsupported {
                        from: edge.from,
                        to: edge.to,
                    });
                }
            };
            let (Some(&tail), Some(&head)) = (index_of.get(&tail_id), index_of.get(&head_id))
            else {
                log::warn!(
                    "edge {} -> {} references a node not present in the graph; ignoring",
                    edge.from,
                    edge.to
                );
                continue;
            };
            nodes[head].preds.push(tail);
            has_outgoing[tail] = true;
        }

        let dummy = if add_pinning_node {
            let sinks: Vec<usize> = (0..nodes.len()).filter(|&i| !has_outgoing[i]).collect();
            nodes.push(DpNode {
                id: DUMMY_PIN_ID,
                codes: vec![NT_N],
                preds: sinks,
            });
            Some(nodes.len() - 1)
        } else {
            None
        };

        Ok(Self { nodes, dummy })
    }

    /// Nodes with no outgoing canonical edges (the dummy excluded).
    pub fn sinks(&self) -> Vec<usize> {
        let real = self.dummy.unwrap_or(self.nodes.len());
        let mut has_outgoing = vec![false; real];
        for node in &self.nodes[..real] {
            for &pred in &node.preds {
                has_outgoing[pred] = true;
            }
        }
        (0..real).filter(|&i| !has_outgoing[i]).collect()
    }
}

/// Substitution lookup shared by the plain and quality-adjusted engines.
pub(crate) enum SubstScorer<'a> {
    Plain(&'a ScoreMatrix),
    QualAdjusted {
        table: &'a QualAdjTable,
        quals: &'a [u8],
    },
}

impl SubstScorer<'_> {
    #[inline]
    pub(super) fn score(&self, row: usize, read_code: u8, ref_code: u8) -> i32 {
        match self {
            SubstScorer::Plain(matrix) => matrix.score(ref_code, read_code),
            SubstScorer::QualAdjusted { table, quals } => {
                table.score(quals[row], ref_code, read_code)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TbState {
    /// H: best score ending in an aligned column.
    Main,
    /// E: best score ending in a read-consuming gap (insertion).
    ReadGap,
    /// F: best score ending in a graph-consuming gap (deletion).
    RefGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TbPoint {
    node: usize,
    col: usize,
    row: usize,
    state: TbState,
}

/// Filled score matrices for one alignment call.
pub(crate) struct DpTables {
    h: Vec<Vec<i32>>,
    e: Vec<Vec<i32>>,
    f: Vec<Vec<i32>>,
    rows: usize,
    best: Option<(i32, usize, usize, usize)>,
}

impl DpTables {
    #[inline]
    fn h(&self, node: usize, col: usize, row: usize) -> i32 {
        self.h[node][col * self.rows + row]
    }

    #[inline]
    fn e(&self, node: usize, col: usize, row: usize) -> i32 {
        self.e[node][col * self.rows + row]
    }

    #[inline]
    fn f(&self, node: usize, col: usize, row: usize) -> i32 {
        self.f[node][col * self.rows + row]
    }

    /// Score of the pinned end cell: the last read row of the dummy node.
    pub(crate) fn pinned_score(&self, dp: &DpGraph) -> i32 {
        match dp.dummy {
            Some(dummy) => self.h(dummy, 0, self.rows - 1),
            None => 0,
        }
    }
}

/// Run the local/pinned fill: start-anywhere scores floored at zero, with
/// `full_length_bonus` added to aligned columns on the first and last read
/// rows. The same fill backs both local and pinned tracebacks; only the
/// traceback start differs.
pub(crate) fn fill(
    dp: &DpGraph,
    read_codes: &[u8],
    scorer: &SubstScorer<'_>,
    gap_open: i32,
    gap_extension: i32,
    full_length_bonus: i32,
) -> DpTables {
    let m = read_codes.len();
    let mut tables = DpTables {
        h: Vec::with_capacity(dp.nodes.len()),
        e: Vec::with_capacity(dp.nodes.len()),
        f: Vec::with_capacity(dp.nodes.len()),
        rows: m,
        best: None,
    };

    for (n, node) in dp.nodes.iter().enumerate() {
        let cols = node.codes.len();
        let mut h_node = vec![NEG_INF; cols * m];
        let mut e_node = vec![NEG_INF; cols * m];
        let mut f_node = vec![NEG_INF; cols * m];

        for col in 0..cols {
            let ref_code = node.codes[col];
            for row in 0..m {
                let idx = col * m + row;

                let e_val = if row > 0 {
                    (h_node[idx - 1] - gap_open).max(e_node[idx - 1] - gap_extension)
                } else {
                    NEG_INF
                };

                let (left_h, left_f) = if col > 0 {
                    (h_node[idx - m], f_node[idx - m])
                } else {
                    let mut lh = NEG_INF;
                    let mut lf = NEG_INF;
                    for &pred in &node.preds {
                        let last = dp.nodes[pred].codes.len() - 1;
                        lh = lh.max(tables.h(pred, last, row));
                        lf = lf.max(tables.f(pred, last, row));
                    }
                    (lh, lf)
                };
                let f_val = (left_h - gap_open).max(left_f - gap_extension);

                let diag = if row == 0 {
                    0
                } else if col > 0 {
                    h_node[idx - m - 1]
                } else if node.preds.is_empty() {
                    0
                } else {
                    let mut d = NEG_INF;
                    for &pred in &node.preds {
                        let last = dp.nodes[pred].codes.len() - 1;
                        d = d.max(tables.h(pred, last, row - 1));
                    }
                    d
                };

                let mut sub = scorer.score(row, read_codes[row], ref_code);
                if row == 0 {
                    sub += full_length_bonus;
                }
                if row + 1 == m {
                    sub += full_length_bonus;
                }

                let h_val = 0.max(diag + sub).max(e_val).max(f_val);

                h_node[idx] = h_val;
                e_node[idx] = e_val;
                f_node[idx] = f_val;

                if h_val > 0 && tables.best.map_or(true, |(best, ..)| h_val > best) {
                    tables.best = Some((h_val, n, col, row));
                }
            }
        }

        tables.h.push(h_node);
        tables.e.push(e_node);
        tables.f.push(f_node);
    }

    tables
}

#[inline]
pub(super) fn classify(read_code: u8, ref_code: u8) -> CigarOp {
    if read_code == NT_N || ref_code == NT_N {
        CigarOp::NMatch
    } else if read_code == ref_code {
        CigarOp::Match
    } else {
        CigarOp::Mismatch
    }
}

/// Where a recorded deviation picks up again.
#[derive(Debug, Clone)]
enum Resume {
    At(TbPoint),
    /// The alternative was a fresh local start at the deviation cell, so
    /// the walk is already complete.
    Done { leading_clip: usize, position: usize },
}

/// A not-taken traceback branch: the score of the complete alignment that
/// follows it, the point it resumes from, and the ops already emitted
/// between the alignment end and the branch (reversed).
#[derive(Debug, Clone)]
struct Deviation {
    score: i32,
    resume: Resume,
    suffix: Vec<(usize, CigarOp)>,
}

impl PartialEq for Deviation {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for Deviation {}

impl PartialOrd for Deviation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deviation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score)
    }
}

/// How a walk terminated.
enum WalkEnd {
    /// Stopped above a zero cell; that cell's read row was not consumed.
    AtZero(TbPoint),
    /// Took a fresh local start at this cell (its op was emitted).
    FreshStart(TbPoint),
}

struct Walker<'a> {
    dp: &'a DpGraph,
    tables: &'a DpTables,
    read_codes: &'a [u8],
    scorer: &'a SubstScorer<'a>,
    gap_open: i32,
    gap_extension: i32,
    full_length_bonus: i32,
}

impl<'a> Walker<'a> {
    /// Follow one traceback from `start`, appending to `ops` (reversed
    /// order). Every admissible branch not taken is pushed onto `heap`
    /// with the score of the complete alignment it leads to.
    fn walk(
        &self,
        start: TbPoint,
        mut ops: Vec<(usize, CigarOp)>,
        total_score: i32,
        mut heap: Option<&mut BinaryHeap<Deviation>>,
        trailing_clip: usize,
    ) -> Result<GraphMapping> {
        let mut cur = start;
        let end = loop {
            let node = &self.dp.nodes[cur.node];
            // (value to explain, op emitted at this cell, candidate moves)
            let mut candidates: Vec<(i32, Resume)> = Vec::new();
            let (value, op) = match cur.state {
                TbState::Main => {
                    let value = self.tables.h(cur.node, cur.col, cur.row);
                    if value == 0 {
                        break WalkEnd::AtZero(cur);
                    }
                    let mut sub =
                        self.scorer
                            .score(cur.row, self.read_codes[cur.row], node.codes[cur.col]);
                    if cur.row == 0 {
                        sub += self.full_length_bonus;
                    }
                    if cur.row + 1 == self.read_codes.len() {
                        sub += self.full_length_bonus;
                    }

                    if cur.row > 0 {
                        if cur.col > 0 {
                            candidates.push((
                                self.tables.h(cur.node, cur.col - 1, cur.row - 1) + sub,
                                Resume::At(TbPoint {
                                    node: cur.node,
                                    col: cur.col - 1,
                                    row: cur.row - 1,
                                    state: TbState::Main,
                                }),
                            ));
                        } else {
                            for &pred in &node.preds {
                                let last = self.dp.nodes[pred].codes.len() - 1;
                                candidates.push((
                                    self.tables.h(pred, last, cur.row - 1) + sub,
                                    Resume::At(TbPoint {
                                        node: pred,
                                        col: last,
                                        row: cur.row - 1,
                                        state: TbState::Main,
                                    }),
                                ));
                            }
                        }
                    }
                    // fresh local start at this cell
                    candidates.push((
                        sub,
                        Resume::Done {
                            leading_clip: cur.row,
                            position: cur.col,
                        },
                    ));
                    candidates.push((
                        self.tables.e(cur.node, cur.col, cur.row),
                        Resume::At(TbPoint {
                            state: TbState::ReadGap,
                            ..cur
                        }),
                    ));
                    candidates.push((
                        self.tables.f(cur.node, cur.col, cur.row),
                        Resume::At(TbPoint {
                            state: TbState::RefGap,
                            ..cur
                        }),
                    ));

                    (value, classify(self.read_codes[cur.row], node.codes[cur.col]))
                }
                TbState::ReadGap => {
                    let value = self.tables.e(cur.node, cur.col, cur.row);
                    let up = TbPoint {
                        row: cur.row - 1,
                        ..cur
                    };
                    candidates.push((
                        self.tables.h(cur.node, cur.col, cur.row - 1) - self.gap_open,
                        Resume::At(TbPoint {
                            state: TbState::Main,
                            ..up
                        }),
                    ));
                    candidates.push((
                        self.tables.e(cur.node, cur.col, cur.row - 1) - self.gap_extension,
                        Resume::At(TbPoint {
                            state: TbState::ReadGap,
                            ..up
                        }),
                    ));
                    (value, CigarOp::Insertion)
                }
                TbState::RefGap => {
                    let value = self.tables.f(cur.node, cur.col, cur.row);
                    if cur.col > 0 {
                        let left = TbPoint {
                            col: cur.col - 1,
                            ..cur
                        };
                        candidates.push((
                            self.tables.h(cur.node, cur.col - 1, cur.row) - self.gap_open,
                            Resume::At(TbPoint {
                                state: TbState::Main,
                                ..left
                            }),
                        ));
                        candidates.push((
                            self.tables.f(cur.node, cur.col - 1, cur.row) - self.gap_extension,
                            Resume::At(TbPoint {
                                state: TbState::RefGap,
                                ..left
                            }),
                        ));
                    } else {
                        for &pred in &node.preds {
                            let last = self.dp.nodes[pred].codes.len() - 1;
                            let over = TbPoint {
                                node: pred,
                                col: last,
                                row: cur.row,
                                state: TbState::Main,
                            };
                            candidates.push((
                                self.tables.h(pred, last, cur.row) - self.gap_open,
                                Resume::At(over),
                            ));
                            candidates.push((
                                self.tables.f(pred, last, cur.row) - self.gap_extension,
                                Resume::At(TbPoint {
                                    state: TbState::RefGap,
                                    ..over
                                }),
                            ));
                        }
                    }
                    (value, CigarOp::Deletion)
                }
            };

            let chosen = candidates
                .iter()
                .position(|(candidate, _)| *candidate == value)
                .ok_or(Error::CigarInvariantViolated(
                    "traceback cell has no source explaining its score",
                ))?;

            ops.push((cur.node, op));

            if let Some(heap) = heap.as_deref_mut() {
                for (index, (candidate, resume)) in candidates.iter().enumerate() {
                    if index == chosen || *candidate <= NEG_INF / 2 {
                        continue;
                    }
                    heap.push(Deviation {
                        score: total_score - value + candidate,
                        resume: resume.clone(),
                        suffix: ops.clone(),
                    });
                }
            }

            match candidates.into_iter().nth(chosen) {
                Some((_, Resume::At(next))) => cur = next,
                Some((_, Resume::Done { .. })) => break WalkEnd::FreshStart(cur),
                None => unreachable!("chosen index came from the candidate list"),
            }
        };

        let (leading_clip, position) = match end {
            WalkEnd::FreshStart(point) => (point.row, point.col),
            WalkEnd::AtZero(point) => {
                let position = match ops.last() {
                    Some(&(first_node, _)) if first_node == point.node => point.col + 1,
                    _ => 0,
                };
                (point.row + 1, position)
            }
        };

        Ok(finalize(ops, leading_clip, trailing_clip, position, total_score))
    }
}

/// Turn reversed per-cell ops into grouped, run-length-encoded node CIGARs
/// with soft clips attached to the terminal nodes.
pub(super) fn finalize(
    ops_rev: Vec<(usize, CigarOp)>,
    leading_clip: usize,
    trailing_clip: usize,
    position: usize,
    score: i32,
) -> GraphMapping {
    let mut node_cigars: Vec<(usize, Vec<CigarElement>)> = Vec::new();
    for &(node, op) in ops_rev.iter().rev() {
        if node_cigars.last().map(|(n, _)| *n) != Some(node) {
            node_cigars.push((node, Vec::new()));
        }
        let elements = &mut node_cigars.last_mut().expect("just pushed").1;
        match elements.last_mut() {
            Some(last) if last.op == op => last.len += 1,
            _ => elements.push(CigarElement::new(op, 1)),
        }
    }

    if leading_clip > 0 {
        if let Some((_, elements)) = node_cigars.first_mut() {
            elements.insert(0, CigarElement::new(CigarOp::SoftClip, leading_clip));
        }
    }
    if trailing_clip > 0 {
        if let Some((_, elements)) = node_cigars.last_mut() {
            elements.push(CigarElement::new(CigarOp::SoftClip, trailing_clip));
        }
    }

    GraphMapping {
        score,
        position,
        node_cigars,
    }
}

/// Single best local traceback from the global maximum cell.
pub(crate) fn traceback_local(
    dp: &DpGraph,
    tables: &DpTables,
    read_codes: &[u8],
    scorer: &SubstScorer<'_>,
    gap_open: i32,
    gap_extension: i32,
    full_length_bonus: i32,
) -> Result<GraphMapping> {
    let Some((score, node, col, row)) = tables.best else {
        return Ok(GraphMapping::empty());
    };
    let walker = Walker {
        dp,
        tables,
        read_codes,
        scorer,
        gap_open,
        gap_extension,
        full_length_bonus,
    };
    let trailing_clip = read_codes.len() - 1 - row;
    walker.walk(
        TbPoint {
            node,
            col,
            row,
            state: TbState::Main,
        },
        Vec::new(),
        score,
        None,
        trailing_clip,
    )
}

/// Up to `max_alt_alns` pinned tracebacks from the dummy sink's last read
/// row, strictly score-descending. A zero (or negative) best score yields a
/// single empty mapping for the caller to synthesize from; alternates stop
/// as soon as the next-best deviation drops to zero.
pub(crate) fn traceback_pinned_multi(
    dp: &DpGraph,
    tables: &DpTables,
    read_codes: &[u8],
    scorer: &SubstScorer<'_>,
    gap_open: i32,
    gap_extension: i32,
    full_length_bonus: i32,
    max_alt_alns: usize,
) -> Result<Vec<GraphMapping>> {
    let dummy = dp.dummy.ok_or(Error::CigarInvariantViolated(
        "pinned traceback requested without a pinning node",
    ))?;
    let best = tables.pinned_score(dp);
    if best <= 0 {
        return Ok(vec![GraphMapping::empty()]);
    }

    let walker = Walker {
        dp,
        tables,
        read_codes,
        scorer,
        gap_open,
        gap_extension,
        full_length_bonus,
    };
    let start = TbPoint {
        node: dummy,
        col: 0,
        row: read_codes.len() - 1,
        state: TbState::Main,
    };

    let mut heap = BinaryHeap::new();
    let mut results = Vec::with_capacity(max_alt_alns);
    results.push(walker.walk(start, Vec::new(), best, Some(&mut heap), 0)?);

    while results.len() < max_alt_alns {
        let Some(deviation) = heap.pop() else { break };
        if deviation.score <= 0 {
            break;
        }
        let mapping = match deviation.resume {
            Resume::At(point) => walker.walk(
                point,
                deviation.suffix,
                deviation.score,
                Some(&mut heap),
                0,
            )?,
            Resume::Done {
                leading_clip,
                position,
            } => finalize(deviation.suffix, leading_clip, 0, position, deviation.score),
        };
        results.push(mapping);
    }

    Ok(results)
}

/// Rewrite a traceback over the reversed graph back into the original
/// coordinate frame: node CIGARs reversed, each CIGAR reversed, and the
/// start position recomputed from the node-sequence span of the first CIGAR.
pub(crate) fn unreverse_graph_mapping(gm: &mut GraphMapping, dp: &DpGraph) {
    gm.node_cigars.reverse();
    for (_, elements) in &mut gm.node_cigars {
        elements.reverse();
    }

    match gm.node_cigars.first() {
        Some((first_node, elements)) => {
            let ref_aligned: usize = elements
                .iter()
                .filter(|element| element.op.consumes_ref())
                .map(|element| element.len)
                .sum();
            gm.position = dp.nodes[*first_node].codes.len() - ref_aligned;
        }
        None => gm.position = 0,
    }
}

/// Dump the filled H matrix per node through the logger; gated behind the
/// `print_matrices` flag of the alignment entry points.
pub(crate) fn log_score_matrices(dp: &DpGraph, tables: &DpTables, read: &[u8]) {
    use std::fmt::Write as _;
    for (n, node) in dp.nodes.iter().enumerate() {
        let mut header = format!("node {}:", node.id);
        for &code in &node.codes {
            let _ = write!(header, " {:>4}", encode::decode_base(code));
        }
        log::debug!("{header}");
        for row in 0..tables.rows {
            let mut line = format!("{:>4}", *read.get(row).unwrap_or(&b'?') as char);
            for col in 0..node.codes.len() {
                let _ = write!(line, " {:>4}", tables.h(n, col, row));
            }
            log::debug!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::scoring::ScoringParams;

    fn tiny_graph() -> Graph {
        Graph::from_parts(
            vec![Node::new(1, b"ACGT"), Node::new(2, b"ACGT")],
            vec![Edge::forward(1, 2)],
        )
    }

    fn fill_plain(graph: &Graph, read: &[u8], pinned: bool) -> (DpGraph, DpTables, Vec<u8>) {
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let dp = DpGraph::build(graph, pinned).unwrap();
        let codes = encode::encode_seq(read);
        let tables = fill(
            &dp,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
        );
        (dp, tables, codes)
    }

    #[test]
    fn build_rejects_reversing_edges() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"AC"), Node::new(2, b"GT")],
            vec![Edge::new(1, 2, true, false)],
        );
        assert!(matches!(
            DpGraph::build(&graph, false),
            Err(Error::ReversingEdgeUnsupported { from: 1, to: 2 })
        ));
    }

    #[test]
    fn build_rejects_empty_node_sequences() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"AC"), Node::new(2, b"")],
            vec![Edge::forward(1, 2)],
        );
        assert!(matches!(
            DpGraph::build(&graph, false),
            Err(Error::EmptyNodeSequence { node_id: 2 })
        ));
    }

    #[test]
    fn build_reorients_doubly_flipped_edges() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"AC"), Node::new(2, b"GT")],
            vec![Edge::new(2, 1, true, true)],
        );
        let dp = DpGraph::build(&graph, false).unwrap();
        assert_eq!(dp.nodes[1].preds, vec![0]);
        assert_eq!(dp.sinks(), vec![1]);
    }

    #[test]
    fn pinning_node_attaches_to_all_sinks() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"A"), Node::new(2, b"C"), Node::new(3, b"G")],
            vec![Edge::forward(1, 2), Edge::forward(1, 3)],
        );
        let dp = DpGraph::build(&graph, true).unwrap();
        let dummy = dp.dummy.unwrap();
        assert_eq!(dp.nodes[dummy].id, DUMMY_PIN_ID);
        assert_eq!(dp.nodes[dummy].codes, vec![NT_N]);
        assert_eq!(dp.nodes[dummy].preds, vec![1, 2]);
    }

    #[test]
    fn local_fill_finds_perfect_match_score() {
        let (dp, tables, codes) = fill_plain(&tiny_graph(), b"ACGTACGT", false);
        let (score, ..) = tables.best.unwrap();
        assert_eq!(score, 8);

        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let gm = traceback_local(
            &dp,
            &tables,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
        )
        .unwrap();
        assert_eq!(gm.score, 8);
        assert_eq!(gm.position, 0);
        assert_eq!(gm.node_cigars.len(), 2);
        assert_eq!(
            gm.node_cigars[0].1,
            vec![CigarElement::new(CigarOp::Match, 4)]
        );
        assert_eq!(
            gm.node_cigars[1].1,
            vec![CigarElement::new(CigarOp::Match, 4)]
        );
    }

    #[test]
    fn local_traceback_soft_clips_unaligned_read_ends() {
        // only the middle of the read matches node sequence
        let graph = Graph::from_parts(vec![Node::new(1, b"TTTTACGTACGTTTTT")], vec![]);
        let (dp, tables, codes) = fill_plain(&graph, b"GGGGGACGTACGGGGGG", false);
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let gm = traceback_local(
            &dp,
            &tables,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
        )
        .unwrap();
        let elements = &gm.node_cigars[0].1;
        assert_eq!(elements.first().unwrap().op, CigarOp::SoftClip);
        assert_eq!(elements.last().unwrap().op, CigarOp::SoftClip);
        let read_consumed: usize = elements
            .iter()
            .filter(|e| e.op.consumes_read())
            .map(|e| e.len)
            .sum();
        assert_eq!(read_consumed, codes.len());
    }

    #[test]
    fn pinned_traceback_ends_on_dummy() {
        let (dp, tables, codes) = fill_plain(&tiny_graph(), b"ACGTACGTN", true);
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let gms = traceback_pinned_multi(
            &dp,
            &tables,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
            1,
        )
        .unwrap();
        assert_eq!(gms.len(), 1);
        assert_eq!(gms[0].score, 8);
        let (last_node, last_cigar) = gms[0].node_cigars.last().unwrap();
        assert_eq!(dp.nodes[*last_node].id, DUMMY_PIN_ID);
        assert_eq!(last_cigar, &vec![CigarElement::new(CigarOp::NMatch, 1)]);
    }

    #[test]
    fn pinned_zero_score_returns_empty_mapping() {
        let graph = Graph::from_parts(vec![Node::new(1, b"ACGT")], vec![]);
        let (dp, tables, codes) = fill_plain(&graph, b"GGN", true);
        // read cannot produce a positive pinned score: G aligns but the
        // pin forces the alignment to end at the dummy
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let gms = traceback_pinned_multi(
            &dp,
            &tables,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
            4,
        )
        .unwrap();
        assert_eq!(gms.len(), 1);
        assert_eq!(gms[0].score, 0);
        assert!(gms[0].node_cigars.is_empty());
    }

    #[test]
    fn multi_traceback_is_score_descending() {
        // two sink branches with different similarity to the read
        let graph = Graph::from_parts(
            vec![
                Node::new(1, b"ACGT"),
                Node::new(2, b"ACGT"),
                Node::new(3, b"ACTT"),
            ],
            vec![Edge::forward(1, 2), Edge::forward(1, 3)],
        );
        let (dp, tables, codes) = fill_plain(&graph, b"ACGTACGTN", true);
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let gms = traceback_pinned_multi(
            &dp,
            &tables,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            0,
            3,
        )
        .unwrap();
        assert!(gms.len() >= 2);
        for pair in gms.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(gms[0].score, 8);
    }

    #[test]
    fn unreverse_flips_cigars_and_recomputes_position() {
        let graph = Graph::from_parts(vec![Node::new(7, b"AACGT")], vec![]);
        let dp = DpGraph::build(&graph, false).unwrap();
        let mut gm = GraphMapping {
            score: 3,
            position: 0,
            node_cigars: vec![(
                0,
                vec![
                    CigarElement::new(CigarOp::Match, 3),
                    CigarElement::new(CigarOp::SoftClip, 2),
                ],
            )],
        };
        unreverse_graph_mapping(&mut gm, &dp);
        assert_eq!(
            gm.node_cigars[0].1,
            vec![
                CigarElement::new(CigarOp::SoftClip, 2),
                CigarElement::new(CigarOp::Match, 3),
            ]
        );
        // 3 of the 5 node bases are aligned, so the alignment starts at 2
        assert_eq!(gm.position, 2);
    }
}
