//! Banded global alignment over topologically ordered nodes
//!
//! Global in both directions: the whole read and a complete source-to-sink
//! path through the graph are consumed. The DP is restricted to read rows
//! within `band_padding` diagonals of each column's graph offset, so the
//! band tracks the read-vs-graph anti-diagonal and indels beyond the
//! padding fall outside it. When the band admits no finished alignment and
//! `permissive_banding` is set, the padding doubles until one appears.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::dp::{classify, finalize, CigarOp, DpGraph, GraphMapping, SubstScorer, NEG_INF};
use crate::{Error, Result};

/// Per-node prefix-offset intervals plus the extreme path lengths.
struct BandGeometry {
    pmin: Vec<usize>,
    pmax: Vec<usize>,
    lmin: usize,
    lmax: usize,
    sinks: Vec<usize>,
}

fn geometry(dp: &DpGraph) -> BandGeometry {
    let n = dp.nodes.len();
    let mut pmin = vec![0usize; n];
    let mut pmax = vec![0usize; n];
    for (index, node) in dp.nodes.iter().enumerate() {
        if node.preds.is_empty() {
            continue;
        }
        let mut lo = usize::MAX;
        let mut hi = 0usize;
        for &pred in &node.preds {
            lo = lo.min(pmin[pred] + dp.nodes[pred].codes.len());
            hi = hi.max(pmax[pred] + dp.nodes[pred].codes.len());
        }
        pmin[index] = lo;
        pmax[index] = hi;
    }

    let sinks = dp.sinks();
    let mut lmin = usize::MAX;
    let mut lmax = 0usize;
    for &sink in &sinks {
        lmin = lmin.min(pmin[sink] + dp.nodes[sink].codes.len());
        lmax = lmax.max(pmax[sink] + dp.nodes[sink].codes.len());
    }

    BandGeometry {
        pmin,
        pmax,
        lmin,
        lmax,
        sinks,
    }
}

/// Matrices with an extra row 0 for the "no read consumed" boundary.
struct BandedTables {
    h: Vec<Vec<i32>>,
    e: Vec<Vec<i32>>,
    f: Vec<Vec<i32>>,
    rows: usize,
}

impl BandedTables {
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
}

/// Cost of a run of `rows` leading read insertions before the graph.
#[inline]
fn virtual_ins(rows: usize, gap_open: i32, gap_extension: i32) -> i32 {
    if rows == 0 {
        0
    } else {
        -(gap_open + (rows as i32 - 1) * gap_extension)
    }
}

/// Band limits for one node column: read rows within `padding` diagonals of
/// the column's graph offset. The node's prefix interval widens the band
/// where branch path lengths disagree; `padding` alone absorbs read-vs-path
/// indels, so a length-mismatched read needs at least that much padding (or
/// permissive widening) before the end corner becomes reachable.
#[inline]
fn band_bounds(geom: &BandGeometry, node: usize, col: usize, m: usize, padding: usize) -> (usize, usize) {
    let lo_offset = geom.pmin[node] + col + 1;
    let hi_offset = geom.pmax[node] + col + 1;
    (
        lo_offset.saturating_sub(padding),
        (hi_offset + padding).min(m),
    )
}

fn fill_banded(
    dp: &DpGraph,
    read_codes: &[u8],
    scorer: &SubstScorer<'_>,
    gap_open: i32,
    gap_extension: i32,
    geom: &BandGeometry,
    padding: usize,
) -> BandedTables {
    let m = read_codes.len();
    let rows = m + 1;
    let mut tables = BandedTables {
        h: Vec::with_capacity(dp.nodes.len()),
        e: Vec::with_capacity(dp.nodes.len()),
        f: Vec::with_capacity(dp.nodes.len()),
        rows,
    };

    for (n, node) in dp.nodes.iter().enumerate() {
        let cols = node.codes.len();
        let mut h_node = vec![NEG_INF; cols * rows];
        let mut e_node = vec![NEG_INF; cols * rows];
        let mut f_node = vec![NEG_INF; cols * rows];

        for col in 0..cols {
            let ref_code = node.codes[col];
            let (lo, hi) = band_bounds(geom, n, col, m, padding);

            for row in lo..=hi {
                let idx = col * rows + row;

                let e_val = if row > 0 {
                    (h_node[idx - 1] - gap_open).max(e_node[idx - 1] - gap_extension)
                } else {
                    NEG_INF
                };

                let (left_h, left_f, diag) = if col > 0 {
                    (
                        h_node[idx - rows],
                        f_node[idx - rows],
                        if row > 0 { h_node[idx - rows - 1] } else { NEG_INF },
                    )
                } else if node.preds.is_empty() {
                    (
                        virtual_ins(row, gap_open, gap_extension),
                        NEG_INF,
                        if row > 0 {
                            virtual_ins(row - 1, gap_open, gap_extension)
                        } else {
                            NEG_INF
                        },
                    )
                } else {
                    let mut lh = NEG_INF;
                    let mut lf = NEG_INF;
                    let mut d = NEG_INF;
                    for &pred in &node.preds {
                        let last = dp.nodes[pred].codes.len() - 1;
                        lh = lh.max(tables.h(pred, last, row));
                        lf = lf.max(tables.f(pred, last, row));
                        if row > 0 {
                            d = d.max(tables.h(pred, last, row - 1));
                        }
                    }
                    (lh, lf, d)
                };

                let f_val = (left_h - gap_open).max(left_f - gap_extension);

                let h_val = if row == 0 {
                    // boundary row: only leading deletions reach here
                    f_val
                } else {
                    let sub = scorer_sub(scorer, read_codes, row, ref_code);
                    (diag + sub).max(e_val).max(f_val)
                };

                h_node[idx] = h_val;
                e_node[idx] = e_val;
                f_node[idx] = f_val;
            }
        }

        tables.h.push(h_node);
        tables.e.push(e_node);
        tables.f.push(f_node);
    }

    tables
}

#[inline]
fn scorer_sub(scorer: &SubstScorer<'_>, read_codes: &[u8], row: usize, ref_code: u8) -> i32 {
    scorer.score(row - 1, read_codes[row - 1], ref_code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BState {
    Main,
    ReadGap,
    RefGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BPoint {
    node: usize,
    col: usize,
    row: usize,
    state: BState,
}

#[derive(Debug, Clone)]
enum BResume {
    At(BPoint),
    /// Walk closed at a source start; `leading_ins` read bases remain to be
    /// emitted as a leading insertion run.
    Done { leading_ins: usize },
}

#[derive(Debug, Clone)]
struct BDeviation {
    score: i32,
    resume: BResume,
    suffix: Vec<(usize, CigarOp)>,
}

impl PartialEq for BDeviation {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for BDeviation {}

impl PartialOrd for BDeviation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BDeviation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score)
    }
}

struct BandedWalker<'a> {
    dp: &'a DpGraph,
    tables: &'a BandedTables,
    read_codes: &'a [u8],
    scorer: &'a SubstScorer<'a>,
    gap_open: i32,
    gap_extension: i32,
}

impl<'a> BandedWalker<'a> {
    fn walk(
        &self,
        start: BPoint,
        mut ops: Vec<(usize, CigarOp)>,
        total_score: i32,
        mut heap: Option<&mut BinaryHeap<BDeviation>>,
    ) -> Result<GraphMapping> {
        let mut cur = start;
        let leading_ins = loop {
            let node = &self.dp.nodes[cur.node];
            let mut candidates: Vec<(i32, BResume)> = Vec::new();
            let (value, op) = match cur.state {
                BState::Main if cur.row == 0 => {
                    // boundary cells hold pure-deletion prefixes
                    let value = self.tables.h(cur.node, cur.col, cur.row);
                    candidates.push((
                        self.tables.f(cur.node, cur.col, cur.row),
                        BResume::At(BPoint {
                            state: BState::RefGap,
                            ..cur
                        }),
                    ));
                    let chosen = choose(&candidates, value)?;
                    cur = advance(candidates, chosen);
                    continue;
                }
                BState::Main => {
                    let value = self.tables.h(cur.node, cur.col, cur.row);
                    let sub = scorer_sub(self.scorer, self.read_codes, cur.row, node.codes[cur.col]);
                    if cur.col > 0 {
                        candidates.push((
                            self.tables.h(cur.node, cur.col - 1, cur.row - 1) + sub,
                            BResume::At(BPoint {
                                node: cur.node,
                                col: cur.col - 1,
                                row: cur.row - 1,
                                state: BState::Main,
                            }),
                        ));
                    } else if node.preds.is_empty() {
                        candidates.push((
                            virtual_ins(cur.row - 1, self.gap_open, self.gap_extension) + sub,
                            BResume::Done {
                                leading_ins: cur.row - 1,
                            },
                        ));
                    } else {
                        for &pred in &node.preds {
                            let last = self.dp.nodes[pred].codes.len() - 1;
                            candidates.push((
                                self.tables.h(pred, last, cur.row - 1) + sub,
                                BResume::At(BPoint {
                                    node: pred,
                                    col: last,
                                    row: cur.row - 1,
                                    state: BState::Main,
                                }),
                            ));
                        }
                    }
                    candidates.push((
                        self.tables.e(cur.node, cur.col, cur.row),
                        BResume::At(BPoint {
                            state: BState::ReadGap,
                            ..cur
                        }),
                    ));
                    candidates.push((
                        self.tables.f(cur.node, cur.col, cur.row),
                        BResume::At(BPoint {
                            state: BState::RefGap,
                            ..cur
                        }),
                    ));
                    (
                        value,
                        classify(self.read_codes[cur.row - 1], node.codes[cur.col]),
                    )
                }
                BState::ReadGap => {
                    let value = self.tables.e(cur.node, cur.col, cur.row);
                    let up = BPoint {
                        row: cur.row - 1,
                        ..cur
                    };
                    candidates.push((
                        self.tables.h(cur.node, cur.col, cur.row - 1) - self.gap_open,
                        BResume::At(BPoint {
                            state: BState::Main,
                            ..up
                        }),
                    ));
                    candidates.push((
                        self.tables.e(cur.node, cur.col, cur.row - 1) - self.gap_extension,
                        BResume::At(BPoint {
                            state: BState::ReadGap,
                            ..up
                        }),
                    ));
                    (value, CigarOp::Insertion)
                }
                BState::RefGap => {
                    let value = self.tables.f(cur.node, cur.col, cur.row);
                    if cur.col > 0 {
                        let left = BPoint {
                            col: cur.col - 1,
                            ..cur
                        };
                        candidates.push((
                            self.tables.h(cur.node, cur.col - 1, cur.row) - self.gap_open,
                            BResume::At(BPoint {
                                state: BState::Main,
                                ..left
                            }),
                        ));
                        candidates.push((
                            self.tables.f(cur.node, cur.col - 1, cur.row) - self.gap_extension,
                            BResume::At(BPoint {
                                state: BState::RefGap,
                                ..left
                            }),
                        ));
                    } else if node.preds.is_empty() {
                        candidates.push((
                            virtual_ins(cur.row, self.gap_open, self.gap_extension)
                                - self.gap_open,
                            BResume::Done {
                                leading_ins: cur.row,
                            },
                        ));
                    } else {
                        for &pred in &node.preds {
                            let last = self.dp.nodes[pred].codes.len() - 1;
                            let over = BPoint {
                                node: pred,
                                col: last,
                                row: cur.row,
                                state: BState::Main,
                            };
                            candidates.push((
                                self.tables.h(pred, last, cur.row) - self.gap_open,
                                BResume::At(over),
                            ));
                            candidates.push((
                                self.tables.f(pred, last, cur.row) - self.gap_extension,
                                BResume::At(BPoint {
                                    state: BState::RefGap,
                                    ..over
                                }),
                            ));
                        }
                    }
                    (value, CigarOp::Deletion)
                }
            };

            let chosen = choose(&candidates, value)?;
            ops.push((cur.node, op));

            if let Some(heap) = heap.as_deref_mut() {
                for (index, (candidate, resume)) in candidates.iter().enumerate() {
                    if index == chosen || *candidate <= NEG_INF / 2 {
                        continue;
                    }
                    heap.push(BDeviation {
                        score: total_score - value + candidate,
                        resume: resume.clone(),
                        suffix: ops.clone(),
                    });
                }
            }

            match candidates.into_iter().nth(chosen) {
                Some((_, BResume::At(next))) => cur = next,
                Some((_, BResume::Done { leading_ins })) => break leading_ins,
                None => unreachable!("chosen index came from the candidate list"),
            }
        };

        Ok(close_walk(ops, leading_ins, total_score))
    }
}

fn choose(candidates: &[(i32, BResume)], value: i32) -> Result<usize> {
    candidates
        .iter()
        .position(|(candidate, _)| *candidate == value)
        .ok_or(Error::CigarInvariantViolated(
            "banded traceback cell has no source explaining its score",
        ))
}

fn advance(candidates: Vec<(i32, BResume)>, chosen: usize) -> BPoint {
    match candidates.into_iter().nth(chosen) {
        Some((_, BResume::At(next))) => next,
        _ => unreachable!("boundary cells always resume in the deletion state"),
    }
}

fn close_walk(
    mut ops: Vec<(usize, CigarOp)>,
    leading_ins: usize,
    score: i32,
) -> GraphMapping {
    if leading_ins > 0 {
        let first_node = ops.last().map(|&(node, _)| node).unwrap_or(0);
        for _ in 0..leading_ins {
            ops.push((first_node, CigarOp::Insertion));
        }
    }
    finalize(ops, 0, 0, 0, score)
}

/// Banded global alignment with up to `max_alt_alns` tracebacks in
/// score-descending order. Widens the band on demand when
/// `permissive_banding` is set; otherwise an infeasible band is an error.
pub(crate) fn align_banded_multi(
    dp: &DpGraph,
    read_codes: &[u8],
    scorer: &SubstScorer<'_>,
    gap_open: i32,
    gap_extension: i32,
    band_padding: usize,
    permissive_banding: bool,
    max_alt_alns: usize,
) -> Result<Vec<GraphMapping>> {
    let m = read_codes.len();
    let geom = geometry(dp);
    let mut padding = band_padding;

    loop {
        let tables = fill_banded(
            dp,
            read_codes,
            scorer,
            gap_open,
            gap_extension,
            &geom,
            padding,
        );

        let mut ends: Vec<(i32, usize)> = geom
            .sinks
            .iter()
            .filter_map(|&sink| {
                let last = dp.nodes[sink].codes.len() - 1;
                let score = tables.h(sink, last, m);
                (score > NEG_INF / 2).then_some((score, sink))
            })
            .collect();
        ends.sort_by(|a, b| b.0.cmp(&a.0));

        if ends.is_empty() {
            if !permissive_banding {
                return Err(Error::BandInfeasible { band_padding });
            }
            if padding >= m + geom.lmax {
                // the band already covers the whole grid; nothing to widen
                return Err(Error::BandInfeasible { band_padding });
            }
            log::warn!(
                "banded global alignment found no complete path within padding {padding}; widening"
            );
            padding = (padding * 2).max(1);
            continue;
        }

        let walker = BandedWalker {
            dp,
            tables: &tables,
            read_codes,
            scorer,
            gap_open,
            gap_extension,
        };

        let start_of = |sink: usize| BPoint {
            node: sink,
            col: dp.nodes[sink].codes.len() - 1,
            row: m,
            state: BState::Main,
        };

        if max_alt_alns <= 1 {
            let (score, sink) = ends[0];
            return Ok(vec![walker.walk(start_of(sink), Vec::new(), score, None)?]);
        }

        let mut heap = BinaryHeap::new();
        for &(score, sink) in ends.iter().skip(1) {
            heap.push(BDeviation {
                score,
                resume: BResume::At(start_of(sink)),
                suffix: Vec::new(),
            });
        }

        let (best_score, best_sink) = ends[0];
        let mut results = Vec::with_capacity(max_alt_alns);
        results.push(walker.walk(start_of(best_sink), Vec::new(), best_score, Some(&mut heap))?);

        while results.len() < max_alt_alns {
            let Some(deviation) = heap.pop() else { break };
            let mapping = match deviation.resume {
                BResume::At(point) => walker.walk(
                    point,
                    deviation.suffix,
                    deviation.score,
                    Some(&mut heap),
                )?,
                BResume::Done { leading_ins } => {
                    close_walk(deviation.suffix, leading_ins, deviation.score)
                }
            };
            results.push(mapping);
        }

        return Ok(results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;
    use crate::graph::{Edge, Graph, Node};
    use crate::scoring::{ScoreMatrix, ScoringParams};

    fn run_banded(
        graph: &Graph,
        read: &[u8],
        padding: usize,
        permissive: bool,
        max_alt: usize,
    ) -> Result<Vec<GraphMapping>> {
        let params = ScoringParams::default();
        let matrix = ScoreMatrix::substitution(&params);
        let dp = DpGraph::build(graph, false)?;
        let codes = encode::encode_seq(read);
        align_banded_multi(
            &dp,
            &codes,
            &SubstScorer::Plain(&matrix),
            params.gap_open,
            params.gap_extension,
            padding,
            permissive,
            max_alt,
        )
    }

    fn two_node_graph() -> Graph {
        Graph::from_parts(
            vec![Node::new(1, b"ACGT"), Node::new(2, b"ACGT")],
            vec![Edge::forward(1, 2)],
        )
    }

    #[test]
    fn exact_global_match_across_nodes() {
        let gms = run_banded(&two_node_graph(), b"ACGTACGT", 1, true, 1).unwrap();
        assert_eq!(gms.len(), 1);
        assert_eq!(gms[0].score, 8);
        assert_eq!(gms[0].position, 0);
        assert_eq!(gms[0].node_cigars.len(), 2);
        let total_read: usize = gms[0]
            .node_cigars
            .iter()
            .flat_map(|(_, elements)| elements)
            .filter(|element| element.op.consumes_read())
            .map(|element| element.len)
            .sum();
        assert_eq!(total_read, 8);
    }

    #[test]
    fn global_charges_terminal_gaps() {
        // read is one base short: a deletion must be paid somewhere
        let gms = run_banded(&two_node_graph(), b"ACGTACG", 2, true, 1).unwrap();
        let params = ScoringParams::default();
        assert_eq!(gms[0].score, 7 - params.gap_open);
        let graph_consumed: usize = gms[0]
            .node_cigars
            .iter()
            .flat_map(|(_, elements)| elements)
            .filter(|element| element.op.consumes_ref())
            .map(|element| element.len)
            .sum();
        assert_eq!(graph_consumed, 8, "a full source-to-sink path is consumed");
    }

    #[test]
    fn permissive_banding_widens_until_feasible() {
        // a 4-base insertion cannot fit in a zero-padding band
        let graph = Graph::from_parts(vec![Node::new(1, b"AAAATTTT")], vec![]);
        let read = b"AAAACCCCGGTTTT";
        let gms = run_banded(&graph, read, 0, true, 1).unwrap();
        let read_consumed: usize = gms[0]
            .node_cigars
            .iter()
            .flat_map(|(_, elements)| elements)
            .filter(|element| element.op.consumes_read())
            .map(|element| element.len)
            .sum();
        assert_eq!(read_consumed, read.len());
    }

    #[test]
    fn non_permissive_tight_band_is_an_error() {
        let graph = Graph::from_parts(vec![Node::new(1, b"AAAATTTT")], vec![]);
        let result = run_banded(&graph, b"AAAACCCCGGTTTT", 0, false, 1);
        assert!(matches!(result, Err(Error::BandInfeasible { .. })));
    }

    #[test]
    fn multi_traceback_covers_both_branches() {
        // diamond: one branch matches the read exactly, the other does not
        let graph = Graph::from_parts(
            vec![
                Node::new(1, b"AC"),
                Node::new(2, b"GG"),
                Node::new(3, b"GT"),
                Node::new(4, b"AC"),
            ],
            vec![
                Edge::forward(1, 2),
                Edge::forward(1, 3),
                Edge::forward(2, 4),
                Edge::forward(3, 4),
            ],
        );
        let gms = run_banded(&graph, b"ACGGAC", 2, true, 2).unwrap();
        assert_eq!(gms.len(), 2);
        assert_eq!(gms[0].score, 6);
        assert!(gms[0].score >= gms[1].score);
        let branch_of = |gm: &GraphMapping| gm.node_cigars[1].0;
        assert_ne!(branch_of(&gms[0]), branch_of(&gms[1]));
    }

    #[test]
    fn deletion_spanning_a_node_boundary() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"ACG"), Node::new(2, b"TACG")],
            vec![Edge::forward(1, 2)],
        );
        // read omits the boundary bases G and T
        let gms = run_banded(&graph, b"ACACG", 3, true, 1).unwrap();
        let deleted: usize = gms[0]
            .node_cigars
            .iter()
            .flat_map(|(_, elements)| elements)
            .filter(|element| element.op == CigarOp::Deletion)
            .map(|element| element.len)
            .sum();
        assert_eq!(deleted, 2);
    }
}
