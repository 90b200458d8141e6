//! Traceback-to-path translation
//!
//! Converts a per-node CIGAR stream into the canonical edit-level path:
//! aligned runs are split into match runs and single-base substitutions by
//! comparing node sequence against the read, deletions/insertions map to
//! length-only edits, and soft clips are insertions that happen to sit at
//! the path ends. For pinned alignments the artefacts recorded on the dummy
//! pinning node are excised first, relocating any indels onto the adjacent
//! real node so the dummy never leaks into user-visible edits.

use std::collections::HashMap;

use super::dp::{CigarElement, CigarOp, DpGraph, GraphMapping, DUMMY_PIN_ID};
use crate::graph::Graph;
use crate::result::{path_identity, Alignment, Mapping, Path, Position};
use crate::result::Edit;
use crate::{Error, Result};

/// Rewrite `gm` into `alignment.path`, excising pinning artefacts when
/// `pinned` is set. `graph` supplies the original forward node sequences
/// used for match/substitution splitting.
pub(crate) fn mapping_to_alignment(
    mut gm: GraphMapping,
    dp: &DpGraph,
    graph: &Graph,
    alignment: &mut Alignment,
    pinned: bool,
    pin_left: bool,
) -> Result<()> {
    if pinned {
        excise_dummy(&mut gm.node_cigars, dp, pin_left)?;
    }

    let node_seqs: HashMap<u64, &[u8]> = graph
        .nodes
        .iter()
        .map(|node| (node.id, node.sequence.as_slice()))
        .collect();

    let to_seq = alignment.sequence.clone();
    let read = to_seq.as_bytes();
    let mut path = Path::default();
    let mut to_pos = 0usize;
    let mut from_pos = gm.position;

    for (index, (dp_node, elements)) in gm.node_cigars.iter().enumerate() {
        if index > 0 {
            // every node after the first starts at its beginning
            from_pos = 0;
        }
        if elements.is_empty() {
            continue;
        }

        let id = dp.nodes[*dp_node].id;
        let from_seq = node_seqs.get(&id).ok_or(Error::CigarInvariantViolated(
            "traceback references a node outside the input graph",
        ))?;

        let mut mapping = Mapping {
            position: Position {
                node_id: id,
                offset: from_pos,
            },
            rank: path.mappings.len() + 1,
            edits: Vec::new(),
        };

        for element in elements {
            let len = element.len;
            match element.op {
                CigarOp::Match | CigarOp::Mismatch | CigarOp::NMatch => {
                    // split the aligned run into true-match runs and
                    // single-base substitutions, reference-relative
                    let mut last_start = from_pos;
                    let mut h = from_pos;
                    let mut k = to_pos;
                    while h < from_pos + len {
                        if from_seq[h] != read[k] {
                            if h > last_start {
                                mapping.edits.push(Edit::matching(h - last_start));
                            }
                            mapping.edits.push(Edit::substitution(read[k] as char));
                            last_start = h + 1;
                        }
                        h += 1;
                        k += 1;
                    }
                    if h > last_start {
                        mapping.edits.push(Edit::matching(h - last_start));
                    }
                    from_pos += len;
                    to_pos += len;
                }
                CigarOp::Deletion => {
                    mapping.edits.push(Edit::deletion(len));
                    from_pos += len;
                }
                // soft clips and insertions are the same edit; only their
                // position along the read distinguishes them
                CigarOp::Insertion | CigarOp::SoftClip => {
                    mapping.edits.push(Edit::insertion(&to_seq[to_pos..to_pos + len]));
                    to_pos += len;
                }
            }
        }

        path.mappings.push(mapping);
    }

    alignment.path = path;
    alignment.score = gm.score;
    alignment.identity = path_identity(&alignment.path);
    Ok(())
}

/// Strip the dummy pinning node's CIGAR and relocate the artefacts it
/// carries. The dummy contributes exactly one graph column (its `N`), so
/// its CIGAR is one of `[N]`, `[D]`, `[I.., D]`, `[I.., N]` (left pin) or
/// the mirror image (right pin); anything else is an engine bug.
fn excise_dummy(
    node_cigars: &mut Vec<(usize, Vec<CigarElement>)>,
    dp: &DpGraph,
    pin_left: bool,
) -> Result<()> {
    let dummy_entry = if pin_left {
        if node_cigars.is_empty() {
            return Ok(());
        }
        node_cigars.remove(0)
    } else {
        match node_cigars.pop() {
            Some(entry) => entry,
            None => return Ok(()),
        }
    };
    let (dummy_node, mut dummy_cigar) = dummy_entry;
    if dp.nodes[dummy_node].id != DUMMY_PIN_ID {
        return Err(Error::CigarInvariantViolated(
            "pinned traceback did not terminate on the pinning node",
        ));
    }
    if dummy_cigar.is_empty() {
        return Ok(());
    }

    if pin_left {
        // was the dummy's N deleted?
        if dummy_cigar.last().map(|e| e.op) == Some(CigarOp::Deletion) {
            if dummy_cigar[0].op == CigarOp::Insertion {
                // the insert must include the artificial read N; drop one
                dummy_cigar[0].len -= 1;
            } else {
                relocate_deletion_forward(node_cigars)?;
            }
        }
        // was there an insertion on the dummy?
        if dummy_cigar[0].op == CigarOp::Insertion && dummy_cigar[0].len > 0 {
            if let Some((_, elements)) = node_cigars.first_mut() {
                elements.insert(0, CigarElement::new(CigarOp::Insertion, dummy_cigar[0].len));
            }
        }
    } else {
        if dummy_cigar[0].op == CigarOp::Deletion {
            match dummy_cigar.last_mut() {
                Some(last) if last.op == CigarOp::Insertion => last.len -= 1,
                _ => relocate_deletion_backward(node_cigars)?,
            }
        }
        if let Some(last) = dummy_cigar.last() {
            if last.op == CigarOp::Insertion && last.len > 0 {
                if let Some((_, elements)) = node_cigars.last_mut() {
                    elements.push(CigarElement::new(CigarOp::Insertion, last.len));
                }
            }
        }
    }

    Ok(())
}

/// The dummy's `N` was deleted with no insert to cancel against: the
/// artificial read base was consumed further along, as an `N`-match or
/// inside an insert. Walk forward to the first such element and trade one
/// unit of it against a deletion, lengthening a neighboring `D` when one
/// exists. Only deletions may precede the located element.
fn relocate_deletion_forward(
    node_cigars: &mut [(usize, Vec<CigarElement>)],
) -> Result<()> {
    for (_, cigar) in node_cigars.iter_mut() {
        for j in 0..cigar.len() {
            match cigar[j].op {
                CigarOp::NMatch | CigarOp::Insertion => {
                    if j > 0 {
                        // preceded by a deletion (anything else errored below)
                        cigar[j - 1].len += 1;
                        if cigar[j].len > 1 {
                            cigar[j].len -= 1;
                        } else {
                            cigar.remove(j);
                        }
                    } else if cigar[j].len == 1 && cigar[j].op == CigarOp::NMatch {
                        cigar[j] = CigarElement::new(CigarOp::Deletion, 1);
                    } else if cigar[j].len == 1 && cigar[j].op == CigarOp::Insertion {
                        // one deletion and one insertion cancel out
                        cigar.remove(j);
                    } else {
                        cigar[j].len -= 1;
                        cigar.insert(0, CigarElement::new(CigarOp::Deletion, 1));
                    }
                    return Ok(());
                }
                CigarOp::Deletion => {}
                _ => {
                    return Err(Error::CigarInvariantViolated(
                        "pinned alignment took a true match before the dummy pinning column",
                    ));
                }
            }
        }
    }
    Err(Error::CigarInvariantViolated(
        "dummy deletion found nothing to relocate against",
    ))
}

/// Mirror of [`relocate_deletion_forward`] for right-pinned alignments.
fn relocate_deletion_backward(
    node_cigars: &mut [(usize, Vec<CigarElement>)],
) -> Result<()> {
    for (_, cigar) in node_cigars.iter_mut().rev() {
        for j in (0..cigar.len()).rev() {
            match cigar[j].op {
                CigarOp::NMatch | CigarOp::Insertion => {
                    if j + 1 < cigar.len() {
                        cigar[j + 1].len += 1;
                        if cigar[j].len > 1 {
                            cigar[j].len -= 1;
                        } else {
                            cigar.remove(j);
                        }
                    } else if cigar[j].len == 1 && cigar[j].op == CigarOp::NMatch {
                        cigar[j] = CigarElement::new(CigarOp::Deletion, 1);
                    } else if cigar[j].len == 1 && cigar[j].op == CigarOp::Insertion {
                        cigar.remove(j);
                    } else {
                        cigar[j].len -= 1;
                        cigar.push(CigarElement::new(CigarOp::Deletion, 1));
                    }
                    return Ok(());
                }
                CigarOp::Deletion => {}
                _ => {
                    return Err(Error::CigarInvariantViolated(
                        "pinned alignment took a true match before the dummy pinning column",
                    ));
                }
            }
        }
    }
    Err(Error::CigarInvariantViolated(
        "dummy deletion found nothing to relocate against",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn dp_with_dummy() -> DpGraph {
        let graph = Graph::from_parts(vec![Node::new(1, b"ACGT")], vec![]);
        DpGraph::build(&graph, true).unwrap()
    }

    fn element(op: CigarOp, len: usize) -> CigarElement {
        CigarElement::new(op, len)
    }

    #[test]
    fn translation_splits_mismatch_runs() {
        let graph = Graph::from_parts(vec![Node::new(1, b"ACGTACGT")], vec![]);
        let dp = DpGraph::build(&graph, false).unwrap();
        let gm = GraphMapping {
            score: 3,
            position: 0,
            node_cigars: vec![(0, vec![element(CigarOp::Match, 8)])],
        };
        let mut aln = Alignment::from_sequence("ACGAACGT");
        mapping_to_alignment(gm, &dp, &graph, &mut aln, false, false).unwrap();

        let edits = &aln.path.mappings[0].edits;
        assert_eq!(edits.len(), 3);
        assert_eq!(edits[0], Edit::matching(3));
        assert_eq!(edits[1], Edit::substitution('A'));
        assert_eq!(edits[2], Edit::matching(4));
    }

    #[test]
    fn translation_assigns_dense_ranks_and_offsets() {
        let graph = Graph::from_parts(
            vec![Node::new(1, b"ACGT"), Node::new(2, b"ACGT")],
            vec![crate::graph::Edge::forward(1, 2)],
        );
        let dp = DpGraph::build(&graph, false).unwrap();
        let gm = GraphMapping {
            score: 6,
            position: 2,
            node_cigars: vec![
                (0, vec![element(CigarOp::Match, 2)]),
                (1, vec![element(CigarOp::Match, 4)]),
            ],
        };
        let mut aln = Alignment::from_sequence("GTACGT");
        mapping_to_alignment(gm, &dp, &graph, &mut aln, false, false).unwrap();

        assert_eq!(aln.path.mappings.len(), 2);
        assert_eq!(aln.path.mappings[0].rank, 1);
        assert_eq!(aln.path.mappings[0].position.offset, 2);
        assert_eq!(aln.path.mappings[1].rank, 2);
        assert_eq!(aln.path.mappings[1].position.offset, 0);
        assert_eq!(aln.identity, 1.0);
    }

    #[test]
    fn right_pin_excise_strips_matched_dummy() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        let mut cigars = vec![
            (0, vec![element(CigarOp::Match, 4)]),
            (dummy, vec![element(CigarOp::NMatch, 1)]),
        ];
        excise_dummy(&mut cigars, &dp, false).unwrap();
        assert_eq!(cigars, vec![(0, vec![element(CigarOp::Match, 4)])]);
    }

    #[test]
    fn right_pin_excise_relocates_deleted_dummy_onto_n_match() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        // the artificial read N matched a real node base as an N column
        let mut cigars = vec![
            (0, vec![element(CigarOp::Match, 3), element(CigarOp::NMatch, 1)]),
            (dummy, vec![element(CigarOp::Deletion, 1)]),
        ];
        excise_dummy(&mut cigars, &dp, false).unwrap();
        assert_eq!(
            cigars,
            vec![(
                0,
                vec![element(CigarOp::Match, 3), element(CigarOp::Deletion, 1)]
            )]
        );
    }

    #[test]
    fn right_pin_excise_cancels_deletion_against_insert() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        let mut cigars = vec![
            (
                0,
                vec![element(CigarOp::Match, 4), element(CigarOp::Insertion, 1)],
            ),
            (dummy, vec![element(CigarOp::Deletion, 1)]),
        ];
        excise_dummy(&mut cigars, &dp, false).unwrap();
        assert_eq!(cigars, vec![(0, vec![element(CigarOp::Match, 4)])]);
    }

    #[test]
    fn right_pin_excise_moves_dummy_insert_to_real_node() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        // dummy N deleted, artificial read N plus one real base inserted
        let mut cigars = vec![
            (0, vec![element(CigarOp::Match, 4)]),
            (
                dummy,
                vec![element(CigarOp::Deletion, 1), element(CigarOp::Insertion, 2)],
            ),
        ];
        excise_dummy(&mut cigars, &dp, false).unwrap();
        assert_eq!(
            cigars,
            vec![(
                0,
                vec![element(CigarOp::Match, 4), element(CigarOp::Insertion, 1)]
            )]
        );
    }

    #[test]
    fn left_pin_excise_mirrors_relocation() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        let mut cigars = vec![
            (dummy, vec![element(CigarOp::Deletion, 1)]),
            (0, vec![element(CigarOp::NMatch, 1), element(CigarOp::Match, 3)]),
        ];
        excise_dummy(&mut cigars, &dp, true).unwrap();
        assert_eq!(
            cigars,
            vec![(
                0,
                vec![element(CigarOp::Deletion, 1), element(CigarOp::Match, 3)]
            )]
        );
    }

    #[test]
    fn left_pin_excise_lengthens_adjacent_deletion() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        let mut cigars = vec![
            (dummy, vec![element(CigarOp::Deletion, 1)]),
            (
                0,
                vec![
                    element(CigarOp::Deletion, 2),
                    element(CigarOp::NMatch, 2),
                    element(CigarOp::Match, 2),
                ],
            ),
        ];
        excise_dummy(&mut cigars, &dp, true).unwrap();
        assert_eq!(
            cigars,
            vec![(
                0,
                vec![
                    element(CigarOp::Deletion, 3),
                    element(CigarOp::NMatch, 1),
                    element(CigarOp::Match, 2),
                ]
            )]
        );
    }

    #[test]
    fn excise_errors_on_true_match_before_dummy_column() {
        let dp = dp_with_dummy();
        let dummy = dp.dummy.unwrap();
        let mut cigars = vec![
            (0, vec![element(CigarOp::Match, 4)]),
            (dummy, vec![element(CigarOp::Deletion, 1)]),
        ];
        assert!(matches!(
            excise_dummy(&mut cigars, &dp, false),
            Err(Error::CigarInvariantViolated(_))
        ));
    }
}
