//! Graph-aware sequence alignment for variation graphs
//!
//! `graphalign` threads a read through a directed sequence graph and reports
//! the highest-scoring alignment as a path annotated with base-level edits.
//! Nodes carry DNA strings; edges declare adjacency between strand-labeled
//! node ends. The crate provides:
//!
//! - local (Smith-Waterman) alignment over the graph with affine gaps,
//! - pinned alignment that anchors one end of the read to a graph terminus,
//!   with k-best traceback,
//! - banded global (Needleman-Wunsch) alignment over topologically ordered
//!   nodes, and
//! - Phred-scaled mapping-quality estimation from competing alignment scores.
//!
//! The aligner consumes a caller-owned [`Graph`] view and an [`Alignment`]
//! holding the read; all DP state is allocated per call and released on
//! return, so a single [`Aligner`] can be shared across threads.
//!
//! ```
//! use graphalign::{Aligner, Alignment, Graph, Node};
//!
//! let graph = Graph::from_parts(vec![Node::new(1, b"ACGTACGT")], vec![]);
//! let mut aln = Alignment::from_sequence("ACGTACGT");
//! Aligner::default().align(&mut aln, &graph, false).unwrap();
//! assert_eq!(aln.score, 8);
//! assert_eq!(aln.identity, 1.0);
//! ```
//!
//! Graphs must be supplied in topological order of the canonical (end-to-start
//! forward) orientation and must not contain strand-reversing edges; see
//! [`Error::ReversingEdgeUnsupported`].

pub mod aligner;
pub mod encode;
pub mod graph;
pub(crate) mod mapq;
pub mod result;
pub mod scoring;

pub use crate::aligner::{Aligner, QualAdjAligner, DUMMY_PIN_ID};
pub use crate::graph::{Edge, Graph, Node};
pub use crate::result::{Alignment, Edit, Mapping, Path, Position};
pub use crate::scoring::ScoringParams;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The graph contains an edge that switches strands mid-alignment. The
    /// DP engine only understands canonical forward adjacency; callers must
    /// DAGify/unroll such graphs before aligning.
    #[error("cannot align across strand-reversing edge {from} -> {to}")]
    ReversingEdgeUnsupported { from: u64, to: u64 },

    /// Every node must carry at least one base; the DP has no
    /// representation for a zero-width column.
    #[error("node {node_id} has an empty sequence")]
    EmptyNodeSequence { node_id: u64 },

    #[error("cannot choose a pinned end in non-pinned alignment")]
    PinLeftWithoutPin,

    #[error("multiple traceback is only defined for pinned and global alignment")]
    MultiAltWithoutPin,

    #[error("sequence and quality have different lengths ({sequence} vs {quality})")]
    QualityLengthMismatch { sequence: usize, quality: usize },

    /// Scoring values are magnitudes; the conventional signs are applied by
    /// the engine, so negative inputs are almost certainly a caller bug.
    #[error("scoring parameters are magnitudes and cannot be negative")]
    InvalidScoringParams,

    #[error("mapping quality requested before init_mapping_quality")]
    MappingQualityUninitialized,

    /// Internal invariant failure while excising the pinning artefacts from
    /// a traceback. Indicates a bug in the DP engine rather than bad input.
    #[error("pinned alignment cigar reached an impossible state: {0}")]
    CigarInvariantViolated(&'static str),

    /// The requested band admits no complete source-to-sink alignment and
    /// permissive widening was not enabled.
    #[error("no alignment is possible within band padding {band_padding}")]
    BandInfeasible { band_padding: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
