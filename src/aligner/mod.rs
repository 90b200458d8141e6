//! Graph aligners
//!
//! [`Aligner`] scores reads against a variation graph with the plain
//! substitution matrix; [`QualAdjAligner`] swaps in base-quality-adjusted
//! scores. Both expose the same alignment family: local, pinned (single and
//! k-best), and banded global (single and k-best), plus mapping-quality
//! estimation over competing alignments. An aligner holds only immutable
//! scoring tables, so one instance can serve many threads as long as each
//! call gets its own `Alignment` and output buffers.

pub(crate) mod banded;
pub(crate) mod dp;
pub(crate) mod translate;

pub use dp::DUMMY_PIN_ID;

use crate::encode;
use crate::graph::Graph;
use crate::mapq;
use crate::result::{Alignment, Edit, Mapping, Position};
use crate::scoring::{self, QualAdjTable, ScoreMatrix, ScoringParams, LAMBDA_TOLERANCE};
use crate::{Error, Result};
use dp::{DpGraph, SubstScorer};

/// Graph aligner over the plain 5x5 substitution matrix.
pub struct Aligner {
    params: ScoringParams,
    matrix: ScoreMatrix,
    /// Karlin-Altschul log base; positive once `init_mapping_quality` ran.
    log_base: f64,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::from_params(ScoringParams::default())
    }
}

impl Aligner {
    pub fn new(match_score: i32, mismatch: i32, gap_open: i32, gap_extension: i32) -> Result<Self> {
        Ok(Self::from_params(ScoringParams::new(
            match_score,
            mismatch,
            gap_open,
            gap_extension,
        )?))
    }

    pub fn from_params(params: ScoringParams) -> Self {
        let matrix = ScoreMatrix::substitution(&params);
        Self {
            params,
            matrix,
            log_base: 0.0,
        }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// Local (Smith-Waterman) alignment; rewrites `alignment`'s path, score,
    /// and identity. `print_matrices` dumps the filled DP tables through the
    /// logger at debug level.
    pub fn align(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        print_matrices: bool,
    ) -> Result<()> {
        align_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            Mode {
                pinned: false,
                pin_left: false,
            },
            1,
            0,
            print_matrices,
        )?;
        Ok(())
    }

    /// Pinned alignment: the read end (or start, with `pin_left`) is anchored
    /// to a graph sink (or source). A zero-score result degrades to a
    /// synthesized whole-read soft clip at the pin position.
    pub fn align_pinned(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        pin_left: bool,
        full_length_bonus: i32,
    ) -> Result<()> {
        align_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            Mode {
                pinned: true,
                pin_left,
            },
            1,
            full_length_bonus,
            false,
        )?;
        Ok(())
    }

    /// Pinned alignment with up to `max_alt_alns` tracebacks. The primary is
    /// written into `alignment` and returned at index 0 of the result;
    /// alternates follow in strictly score-descending order, truncated at
    /// the first zero-score traceback.
    pub fn align_pinned_multi(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        pin_left: bool,
        max_alt_alns: usize,
        full_length_bonus: i32,
    ) -> Result<Vec<Alignment>> {
        align_internal(
            &self.engine(),
            alignment,
            Some(max_alt_alns),
            graph,
            Mode {
                pinned: true,
                pin_left,
            },
            max_alt_alns,
            full_length_bonus,
            false,
        )
    }

    /// Global (Needleman-Wunsch) alignment restricted to a diagonal band.
    pub fn align_global_banded(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        band_padding: usize,
        permissive_banding: bool,
    ) -> Result<()> {
        banded_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            band_padding,
            permissive_banding,
        )?;
        Ok(())
    }

    /// Banded global alignment with up to `max_alt_alns` tracebacks; the
    /// result vector is prefixed with a copy of the primary.
    pub fn align_global_banded_multi(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        max_alt_alns: usize,
        band_padding: usize,
        permissive_banding: bool,
    ) -> Result<Vec<Alignment>> {
        banded_internal(
            &self.engine(),
            alignment,
            Some(max_alt_alns),
            graph,
            band_padding,
            permissive_banding,
        )
    }

    /// Solve for the Karlin-Altschul log base at the given background GC
    /// content. Must run before any mapping-quality computation.
    pub fn init_mapping_quality(&mut self, gc_content: f64) {
        self.log_base = scoring::recover_log_base(
            self.params.match_score,
            self.params.mismatch,
            gc_content,
            LAMBDA_TOLERANCE,
        );
    }

    /// A positive log base means `init_mapping_quality` has run.
    pub fn is_mapping_quality_initialized(&self) -> bool {
        self.log_base > 0.0
    }

    /// Phred-scaled confidence that the best-scoring alignment is the true
    /// placement, written onto that alignment. `cluster_mq` folds in a
    /// cluster-level quality when `use_cluster_mq` is set.
    pub fn compute_mapping_quality(
        &self,
        alignments: &mut [Alignment],
        max_mapping_quality: i32,
        fast_approximation: bool,
        cluster_mq: f64,
        use_cluster_mq: bool,
    ) -> Result<()> {
        if !self.is_mapping_quality_initialized() {
            return Err(Error::MappingQualityUninitialized);
        }
        if alignments.is_empty() {
            return Ok(());
        }

        let mut scaled_scores: Vec<f64> = alignments
            .iter()
            .map(|aln| self.log_base * aln.score as f64)
            .collect();

        let (mut quality, max_idx) = if fast_approximation {
            mapq::maximum_mapping_quality_approx(&mut scaled_scores)
        } else {
            mapq::maximum_mapping_quality_exact(&mut scaled_scores)
        };
        // the appended null baseline can out-score a lone negative
        // alignment; it is a comparison point, never an annotation target
        let max_idx = max_idx.min(alignments.len() - 1);

        if quality > max_mapping_quality as f64 {
            quality = max_mapping_quality as f64;
        }
        if use_cluster_mq {
            quality = mapq::combine_with_cluster_mq(cluster_mq, quality);
        }

        alignments[max_idx].mapping_quality = quality.round() as i32;
        Ok(())
    }

    /// Paired variant: scores of mates at the same rank are summed and the
    /// quality is written onto both mates of the best pair.
    pub fn compute_paired_mapping_quality(
        &self,
        alignment_pairs: &mut (Vec<Alignment>, Vec<Alignment>),
        max_mapping_quality: i32,
        fast_approximation: bool,
        cluster_mq: f64,
        use_cluster_mq: bool,
    ) -> Result<()> {
        if !self.is_mapping_quality_initialized() {
            return Err(Error::MappingQualityUninitialized);
        }
        let size = alignment_pairs.0.len().min(alignment_pairs.1.len());
        if size == 0 {
            return Ok(());
        }

        let mut scaled_scores: Vec<f64> = (0..size)
            .map(|i| {
                self.log_base * (alignment_pairs.0[i].score + alignment_pairs.1[i].score) as f64
            })
            .collect();

        let (mut quality, max_idx) = if fast_approximation {
            mapq::maximum_mapping_quality_approx(&mut scaled_scores)
        } else {
            mapq::maximum_mapping_quality_exact(&mut scaled_scores)
        };
        // the appended null baseline can out-score a lone negative pair;
        // it is a comparison point, never an annotation target
        let max_idx = max_idx.min(size - 1);

        if quality > max_mapping_quality as f64 {
            quality = max_mapping_quality as f64;
        }
        if use_cluster_mq {
            quality = mapq::combine_with_cluster_mq(cluster_mq, quality);
        }

        let rounded = quality.round() as i32;
        alignment_pairs.0[max_idx].mapping_quality = rounded;
        alignment_pairs.1[max_idx].mapping_quality = rounded;
        Ok(())
    }

    /// Score of a read aligning to itself with no edits.
    pub fn score_exact_match(&self, sequence: &str) -> i32 {
        self.params.match_score * sequence.len() as i32
    }

    /// Natural log of the unnormalized alignment likelihood for a raw score.
    pub fn score_to_unnormalized_likelihood_ln(&self, score: f64) -> Result<f64> {
        if !self.is_mapping_quality_initialized() {
            return Err(Error::MappingQualityUninitialized);
        }
        Ok(self.log_base * score)
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            params: &self.params,
            matrix: &self.matrix,
            qual: None,
        }
    }
}

/// Graph aligner with base-quality-adjusted substitution scores.
///
/// Wraps the plain aligner's parameters with a per-quality score table
/// calibrated so the largest adjusted score equals `max_scaled_score`; gap
/// penalties and the full-length bonus are scaled by the same factor.
pub struct QualAdjAligner {
    aligner: Aligner,
    table: QualAdjTable,
}

impl QualAdjAligner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        match_score: i32,
        mismatch: i32,
        gap_open: i32,
        gap_extension: i32,
        max_scaled_score: i32,
        max_qual_score: u8,
        gc_content: f64,
    ) -> Result<Self> {
        let params = ScoringParams::new(match_score, mismatch, gap_open, gap_extension)?;
        let table = QualAdjTable::build(max_scaled_score, max_qual_score, &params, gc_content);
        let mut qual_adj = Self {
            aligner: Aligner::from_params(params),
            table,
        };
        qual_adj.init_mapping_quality(gc_content);
        Ok(qual_adj)
    }

    pub fn align(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        print_matrices: bool,
    ) -> Result<()> {
        align_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            Mode {
                pinned: false,
                pin_left: false,
            },
            1,
            0,
            print_matrices,
        )?;
        Ok(())
    }

    pub fn align_pinned(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        pin_left: bool,
        full_length_bonus: i32,
    ) -> Result<()> {
        align_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            Mode {
                pinned: true,
                pin_left,
            },
            1,
            full_length_bonus,
            false,
        )?;
        Ok(())
    }

    pub fn align_pinned_multi(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        pin_left: bool,
        max_alt_alns: usize,
        full_length_bonus: i32,
    ) -> Result<Vec<Alignment>> {
        align_internal(
            &self.engine(),
            alignment,
            Some(max_alt_alns),
            graph,
            Mode {
                pinned: true,
                pin_left,
            },
            max_alt_alns,
            full_length_bonus,
            false,
        )
    }

    pub fn align_global_banded(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        band_padding: usize,
        permissive_banding: bool,
    ) -> Result<()> {
        banded_internal(
            &self.engine(),
            alignment,
            None,
            graph,
            band_padding,
            permissive_banding,
        )?;
        Ok(())
    }

    pub fn align_global_banded_multi(
        &self,
        alignment: &mut Alignment,
        graph: &Graph,
        max_alt_alns: usize,
        band_padding: usize,
        permissive_banding: bool,
    ) -> Result<Vec<Alignment>> {
        banded_internal(
            &self.engine(),
            alignment,
            Some(max_alt_alns),
            graph,
            band_padding,
            permissive_banding,
        )
    }

    /// Recompute the log base and recalibrate it to the scaled score table.
    pub fn init_mapping_quality(&mut self, gc_content: f64) {
        let lambda = scoring::recover_log_base(
            self.aligner.params.match_score,
            self.aligner.params.mismatch,
            gc_content,
            LAMBDA_TOLERANCE,
        );
        // scores coming out of the engine carry the table's scale factor
        self.aligner.log_base = lambda / self.table.scale;
    }

    pub fn is_mapping_quality_initialized(&self) -> bool {
        self.aligner.is_mapping_quality_initialized()
    }

    pub fn compute_mapping_quality(
        &self,
        alignments: &mut [Alignment],
        max_mapping_quality: i32,
        fast_approximation: bool,
        cluster_mq: f64,
        use_cluster_mq: bool,
    ) -> Result<()> {
        self.aligner.compute_mapping_quality(
            alignments,
            max_mapping_quality,
            fast_approximation,
            cluster_mq,
            use_cluster_mq,
        )
    }

    pub fn compute_paired_mapping_quality(
        &self,
        alignment_pairs: &mut (Vec<Alignment>, Vec<Alignment>),
        max_mapping_quality: i32,
        fast_approximation: bool,
        cluster_mq: f64,
        use_cluster_mq: bool,
    ) -> Result<()> {
        self.aligner.compute_paired_mapping_quality(
            alignment_pairs,
            max_mapping_quality,
            fast_approximation,
            cluster_mq,
            use_cluster_mq,
        )
    }

    pub fn score_to_unnormalized_likelihood_ln(&self, score: f64) -> Result<f64> {
        self.aligner.score_to_unnormalized_likelihood_ln(score)
    }

    /// Quality-adjusted score of a read aligning to itself with no edits.
    pub fn score_exact_match(&self, sequence: &str, base_quality: &[u8]) -> i32 {
        sequence
            .bytes()
            .zip(base_quality.iter())
            .map(|(base, &qual)| self.table.exact_match_score(qual, encode::encode_base(base)))
            .sum()
    }

    fn engine(&self) -> Engine<'_> {
        Engine {
            params: &self.aligner.params,
            matrix: &self.aligner.matrix,
            qual: Some(&self.table),
        }
    }
}

/// Scoring context shared by the alignment drivers.
struct Engine<'a> {
    params: &'a ScoringParams,
    matrix: &'a ScoreMatrix,
    qual: Option<&'a QualAdjTable>,
}

impl<'a> Engine<'a> {
    fn gap_penalties(&self) -> (i32, i32) {
        match self.qual {
            Some(table) => (table.scaled_gap_open, table.scaled_gap_extension),
            None => (self.params.gap_open, self.params.gap_extension),
        }
    }

    fn scale_bonus(&self, full_length_bonus: i32) -> i32 {
        match self.qual {
            Some(table) => (full_length_bonus as f64 * table.scale).round() as i32,
            None => full_length_bonus,
        }
    }

    fn scorer<'s>(&'s self, quals: &'s [u8]) -> SubstScorer<'s> {
        match self.qual {
            Some(table) => SubstScorer::QualAdjusted { table, quals },
            None => SubstScorer::Plain(self.matrix),
        }
    }

    fn check_quality(&self, alignment: &Alignment) -> Result<()> {
        if self.qual.is_some() && alignment.quality.len() != alignment.sequence.len() {
            return Err(Error::QualityLengthMismatch {
                sequence: alignment.sequence.len(),
                quality: alignment.quality.len(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Mode {
    pinned: bool,
    pin_left: bool,
}

/// Shared local/pinned driver. Validates the mode triple, optionally
/// reverses the graph and read for left-pinning, runs the fill and
/// traceback(s), translates back into the original coordinate frame, and
/// synthesizes the zero-score soft-clip record when pinning found nothing.
#[allow(clippy::too_many_arguments)]
fn align_internal(
    engine: &Engine<'_>,
    alignment: &mut Alignment,
    multi: Option<usize>,
    graph: &Graph,
    mode: Mode,
    max_alt_alns: usize,
    full_length_bonus: i32,
    print_matrices: bool,
) -> Result<Vec<Alignment>> {
    if mode.pin_left && !mode.pinned {
        return Err(Error::PinLeftWithoutPin);
    }
    if multi.is_some() && !mode.pinned {
        return Err(Error::MultiAltWithoutPin);
    }
    engine.check_quality(alignment)?;

    if graph.is_empty() {
        alignment.clear_alignment();
        return Ok(match multi {
            Some(_) => vec![alignment.clone()],
            None => Vec::new(),
        });
    }

    // pinning is formulated as bottom-right-corner anchoring; left pins run
    // against the reversed graph and read and are translated back afterward
    let reversed;
    let align_graph = if mode.pinned && mode.pin_left {
        reversed = graph.reversed();
        &reversed
    } else {
        graph
    };

    let mut align_sequence = alignment.sequence.clone().into_bytes();
    let mut align_quality = alignment.quality.clone();
    if mode.pinned {
        if mode.pin_left {
            align_sequence.reverse();
            align_quality.reverse();
        }
        // dummy ending that aligns to the dummy pinned node
        align_sequence.push(b'N');
        if engine.qual.is_some() {
            align_quality.push(0);
        }
    }
    let read_codes = encode::encode_seq(&align_sequence);

    let dp = DpGraph::build(align_graph, mode.pinned)?;
    let (gap_open, gap_extension) = engine.gap_penalties();
    let bonus = engine.scale_bonus(full_length_bonus);
    let scorer = engine.scorer(&align_quality);

    let tables = dp::fill(&dp, &read_codes, &scorer, gap_open, gap_extension, bonus);
    if print_matrices {
        dp::log_score_matrices(&dp, &tables, &align_sequence);
    }

    if mode.pinned {
        let mut gms = dp::traceback_pinned_multi(
            &dp,
            &tables,
            &read_codes,
            &scorer,
            gap_open,
            gap_extension,
            bonus,
            max_alt_alns,
        )?;

        if mode.pin_left {
            for gm in &mut gms {
                dp::unreverse_graph_mapping(gm, &dp);
            }
        }
        log::debug!(
            "pinned traceback: {} candidates, best {}",
            gms.len(),
            gms[0].describe(&dp)
        );

        alignment.clear_alignment();
        if gms[0].score > 0 {
            translate::mapping_to_alignment(
                gms[0].clone(),
                &dp,
                graph,
                alignment,
                true,
                mode.pin_left,
            )?;
        }
        if alignment.path.is_empty() {
            // the engine does not identify zero-score mappings; infer the
            // location from the pin instead of returning nothing
            synthesize_soft_clip(alignment, graph, mode.pin_left);
        }

        if multi.is_some() {
            let num_non_null = 1 + gms[1..].iter().take_while(|gm| gm.score > 0).count();
            let mut alternates = Vec::with_capacity(num_non_null);
            alternates.push(alignment.clone());
            for gm in gms.drain(..).skip(1).take(num_non_null - 1) {
                let mut next = Alignment::with_quality(&alignment.sequence, &alignment.quality);
                translate::mapping_to_alignment(gm, &dp, graph, &mut next, true, mode.pin_left)?;
                alternates.push(next);
            }
            return Ok(alternates);
        }
        Ok(Vec::new())
    } else {
        let gm = dp::traceback_local(
            &dp,
            &tables,
            &read_codes,
            &scorer,
            gap_open,
            gap_extension,
            bonus,
        )?;
        alignment.clear_alignment();
        translate::mapping_to_alignment(gm, &dp, graph, alignment, false, false)?;
        Ok(Vec::new())
    }
}

/// Shared banded-global driver.
fn banded_internal(
    engine: &Engine<'_>,
    alignment: &mut Alignment,
    multi: Option<usize>,
    graph: &Graph,
    band_padding: usize,
    permissive_banding: bool,
) -> Result<Vec<Alignment>> {
    engine.check_quality(alignment)?;

    if graph.is_empty() {
        alignment.clear_alignment();
        return Ok(match multi {
            Some(_) => vec![alignment.clone()],
            None => Vec::new(),
        });
    }

    let read_codes = encode::encode_seq(alignment.sequence.as_bytes());
    let dp = DpGraph::build(graph, false)?;
    let (gap_open, gap_extension) = engine.gap_penalties();
    let scorer = engine.scorer(&alignment.quality);

    let max_alt_alns = multi.unwrap_or(1);
    let gms = banded::align_banded_multi(
        &dp,
        &read_codes,
        &scorer,
        gap_open,
        gap_extension,
        band_padding,
        permissive_banding,
        max_alt_alns,
    )?;

    alignment.clear_alignment();
    let mut gms = gms.into_iter();
    let primary = gms.next().ok_or(Error::CigarInvariantViolated(
        "banded alignment returned no traceback",
    ))?;
    translate::mapping_to_alignment(primary, &dp, graph, alignment, false, false)?;

    if multi.is_some() {
        let mut alternates = vec![alignment.clone()];
        for gm in gms {
            let mut next = Alignment::with_quality(&alignment.sequence, &alignment.quality);
            translate::mapping_to_alignment(gm, &dp, graph, &mut next, false, false)?;
            alternates.push(next);
        }
        return Ok(alternates);
    }
    Ok(Vec::new())
}

/// Whole-read soft clip at the pin position, used when a pinned alignment
/// scores zero.
fn synthesize_soft_clip(alignment: &mut Alignment, graph: &Graph, pin_left: bool) {
    alignment.clear_alignment();
    let (node_id, offset) = if pin_left {
        (graph.nodes[0].id, 0)
    } else {
        let last = &graph.nodes[graph.nodes.len() - 1];
        (last.id, last.len())
    };
    let sequence = alignment.sequence.clone();
    alignment.path.mappings.push(Mapping {
        position: Position { node_id, offset },
        rank: 1,
        edits: vec![Edit::insertion(&sequence)],
    });
}
