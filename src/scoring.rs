//! Scoring parameters, substitution matrices, and score calibration
//!
//! Raw alignment scores come from a 5x5 nucleotide substitution matrix with
//! `match` on the A/C/G/T diagonal, `-mismatch` elsewhere, and zero in the
//! `N` row and column. The Karlin-Altschul log base `lambda` recovered from
//! the same parameters converts raw scores into log likelihoods for mapping
//! quality, and anchors the base-quality-adjusted matrix used by
//! [`crate::QualAdjAligner`].

use crate::encode::{NT_COUNT, NT_N};
use crate::{Error, Result};

/// Tolerance used when solving for the Karlin-Altschul log base.
pub(crate) const LAMBDA_TOLERANCE: f64 = 1e-12;

/// Affine-gap scoring parameters. All four values are magnitudes; the
/// conventional signs (penalties subtract) are applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringParams {
    pub match_score: i32,
    pub mismatch: i32,
    pub gap_open: i32,
    pub gap_extension: i32,
}

impl ScoringParams {
    pub fn new(match_score: i32, mismatch: i32, gap_open: i32, gap_extension: i32) -> Result<Self> {
        let params = Self {
            match_score,
            mismatch,
            gap_open,
            gap_extension,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if self.match_score < 0 || self.mismatch < 0 || self.gap_open < 0 || self.gap_extension < 0
        {
            return Err(Error::InvalidScoringParams);
        }
        Ok(())
    }
}

impl Default for ScoringParams {
    /// The conventional short-read defaults: 1/4/6/1.
    fn default() -> Self {
        Self {
            match_score: 1,
            mismatch: 4,
            gap_open: 6,
            gap_extension: 1,
        }
    }
}

/// 5x5 nucleotide substitution matrix over the 0-4 code alphabet.
#[derive(Debug, Clone)]
pub struct ScoreMatrix {
    entries: [i32; NT_COUNT * NT_COUNT],
}

impl ScoreMatrix {
    pub fn substitution(params: &ScoringParams) -> Self {
        let mut entries = [0i32; NT_COUNT * NT_COUNT];
        for i in 0..NT_COUNT {
            for j in 0..NT_COUNT {
                entries[i * NT_COUNT + j] = if i == NT_N as usize || j == NT_N as usize {
                    0
                } else if i == j {
                    params.match_score
                } else {
                    -params.mismatch
                };
            }
        }
        Self { entries }
    }

    #[inline]
    pub fn score(&self, ref_code: u8, read_code: u8) -> i32 {
        self.entries[ref_code as usize * NT_COUNT + read_code as usize]
    }
}

/// A/C/G/T background frequencies implied by a GC content.
fn base_frequencies(gc_content: f64) -> [f64; 4] {
    let at = (1.0 - gc_content) / 2.0;
    let gc = gc_content / 2.0;
    [at, gc, gc, at]
}

/// Recover the Karlin-Altschul log base `lambda` for the DNA substitution
/// matrix implied by `(match, mismatch, gc_content)`: the unique positive
/// root of `sum_ij f_i f_j exp(lambda * s_ij) = 1`.
///
/// Requires a negative expected substitution score, which holds for every
/// sensible match/mismatch pair.
pub(crate) fn recover_log_base(
    match_score: i32,
    mismatch: i32,
    gc_content: f64,
    tolerance: f64,
) -> f64 {
    let freqs = base_frequencies(gc_content);
    let score = |i: usize, j: usize| -> f64 {
        if i == j {
            match_score as f64
        } else {
            -(mismatch as f64)
        }
    };
    let partition = |lambda: f64| -> f64 {
        let mut sum = 0.0;
        for i in 0..4 {
            for j in 0..4 {
                sum += freqs[i] * freqs[j] * (lambda * score(i, j)).exp();
            }
        }
        sum
    };

    // The partition function dips below 1 just above zero (negative expected
    // score) and grows without bound, so bracket the root by doubling and
    // then bisect.
    let mut hi = 1.0;
    while partition(hi) < 1.0 && hi < 1e6 {
        hi *= 2.0;
    }
    let mut lo = 0.0;
    while hi - lo > tolerance {
        let mid = 0.5 * (lo + hi);
        if partition(mid) > 1.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Base-quality-adjusted substitution scores: one 5x5 block per Phred
/// quality in `0..=max_qual_score`, indexed `25*q + 5*ref + read`, scaled so
/// the largest entry equals `max_scaled_score`. Gap penalties are scaled by
/// the same factor so the adjusted scores stay commensurable.
#[derive(Debug, Clone)]
pub struct QualAdjTable {
    entries: Vec<i32>,
    max_qual_score: u8,
    pub scaled_gap_open: i32,
    pub scaled_gap_extension: i32,
    /// Multiplier applied to the unscaled log-likelihood-ratio scores.
    pub scale: f64,
}

impl QualAdjTable {
    pub fn build(
        max_scaled_score: i32,
        max_qual_score: u8,
        params: &ScoringParams,
        gc_content: f64,
    ) -> Self {
        let lambda = recover_log_base(
            params.match_score,
            params.mismatch,
            gc_content,
            LAMBDA_TOLERANCE,
        );
        let matrix = ScoreMatrix::substitution(params);

        // Unscaled adjusted score for observed read base `o` against graph
        // base `t` at quality `q`: the log, in units of lambda, of the
        // likelihood that the true read base aligns to `t`, marginalized
        // over the error model (correct with probability 1-eps, otherwise
        // uniform over the three other bases).
        let mut unscaled = vec![0.0f64; NT_COUNT * NT_COUNT * (max_qual_score as usize + 1)];
        for q in 0..=max_qual_score as usize {
            let eps = 10f64.powf(-(q as f64) / 10.0);
            for t in 0..4usize {
                for o in 0..4usize {
                    let mut mixture = (1.0 - eps)
                        * (lambda * matrix.score(t as u8, o as u8) as f64).exp();
                    for other in 0..4usize {
                        if other == o {
                            continue;
                        }
                        mixture += (eps / 3.0)
                            * (lambda * matrix.score(t as u8, other as u8) as f64).exp();
                    }
                    unscaled[NT_COUNT * NT_COUNT * q + NT_COUNT * t + o] = mixture.ln() / lambda;
                }
            }
        }

        let max_unscaled = unscaled.iter().cloned().fold(f64::MIN, f64::max);
        let scale = max_scaled_score as f64 / max_unscaled;
        let entries = unscaled
            .iter()
            .map(|&value| (value * scale).round() as i32)
            .collect();

        Self {
            entries,
            max_qual_score,
            scaled_gap_open: (params.gap_open as f64 * scale).round() as i32,
            scaled_gap_extension: (params.gap_extension as f64 * scale).round() as i32,
            scale,
        }
    }

    #[inline]
    pub fn score(&self, qual: u8, ref_code: u8, read_code: u8) -> i32 {
        let q = qual.min(self.max_qual_score) as usize;
        self.entries
            [NT_COUNT * NT_COUNT * q + NT_COUNT * ref_code as usize + read_code as usize]
    }

    /// Adjusted score of a base matching itself at the given quality.
    #[inline]
    pub fn exact_match_score(&self, qual: u8, code: u8) -> i32 {
        let q = qual.min(self.max_qual_score) as usize;
        self.entries[NT_COUNT * NT_COUNT * q + 6 * code as usize]
    }
}
