//! Phred mapping-quality estimation from competing scaled alignment scores
//!
//! Scores arrive already scaled by the aligner's log base, so each is the
//! natural log of an unnormalized alignment likelihood. The mapping quality
//! of the best alignment is the Phred-scaled posterior probability that one
//! of the others is the true placement.

/// Phred score for an error probability.
pub(crate) fn prob_to_phred(prob: f64) -> f64 {
    -10.0 * prob.log10()
}

/// Error probability for a Phred score.
pub(crate) fn phred_to_prob(phred: f64) -> f64 {
    10f64.powf(-phred / 10.0)
}

/// `log(exp(x) + exp(y))` without leaving log space.
fn add_log(log_x: f64, log_y: f64) -> f64 {
    if log_x > log_y {
        log_x + (1.0 + (log_y - log_x).exp()).ln()
    } else {
        log_y + (1.0 + (log_x - log_y).exp()).ln()
    }
}

/// Exact mapping quality of the best score: `-10 log10` of the posterior
/// mass on the non-best alignments. Falls back to log-sum-exp when direct
/// exponentiation could overflow. A lone score is compared against a null
/// alignment of 0.0, since local alignment scores are floored there.
///
/// Returns the quality and the index of the best score. When a lone input
/// is negative the appended null wins and the index names it; callers must
/// clamp back into their own range before annotating.
pub(crate) fn maximum_mapping_quality_exact(scaled_scores: &mut Vec<f64>) -> (f64, usize) {
    if scaled_scores.len() == 1 {
        scaled_scores.push(0.0);
    }
    let size = scaled_scores.len();

    let mut max_score = scaled_scores[0];
    let mut max_idx = 0;
    for (i, &score) in scaled_scores.iter().enumerate().skip(1) {
        if score > max_score {
            max_score = score;
            max_idx = i;
        }
    }

    let exp_overflow_limit = f64::MAX.ln();
    let quality = if max_score * (size as f64) < exp_overflow_limit {
        // no risk of overflow, sum exponentials directly (half as many
        // transcendental evaluations)
        let mut numer = 0.0;
        for (i, &score) in scaled_scores.iter().enumerate() {
            if i == max_idx {
                continue;
            }
            numer += score.exp();
        }
        -10.0 * (numer / (numer + scaled_scores[max_idx].exp())).log10()
    } else {
        let mut log_sum_exp = scaled_scores[0];
        for &score in scaled_scores.iter().skip(1) {
            log_sum_exp = add_log(log_sum_exp, score);
        }
        -10.0 * (1.0 - (scaled_scores[max_idx] - log_sum_exp).exp()).log10()
    };

    (quality, max_idx)
}

/// Fast approximation: `(10 / ln 10) * (best - runner_up - ln multiplicity)`,
/// clamped at zero. Tracks the runner-up score and its multiplicity in a
/// single pass. The returned index carries the same caveat as
/// [`maximum_mapping_quality_exact`]: a lone negative input loses to the
/// appended null.
pub(crate) fn maximum_mapping_quality_approx(scaled_scores: &mut Vec<f64>) -> (f64, usize) {
    if scaled_scores.len() == 1 {
        scaled_scores.push(0.0);
    }

    let mut max_score = scaled_scores[0];
    let mut max_idx = 0;
    let mut next_score = f64::MIN;
    let mut next_count = 0i32;

    for (i, &score) in scaled_scores.iter().enumerate().skip(1) {
        if score > max_score {
            if next_score == max_score {
                next_count += 1;
            } else {
                next_score = max_score;
                next_count = 1;
            }
            max_score = score;
            max_idx = i;
        } else if score > next_score {
            next_score = score;
            next_count = 1;
        } else if score == next_score {
            next_count += 1;
        }
    }

    let multiplicity_term = if next_count > 1 {
        (next_count as f64).ln()
    } else {
        0.0
    };
    let quality_scale_factor = 10.0 / std::f64::consts::LN_10;
    let quality = (quality_scale_factor * (max_score - next_score - multiplicity_term)).max(0.0);

    (quality, max_idx)
}

/// Fold a cluster-level mapping quality into a local one: the combined
/// error probability is the geometric mean of the two.
pub(crate) fn combine_with_cluster_mq(cluster_mq: f64, mapping_quality: f64) -> f64 {
    prob_to_phred(phred_to_prob(cluster_mq + mapping_quality).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_matches_hand_computation() {
        // lambda = 1 over raw scores {50, 48, 10}
        let mut scores = vec![50.0, 48.0, 10.0];
        let (quality, max_idx) = maximum_mapping_quality_approx(&mut scores);
        assert_eq!(max_idx, 0);
        assert_eq!(quality.round() as i32, 9);
    }

    #[test]
    fn exact_is_close_to_approx_when_gap_is_wide() {
        // the approximation drops the 1/(1 + e^-gap) correction, so at a
        // gap of 2 the methods agree to within about half a quality unit
        let mut approx_scores = vec![50.0, 48.0, 10.0];
        let mut exact_scores = approx_scores.clone();
        let (approx, _) = maximum_mapping_quality_approx(&mut approx_scores);
        let (exact, _) = maximum_mapping_quality_exact(&mut exact_scores);
        assert!((approx - exact).abs() < 1.0, "approx {approx} exact {exact}");
        assert!(exact >= approx, "the approximation underestimates");

        let mut wide_approx = vec![80.0, 40.0];
        let mut wide_exact = wide_approx.clone();
        let (approx, _) = maximum_mapping_quality_approx(&mut wide_approx);
        let (exact, _) = maximum_mapping_quality_exact(&mut wide_exact);
        assert!((approx - exact).abs() < 1e-6, "approx {approx} exact {exact}");
    }

    #[test]
    fn lone_score_compared_against_null() {
        let mut exact_scores = vec![12.0];
        let (exact, idx) = maximum_mapping_quality_exact(&mut exact_scores);
        assert_eq!(idx, 0);
        assert!(exact.is_finite() && exact > 0.0);

        let mut approx_scores = vec![12.0];
        let (approx, _) = maximum_mapping_quality_approx(&mut approx_scores);
        assert!((approx - 10.0 / std::f64::consts::LN_10 * 12.0).abs() < 1e-9);
    }

    #[test]
    fn lone_negative_score_loses_to_the_null() {
        // the index names the appended baseline; callers clamp before use
        let mut exact_scores = vec![-7.0];
        let (exact, idx) = maximum_mapping_quality_exact(&mut exact_scores);
        assert_eq!(idx, 1);
        assert!(exact.is_finite() && exact > 0.0);

        let mut approx_scores = vec![-7.0];
        let (approx, idx) = maximum_mapping_quality_approx(&mut approx_scores);
        assert_eq!(idx, 1);
        assert!((approx - 10.0 / std::f64::consts::LN_10 * 7.0).abs() < 1e-9);
    }

    #[test]
    fn tied_best_scores_give_zero_quality() {
        let mut scores = vec![30.0, 30.0];
        let (approx, _) = maximum_mapping_quality_approx(&mut scores);
        assert_eq!(approx, 0.0);

        let mut scores = vec![30.0, 30.0];
        let (exact, _) = maximum_mapping_quality_exact(&mut scores);
        assert!(exact < 3.02 + 1e-9, "ties leave ~half the mass elsewhere");
    }

    #[test]
    fn runner_up_multiplicity_lowers_quality() {
        let mut single = vec![20.0, 18.0];
        let mut multiple = vec![20.0, 18.0, 18.0, 18.0];
        let (q_single, _) = maximum_mapping_quality_approx(&mut single);
        let (q_multiple, _) = maximum_mapping_quality_approx(&mut multiple);
        assert!(q_multiple < q_single);
    }

    #[test]
    fn overflow_path_agrees_with_direct_path() {
        // same score gap; the second pair is large enough that max * n
        // exceeds the overflow limit and forces the log-sum-exp path
        let mut direct = vec![300.0, 298.0];
        let (q_direct, _) = maximum_mapping_quality_exact(&mut direct);
        let mut forced = vec![800.0, 798.0];
        let (q_log_space, _) = maximum_mapping_quality_exact(&mut forced);
        assert!((q_direct - q_log_space).abs() < 0.01);
    }

    #[test]
    fn phred_round_trip() {
        for q in [0.5f64, 10.0, 30.0, 60.0] {
            assert!((prob_to_phred(phred_to_prob(q)) - q).abs() < 1e-9);
        }
    }
}
