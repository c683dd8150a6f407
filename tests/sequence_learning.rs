//! End-to-end sequence learning tests for the backtracking temporal memory.
//!
//! These run the full compute loop over multi-pattern sequences and check the
//! externally observable behavior: prediction quality after training, start
//! cell handling across resets, backtracking recovery semantics, and that a
//! finalized or round-tripped network keeps predicting.
//!
//! Run with: `cargo test --test sequence_learning`

use veles::prelude::*;

const NUM_COLUMNS: u32 = 500;
const PATTERN_WIDTH: u32 = 10;
const PATTERNS_PER_SEQUENCE: u32 = 10;

fn params() -> TemporalMemoryParams {
    TemporalMemoryParams {
        num_columns: NUM_COLUMNS,
        cells_per_column: 4,
        activation_threshold: 3,
        min_threshold: 2,
        new_synapse_count: 5,
        initial_perm: 0.6,
        connected_perm: 0.5,
        ..Default::default()
    }
}

fn pattern(base: u32) -> Sdr {
    let columns: Vec<u32> = (base..base + PATTERN_WIDTH).collect();
    let mut sdr = Sdr::new(&[NUM_COLUMNS]);
    sdr.set_sparse(&columns).unwrap();
    sdr
}

/// Builds sequences over disjoint column sets: sequence `s` steps through
/// patterns at bases `(s * 10 + p) * 10`.
fn build_sequences(num_sequences: u32) -> Vec<Vec<Sdr>> {
    (0..num_sequences)
        .map(|s| {
            (0..PATTERNS_PER_SEQUENCE)
                .map(|p| pattern((s * PATTERNS_PER_SEQUENCE + p) * PATTERN_WIDTH))
                .collect()
        })
        .collect()
}

fn train(tm: &mut BacktrackingTemporalMemory, sequences: &[Vec<Sdr>], repetitions: usize) {
    for _ in 0..repetitions {
        for sequence in sequences {
            tm.reset();
            for pattern in sequence {
                tm.compute(pattern, true, true);
            }
        }
    }
}

/// Runs one inference-only pass over the sequences and returns the stats.
fn evaluate(tm: &mut BacktrackingTemporalMemory, sequences: &[Vec<Sdr>]) -> PredictionStats {
    tm.reset_stats();
    for sequence in sequences {
        tm.reset();
        for pattern in sequence {
            tm.compute(pattern, false, true);
        }
    }
    tm.stats()
}

// =============================================================================
// PREDICTION QUALITY
// =============================================================================

#[test]
fn test_learns_disjoint_sequences() {
    let sequences = build_sequences(5);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();

    train(&mut tm, &sequences, 10);
    let stats = evaluate(&mut tm, &sequences);

    // 9 scored transitions per sequence (the step right after a reset is
    // not scored).
    assert_eq!(stats.n_predictions, 45);
    assert!(
        stats.prediction_score_avg2 > 0.8,
        "prediction score too low: {}",
        stats.prediction_score_avg2
    );
}

#[test]
fn test_prediction_works_right_after_reset() {
    let sequences = build_sequences(1);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 15);

    tm.reset();
    tm.compute(&sequences[0][0], false, true);

    // The second pattern of the sequence lives on columns 10..20; every
    // predicted cell should sit in one of those columns.
    let cpc = tm.cells_per_column() as usize;
    let predicted_columns: Vec<usize> = tm
        .inf_predicted_state()
        .iter()
        .enumerate()
        .filter(|&(_, &on)| on)
        .map(|(idx, _)| idx / cpc)
        .collect();

    assert!(!predicted_columns.is_empty());
    assert!(predicted_columns.iter().all(|&c| (10..20).contains(&c)));
}

#[test]
fn test_predict_looks_multiple_steps_ahead() {
    let sequences = build_sequences(1);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 15);

    tm.reset();
    tm.compute(&sequences[0][0], false, true);
    let predictions = tm.predict(2);
    assert_eq!(predictions.len(), 2);

    // Step 0 is the one-step prediction (columns 10..20), step 1 the
    // two-step prediction (columns 20..30). Confidence mass should land
    // on the right columns at each horizon.
    let mass = |confidence: &[Real], range: std::ops::Range<usize>| -> Real {
        range.map(|c| confidence[c]).sum()
    };
    assert!(mass(&predictions[0], 10..20) > 0.5);
    assert!(mass(&predictions[1], 20..30) > 0.5);
}

// =============================================================================
// BACKTRACKING SEMANTICS
// =============================================================================

#[test]
fn test_failed_inference_backtrack_matches_plain_burst() {
    // Two identical networks, one with inference backtracking disabled.
    // On input the network has never seen, backtracking cannot lock on
    // anywhere and must leave the inference state exactly as the plain
    // burst path would.
    let mut with_backtrack = BacktrackingTemporalMemory::new(params()).unwrap();
    let mut without_backtrack = BacktrackingTemporalMemory::new(TemporalMemoryParams {
        max_inf_backtrack: 0,
        ..params()
    })
    .unwrap();

    let a = pattern(0);
    let b = pattern(10);
    for tm in [&mut with_backtrack, &mut without_backtrack] {
        for _ in 0..5 {
            tm.reset();
            tm.compute(&a, true, false);
            tm.compute(&b, true, false);
        }
        tm.reset();
    }

    let novel = [pattern(200), pattern(400), pattern(300)];
    for input in &novel {
        let out_with = with_backtrack.compute(input, false, true);
        let out_without = without_backtrack.compute(input, false, true);

        assert_eq!(out_with, out_without);
        assert_eq!(
            with_backtrack.inf_active_state(),
            without_backtrack.inf_active_state()
        );
        assert_eq!(
            with_backtrack.inf_predicted_state(),
            without_backtrack.inf_predicted_state()
        );
        assert_eq!(
            with_backtrack.col_confidence(),
            without_backtrack.col_confidence()
        );
    }
}

#[test]
fn test_recovers_after_dropping_into_mid_sequence() {
    let sequences = build_sequences(1);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 15);

    // Drop into the middle of the learned sequence. The first steps burst,
    // which activates the learned cells along with everything else, so the
    // predictions sharpen back onto the sequence within a few steps.
    tm.reset();
    for pattern in &sequences[0][3..8] {
        tm.compute(pattern, false, true);
    }

    let cpc = tm.cells_per_column() as usize;
    let predicted_columns: Vec<usize> = tm
        .inf_predicted_state()
        .iter()
        .enumerate()
        .filter(|&(_, &on)| on)
        .map(|(idx, _)| idx / cpc)
        .collect();

    // Pattern 8 lives on columns 80..90.
    assert!(!predicted_columns.is_empty());
    assert!(predicted_columns.iter().all(|&c| (80..90).contains(&c)));
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[test]
fn test_start_cells_stay_clean_across_training() {
    let sequences = build_sequences(2);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 10);

    for c in 0..NUM_COLUMNS {
        assert_eq!(tm.num_segments_in_cell(c, 0), 0);
    }
    assert!(tm.num_segments() > 0);
}

#[test]
fn test_finish_learning_keeps_predictions() {
    let sequences = build_sequences(2);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 15);

    let before = tm.num_segments();
    tm.finish_learning();
    assert!(tm.num_segments() > 0);
    assert!(tm.num_segments() <= before);

    let stats = evaluate(&mut tm, &sequences);
    assert!(
        stats.prediction_score_avg2 > 0.8,
        "finalized network stopped predicting: {}",
        stats.prediction_score_avg2
    );
}

#[test]
fn test_avg_learned_seq_length_grows() {
    let sequences = build_sequences(1);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 15);

    // Ten-step sequences, learned; the average should clearly exceed the
    // single-step baseline of an untrained network.
    assert!(tm.avg_learned_seq_length() > 3.0);
}

// =============================================================================
// SERIALIZATION
// =============================================================================

#[cfg(feature = "serde")]
#[test]
fn test_round_trip_resumes_identically() {
    let sequences = build_sequences(2);
    let mut tm = BacktrackingTemporalMemory::new(params()).unwrap();
    train(&mut tm, &sequences, 5);

    let bytes = tm.to_bytes(SerializableFormat::Binary).unwrap();
    let mut restored =
        BacktrackingTemporalMemory::from_bytes(&bytes, SerializableFormat::Binary).unwrap();

    // Keep training both; every output must stay identical.
    for sequence in &sequences {
        tm.reset();
        restored.reset();
        for pattern in sequence {
            let expected = tm.compute(pattern, true, true);
            let actual = restored.compute(pattern, true, true);
            assert_eq!(expected, actual);
        }
    }
    assert_eq!(tm.num_segments(), restored.num_segments());
    assert_eq!(tm.num_synapses(), restored.num_synapses());
}
