//! Property-based and invariant tests for the spatial pooler.
//!
//! The load-bearing invariant is connected-consistency: the connected flags
//! and connected counts a column reports must always agree with its
//! permanence values, no matter what mix of learning steps got it there.
//!
//! Run with: `cargo test --test sp_properties`

use proptest::prelude::*;
use veles::prelude::*;

const NUM_INPUTS: u32 = 64;
const NUM_COLUMNS: u32 = 32;
const NUM_ACTIVE: u32 = 5;

fn build_sp(seed: i64) -> SpatialPooler {
    SpatialPooler::new(SpatialPoolerParams {
        input_dimensions: vec![NUM_INPUTS],
        column_dimensions: vec![NUM_COLUMNS],
        potential_radius: NUM_INPUTS,
        potential_pct: 0.8,
        global_inhibition: true,
        local_area_density: 0.0,
        num_active_columns_per_inh_area: NUM_ACTIVE,
        stimulus_threshold: 0,
        seed,
        ..Default::default()
    })
    .unwrap()
}

fn assert_connected_consistency(sp: &SpatialPooler) {
    for column in 0..sp.num_columns() {
        let permanences = sp.get_permanences(column);
        let connected = permanences
            .iter()
            .filter(|&&(_, p)| p >= sp.syn_perm_connected())
            .count();
        assert_eq!(
            connected as u32,
            sp.connected_counts()[column],
            "connected count out of sync for column {}",
            column
        );
        for &(_, p) in &permanences {
            assert!((0.0..=1.0).contains(&p), "permanence out of range: {}", p);
        }
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Connected flags, counts and permanence bounds stay consistent under
    /// arbitrary learning runs.
    #[test]
    fn prop_connected_consistency_under_learning(
        seed in 0i64..500,
        steps in 1usize..30,
        sparsity in 0.05f32..0.4,
    ) {
        let mut sp = build_sp(seed);
        let mut rng = Random::new(seed + 1);
        let mut input = Sdr::new(&[NUM_INPUTS]);
        let mut output = Sdr::new(&[NUM_COLUMNS]);

        for _ in 0..steps {
            input.randomize(sparsity, &mut rng);
            sp.compute(&input, true, &mut output);
        }

        assert_connected_consistency(&sp);
    }

    /// Global inhibition never activates more than the configured number of
    /// columns, and the output indices are valid.
    #[test]
    fn prop_global_inhibition_bounds_activity(
        seed in 0i64..500,
        sparsity in 0.05f32..0.5,
    ) {
        let mut sp = build_sp(seed);
        let mut rng = Random::new(seed);
        let mut input = Sdr::new(&[NUM_INPUTS]);
        let mut output = Sdr::new(&[NUM_COLUMNS]);

        for _ in 0..5 {
            input.randomize(sparsity, &mut rng);
            sp.compute(&input, true, &mut output);
            prop_assert!(output.get_sum() <= NUM_ACTIVE as usize);
            prop_assert!(output.get_sparse().iter().all(|&c| c < NUM_COLUMNS));
        }
    }
}

// =============================================================================
// DUTY CYCLES AND DETERMINISM
// =============================================================================

#[test]
fn test_active_duty_cycles_account_for_every_win() {
    let mut sp = build_sp(42);
    let mut rng = Random::new(7);
    let mut input = Sdr::new(&[NUM_INPUTS]);
    let mut output = Sdr::new(&[NUM_COLUMNS]);

    for _ in 0..20 {
        input.randomize(0.2, &mut rng);
        sp.compute(&input, true, &mut output);
    }

    // Exactly NUM_ACTIVE columns win each round, so over the exact early
    // window the duty cycles must sum to the number of winners per round.
    let total: Real = sp.active_duty_cycles().iter().sum();
    assert!(
        (total - NUM_ACTIVE as Real).abs() < 1e-3,
        "duty cycle mass drifted: {}",
        total
    );
    for &dc in sp.active_duty_cycles() {
        assert!((0.0..=1.0).contains(&dc));
    }
}

#[test]
fn test_constant_winner_converges_to_full_duty_cycle() {
    let mut sp = build_sp(42);
    let mut input = Sdr::new(&[NUM_INPUTS]);
    input.set_sparse(&(0..16).collect::<Vec<u32>>()).unwrap();
    let mut output = Sdr::new(&[NUM_COLUMNS]);

    sp.compute(&input, true, &mut output);
    let first_winners: Vec<u32> = output.get_sparse().to_vec();
    for _ in 0..9 {
        sp.compute(&input, true, &mut output);
    }

    // The first round's winners have strengthened toward this exact input
    // since, so they keep winning and carry a duty cycle of 1.
    for &c in &first_winners {
        assert!(
            (sp.active_duty_cycles()[c as usize] - 1.0).abs() < 1e-6,
            "column {} lost the competition it should dominate",
            c
        );
    }
}

#[test]
fn test_same_seed_stays_identical_across_learning() {
    let mut a = build_sp(99);
    let mut b = build_sp(99);
    let mut rng = Random::new(3);
    let mut input = Sdr::new(&[NUM_INPUTS]);
    let mut out_a = Sdr::new(&[NUM_COLUMNS]);
    let mut out_b = Sdr::new(&[NUM_COLUMNS]);

    for _ in 0..30 {
        input.randomize(0.2, &mut rng);
        a.compute(&input, true, &mut out_a);
        b.compute(&input, true, &mut out_b);
        assert_eq!(out_a, out_b);
    }
    assert_eq!(a, b);
    assert_eq!(a.boost_factors(), b.boost_factors());
}

// =============================================================================
// SERIALIZATION
// =============================================================================

#[cfg(feature = "serde")]
#[test]
fn test_round_trip_resumes_identically() {
    let mut sp = build_sp(11);
    let mut rng = Random::new(5);
    let mut input = Sdr::new(&[NUM_INPUTS]);
    let mut output = Sdr::new(&[NUM_COLUMNS]);

    for _ in 0..10 {
        input.randomize(0.2, &mut rng);
        sp.compute(&input, true, &mut output);
    }

    let bytes = sp.to_bytes(SerializableFormat::Binary).unwrap();
    let mut restored = SpatialPooler::from_bytes(&bytes, SerializableFormat::Binary).unwrap();
    assert_eq!(sp, restored);

    let mut restored_output = Sdr::new(&[NUM_COLUMNS]);
    for _ in 0..10 {
        input.randomize(0.2, &mut rng);
        sp.compute(&input, true, &mut output);
        restored.compute(&input, true, &mut restored_output);
        assert_eq!(output, restored_output);
    }
    assert_connected_consistency(&restored);
}

#[cfg(feature = "serde")]
#[test]
fn test_json_round_trip() {
    let sp = build_sp(11);
    let json = sp.to_json().unwrap();
    let restored = SpatialPooler::from_json(&json).unwrap();
    assert_eq!(sp, restored);
}
