//! Properties every sparse filter operation must keep: symmetry, scope
//! invariance, cost independent of map size, information gain, rollback.

mod common;

use approx::assert_relative_eq;
use nalgebra::{dvector, DMatrix, DVector};
use sparse_ekf::{EkfError, IndexSet, Innovation, SparseEkf};

use common::{assert_untouched_away_from, assert_untouched_outside, correlated_filter, spd};

#[test]
fn test_five_state_predict_scenario() {
    // robot {0, 1}, landmark {2, 3, 4}
    let mut ekf = correlated_filter(5, 1);
    let before = ekf.state().covariance().clone();
    let q = DMatrix::from_diagonal(&dvector![0.01, 0.01]);

    ekf.predict(
        &IndexSet::range(0, 5),
        &DMatrix::identity(2, 2),
        &IndexSet::range(0, 2),
        &q,
    )
    .unwrap();

    let p = ekf.state().covariance();
    let landmark = p.view((2, 2), (3, 3));
    assert_relative_eq!(landmark.into_owned(), before.view((2, 2), (3, 3)).into_owned());
    let cross = p.view((0, 2), (2, 3));
    assert_relative_eq!(cross.into_owned(), before.view((0, 2), (2, 3)).into_owned());
    let robot = p.view((0, 0), (2, 2)).into_owned();
    assert_relative_eq!(robot, before.view((0, 0), (2, 2)) + q, epsilon = 1e-15);
}

#[test]
fn test_predict_leaves_outside_scope_untouched() {
    let mut ekf = correlated_filter(12, 2);
    let before = ekf.state().covariance().clone();
    let mean_before = ekf.state().mean().clone();
    let ia_x = IndexSet::new(vec![0, 1, 2, 5, 6, 7]).unwrap();
    let ia_v = IndexSet::new(vec![1, 2]).unwrap();
    let f = DMatrix::from_row_slice(2, 2, &[1.0, 0.2, -0.1, 0.9]);

    ekf.predict(&ia_x, &f, &ia_v, &DMatrix::identity(2, 2)).unwrap();

    assert_untouched_outside(&before, ekf.state().covariance(), &ia_x);
    assert_untouched_away_from(&before, ekf.state().covariance(), &ia_v);
    assert_eq!(ekf.state().mean(), &mean_before);
}

#[test]
fn test_correct_leaves_outside_scope_untouched() {
    let mut ekf = correlated_filter(10, 3);
    let p_before = ekf.state().covariance().clone();
    let x_before = ekf.state().mean().clone();
    let ia_x = IndexSet::new(vec![2, 3, 4, 8]).unwrap();
    let ia_rsl = IndexSet::new(vec![3, 8]).unwrap();
    let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 1.0]);
    let s = ekf.expectation_covariance(&ia_rsl, &h).unwrap() + DMatrix::identity(2, 2) * 0.1;
    let mut inn = Innovation::new(dvector![0.3, -0.2], s).unwrap();

    ekf.correct(&ia_x, &mut inn, &h, &ia_rsl).unwrap();

    assert_untouched_outside(&p_before, ekf.state().covariance(), &ia_x);
    for i in 0..10 {
        if !ia_x.contains(i) {
            assert_eq!(ekf.state().mean()[i].to_bits(), x_before[i].to_bits());
        }
    }
    assert!(ekf.state().symmetry_error() < 1e-12);
}

#[test]
fn test_reparametrize_leaves_everything_else_untouched() {
    let mut ekf = correlated_filter(9, 4);
    let before = ekf.state().covariance().clone();
    let ia_old = IndexSet::new(vec![3, 4, 5]).unwrap();
    let ia_new = IndexSet::new(vec![7, 8]).unwrap();
    let j = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 2.0, 0.5]);

    ekf.reparametrize(&IndexSet::range(0, 9), &j, &ia_old, &ia_new)
        .unwrap();

    let touched = IndexSet::union(&ia_old, &ia_new);
    assert_untouched_away_from(&before, ekf.state().covariance(), &touched);
    assert!(ekf.state().symmetry_error() < 1e-12);
}

#[test]
fn test_identity_reparametrization_is_noop() {
    let mut ekf = correlated_filter(8, 5);
    let before = ekf.state().covariance().clone();
    let block = IndexSet::new(vec![6, 2, 4]).unwrap();
    ekf.reparametrize(&IndexSet::range(0, 8), &DMatrix::identity(3, 3), &block, &block)
        .unwrap();
    assert_relative_eq!(ekf.state().covariance(), &before, epsilon = 1e-14);
}

#[test]
fn test_cost_is_independent_of_unrelated_blocks() {
    let mut flops = Vec::new();
    for extra in [0, 10, 100] {
        let mut ekf = SparseEkf::with_capacity(5 + 2 * extra);
        let robot = ekf
            .state_mut()
            .insert_independent_block("robot", &dvector![0.0, 0.0], &spd(2, 1))
            .unwrap();
        let landmark = ekf
            .state_mut()
            .insert_independent_block("landmark", &dvector![1.0, 1.0, 1.0], &spd(3, 2))
            .unwrap();
        for i in 0..extra {
            ekf.state_mut()
                .insert_independent_block(format!("unrelated {i}"), &dvector![0.0, 0.0], &spd(2, i))
                .unwrap();
        }
        let ia_r = ekf.state().indices(robot).unwrap().clone();
        let ia_l = ekf.state().indices(landmark).unwrap().clone();
        let ia_x = IndexSet::union(&ia_r, &ia_l);

        ekf.predict(&ia_x, &DMatrix::identity(2, 2), &ia_r, &DMatrix::identity(2, 2))
            .unwrap();
        let predict_flops = ekf.last_stats().flops;

        let h = DMatrix::identity(3, 3);
        let s = ekf.expectation_covariance(&ia_l, &h).unwrap() + DMatrix::identity(3, 3);
        let mut inn = Innovation::new(dvector![0.1, 0.1, 0.1], s).unwrap();
        ekf.correct(&ia_x, &mut inn, &h, &ia_l).unwrap();
        let correct_flops = ekf.last_stats().flops;

        flops.push((predict_flops, correct_flops));
    }
    assert!(flops.windows(2).all(|w| w[0] == w[1]), "{flops:?}");
}

#[test]
fn test_initialize_then_correct_reduces_new_block_uncertainty() {
    let mut ekf = SparseEkf::with_capacity(6);
    let robot = ekf
        .state_mut()
        .insert_independent_block("robot", &dvector![0.0, 0.0], &DMatrix::identity(2, 2))
        .unwrap();
    let landmark = ekf.state_mut().allocate_block("landmark", 2).unwrap();
    ekf.state_mut()
        .set_block_mean(landmark, &dvector![2.0, 1.0])
        .unwrap();
    let ia_r = ekf.state().indices(robot).unwrap().clone();
    let ia_l = ekf.state().indices(landmark).unwrap().clone();
    let ia_x = IndexSet::union(&ia_r, &ia_l);

    ekf.initialize(
        &ia_x,
        &DMatrix::identity(2, 2),
        &ia_r,
        &ia_l,
        &DMatrix::identity(2, 2),
        &(DMatrix::identity(2, 2) * 0.5),
    )
    .unwrap();
    let trace_before = ekf.state().trace_of(&ia_l);

    // zero-noise, identity-Jacobian observation of the new block
    let h = DMatrix::identity(2, 2);
    let s = ekf.expectation_covariance(&ia_l, &h).unwrap();
    let expected = ia_l.gather(ekf.state().mean());
    let mut inn =
        Innovation::from_expectation(&expected, &s, &dvector![2.1, 0.9], &DMatrix::zeros(2, 2))
            .unwrap();
    ekf.correct(&ia_x, &mut inn, &h, &ia_l).unwrap();

    let trace_after = ekf.state().trace_of(&ia_l);
    assert!(trace_after < trace_before, "{trace_after} >= {trace_before}");
    assert_relative_eq!(ekf.state().mean()[ia_l.as_slice()[0]], 2.1, epsilon = 1e-12);
    assert!(ekf.state().symmetry_error() < 1e-12);
}

#[test]
fn test_singular_innovation_rolls_back() {
    let mut ekf = correlated_filter(6, 6);
    let x_before = ekf.state().mean().clone();
    let p_before = ekf.state().covariance().clone();
    let mut inn = Innovation::new(dvector![1.0, -1.0], DMatrix::from_element(2, 2, 1.0)).unwrap();

    let err = ekf
        .correct(
            &IndexSet::range(0, 6),
            &mut inn,
            &DMatrix::identity(2, 2),
            &IndexSet::range(1, 2),
        )
        .unwrap_err();

    assert!(matches!(err, EkfError::SingularInnovationCovariance));
    assert_eq!(ekf.state().mean(), &x_before);
    assert_eq!(ekf.state().covariance(), &p_before);

    // the filter keeps working afterwards
    let h = DMatrix::identity(2, 2);
    let ia = IndexSet::range(1, 2);
    let s = ekf.expectation_covariance(&ia, &h).unwrap() + DMatrix::identity(2, 2);
    let mut good = Innovation::new(dvector![1.0, -1.0], s).unwrap();
    ekf.correct(&IndexSet::range(0, 6), &mut good, &h, &ia).unwrap();
}

#[test]
fn test_contract_errors_do_not_mutate() {
    let mut ekf = correlated_filter(6, 7);
    let x_before = ekf.state().mean().clone();
    let p_before = ekf.state().covariance().clone();
    let all = IndexSet::range(0, 6);

    let errors = [
        ekf.predict(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 3),
            &DMatrix::zeros(3, 3),
        ),
        ekf.predict(
            &IndexSet::range(0, 7),
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &DMatrix::zeros(2, 2),
        ),
        ekf.initialize(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &IndexSet::range(4, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
        ),
        ekf.reparametrize(
            &IndexSet::range(0, 4),
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &IndexSet::range(4, 2),
        ),
        ekf.correct(
            &IndexSet::range(0, 2),
            &mut Innovation::new(dvector![0.0, 0.0], DMatrix::identity(2, 2)).unwrap(),
            &DMatrix::identity(2, 2),
            &IndexSet::range(3, 2),
        ),
        // control Jacobian with the wrong row count
        ekf.predict_with_control(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &DMatrix::identity(3, 1),
            &DMatrix::identity(1, 1),
        ),
        // control covariance not matching F_u's columns
        ekf.predict_with_control(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &DMatrix::identity(2, 1),
            &DMatrix::identity(2, 2),
        ),
        // perturbation Jacobian with the wrong row count
        ekf.initialize_with_perturbation(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &IndexSet::range(4, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(3, 2),
            &DMatrix::identity(2, 2),
        ),
        // perturbation covariance not matching G_n's columns
        ekf.initialize_with_perturbation(
            &all,
            &DMatrix::identity(2, 2),
            &IndexSet::range(0, 2),
            &IndexSet::range(4, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(3, 3),
        ),
    ];

    assert!(matches!(errors[0], Err(EkfError::DimensionMismatch { .. })));
    assert!(matches!(errors[1], Err(EkfError::InvalidIndexSet(_))));
    assert!(matches!(errors[2], Err(EkfError::AliasingViolation(_))));
    assert!(matches!(errors[3], Err(EkfError::InvalidIndexSet(_))));
    assert!(matches!(errors[4], Err(EkfError::InvalidIndexSet(_))));
    assert!(matches!(errors[5], Err(EkfError::DimensionMismatch { what: "F_u", .. })));
    assert!(matches!(errors[6], Err(EkfError::DimensionMismatch { what: "U", .. })));
    assert!(matches!(errors[7], Err(EkfError::DimensionMismatch { what: "G_n", .. })));
    assert!(matches!(errors[8], Err(EkfError::DimensionMismatch { what: "N", .. })));
    assert_eq!(ekf.state().mean(), &x_before);
    assert_eq!(ekf.state().covariance(), &p_before);
}

#[test]
fn test_matches_dense_ekf() {
    // sparse operations on sub-blocks equal the dense textbook EKF with embedded Jacobians
    let n = 7;
    let mut ekf = correlated_filter(n, 8);
    let mut x = ekf.state().mean().clone();
    let mut p = ekf.state().covariance().clone();

    let ia_v = IndexSet::new(vec![4, 1]).unwrap();
    let f_v = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.0, 1.1]);
    let q = DMatrix::from_row_slice(2, 2, &[0.05, 0.01, 0.01, 0.02]);
    ekf.predict(&IndexSet::range(0, n), &f_v, &ia_v, &q).unwrap();

    let mut big_f = DMatrix::identity(n, n);
    let mut big_q = DMatrix::zeros(n, n);
    for (r, gr) in ia_v.iter().enumerate() {
        for (c, gc) in ia_v.iter().enumerate() {
            big_f[(gr, gc)] = f_v[(r, c)];
            big_q[(gr, gc)] = q[(r, c)];
        }
    }
    p = &big_f * &p * big_f.transpose() + big_q;
    assert_relative_eq!(ekf.state().covariance(), &p, epsilon = 1e-12);

    let ia_rsl = IndexSet::new(vec![0, 5]).unwrap();
    let h = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, 0.5, 2.0]);
    let r = DMatrix::identity(2, 2) * 0.2;
    let residual: DVector<f64> = dvector![0.4, -0.3];
    let s = ekf.expectation_covariance(&ia_rsl, &h).unwrap() + &r;
    let mut inn = Innovation::new(residual.clone(), s.clone()).unwrap();
    ekf.correct(&IndexSet::range(0, n), &mut inn, &h, &ia_rsl)
        .unwrap();

    let mut big_h = DMatrix::zeros(2, n);
    for (c, gc) in ia_rsl.iter().enumerate() {
        big_h.set_column(gc, &h.column(c));
    }
    let big_s = &big_h * &p * big_h.transpose() + r;
    let k = &p * big_h.transpose() * big_s.try_inverse().unwrap();
    x -= &k * residual;
    p = &p - &k * &big_h * &p;
    assert_relative_eq!(ekf.state().mean(), &x, epsilon = 1e-12);
    assert_relative_eq!(ekf.state().covariance(), &p, epsilon = 1e-10);
}

#[test]
fn test_symmetry_over_operation_sequence() {
    let mut ekf = SparseEkf::with_capacity(20);
    let robot = ekf
        .state_mut()
        .insert_independent_block("robot", &dvector![0.0, 0.0, 0.0], &spd(3, 9))
        .unwrap();
    let ia_r = ekf.state().indices(robot).unwrap().clone();

    let mut landmarks = Vec::new();
    for k in 0..4 {
        let f = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, -0.1, 0.0, 1.0, 0.2, 0.0, 0.0, 1.0]);
        let ia_x = ekf.state().filtered_indices();
        ekf.predict(&ia_x, &f, &ia_r, &(DMatrix::identity(3, 3) * 0.01))
            .unwrap();

        let id = ekf.state_mut().allocate_block(format!("landmark {k}"), 3).unwrap();
        let ia_l = ekf.state().indices(id).unwrap().clone();
        let ia_x = IndexSet::union(&ekf.state().filtered_indices(), &ia_l);
        let g_v = DMatrix::from_fn(3, 3, |r, c| if r == c { 1.0 } else { 0.3 });
        ekf.initialize(&ia_x, &g_v, &ia_r, &ia_l, &DMatrix::identity(3, 3), &spd(3, k))
            .unwrap();
        assert!(ekf.state().symmetry_error() < 1e-12);
        landmarks.push(ia_l);

        for ia_l in &landmarks {
            let ia_rsl = IndexSet::union(&ia_r, ia_l);
            let h = DMatrix::from_fn(2, 6, |r, c| ((r + 2 * c) % 3) as f64 - 1.0);
            let s = ekf.expectation_covariance(&ia_rsl, &h).unwrap() + DMatrix::identity(2, 2) * 0.05;
            let mut inn = Innovation::new(dvector![0.05, -0.02], s).unwrap();
            let ia_x = ekf.state().filtered_indices();
            ekf.correct(&ia_x, &mut inn, &h, &ia_rsl).unwrap();
            assert!(ekf.state().symmetry_error() < 1e-12);
        }
    }

    let ia_x = ekf.state().filtered_indices();
    let j = DMatrix::from_fn(3, 3, |r, c| if r >= c { 1.0 } else { 0.0 });
    ekf.reparametrize(&ia_x, &j, &landmarks[0], &landmarks[0])
        .unwrap();
    assert!(ekf.state().symmetry_error() < 1e-12);
}
