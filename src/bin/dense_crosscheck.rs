use clap::Parser;
use kfilter::system::StepReturn;
use nalgebra::{DMatrix, DVector, Matrix2x4, SMatrix, SVector, Vector1, Vector2, Vector4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;
use sparse_ekf::simulation::{add_noise, circular_motion, circular_motion_vel};
use sparse_ekf::{reference::DenseReference, IndexSet, Innovation, SparseEkf};
use statrs::statistics::Statistics;

// R matrix (Measurement covariance)
const OBSERVATION_COVARIANCE: f64 = 0.03;

// P matrix (Initial state covariance)
const STATE_COVARIANCE: f64 = 0.01;

// Q matrix
const PROCESS_COVARIANCE: f64 = 0.04;

/// type alias for state vector
type StateVector = SVector<f64, 4>;
type Covariance = SMatrix<f64, 4, 4>;

/// Compares the sparse filter with a dense EKF on a constant-velocity target,
/// while the sparse state also carries unrelated blocks
#[derive(Parser, Debug)]
#[command(name = "dense_crosscheck")]
struct Args {
    #[arg(short, long, default_value_t = 0.1)]
    noise_sigma: f64,

    #[arg(short, long, default_value_t = 0.1)]
    delta_time: f64,

    /// Unrelated 2-D blocks stored next to the target
    #[arg(short, long, default_value_t = 50)]
    extra_blocks: usize,

    #[arg(long, default_value_t = 100)]
    steps: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let dt = args.delta_time;
    let noise = Normal::new(0.0, args.noise_sigma)?;
    let mut rng = StdRng::seed_from_u64(11);

    let position = circular_motion(0.0, 1.0, 1.0);
    let velocity = circular_motion_vel(0.0, 1.0, 1.0);
    let x_initial = Vector4::new(position.x, position.y, velocity.x, velocity.y);
    let p_initial = Covariance::identity() * STATE_COVARIANCE;

    // Observation matrix
    // | 1 0 0 0 |
    // | 0 1 0 0 |
    let h = Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0);
    let r = SMatrix::<f64, 2, 2>::identity() * OBSERVATION_COVARIANCE;

    let mut dense = DenseReference::<4, 2, 1>::new(x_initial, p_initial, h, r, step_fn);

    // Sparse filter: target first, then the unrelated blocks
    let mut sparse = SparseEkf::with_capacity(4 + 2 * args.extra_blocks);
    let target = sparse.state_mut().insert_independent_block(
        "target",
        &DVector::from_column_slice(x_initial.as_slice()),
        &DMatrix::from_column_slice(4, 4, p_initial.as_slice()),
    )?;
    for i in 0..args.extra_blocks {
        sparse.state_mut().insert_independent_block(
            format!("extra {i}"),
            &DVector::from_element(2, i as f64),
            &DMatrix::identity(2, 2),
        )?;
    }
    let ia_target = sparse.state().indices(target)?.clone();
    let ia_observed = IndexSet::range(ia_target.as_slice()[0], 2);
    let h_sparse = DMatrix::from_column_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
    let r_sparse = DMatrix::identity(2, 2) * OBSERVATION_COVARIANCE;

    let mut deviations = Vec::new();
    let mut flops = Vec::new();
    for i in 0..args.steps {
        let time = i as f64 * dt;
        let measured: Vector2<f64> = add_noise(circular_motion(time, 1.0, 1.0), &noise, &mut rng);

        // 1. correction
        dense.update(measured);

        let ia_x = sparse.state().filtered_indices();
        let expected = ia_observed.gather(sparse.state().mean());
        let expectation_cov = sparse.expectation_covariance(&ia_observed, &h_sparse)?;
        let mut inn = Innovation::from_expectation(
            &expected,
            &expectation_cov,
            &DVector::from_column_slice(measured.as_slice()),
            &r_sparse,
        )?;
        sparse.correct(&ia_x, &mut inn, &h_sparse, &ia_observed)?;

        // 2. prediction
        dense.predict(Vector1::new(dt));

        let f = transition(dt);
        let f_sparse = DMatrix::from_column_slice(4, 4, f.as_slice());
        let q_sparse = DMatrix::identity(4, 4) * PROCESS_COVARIANCE;
        sparse.predict(&ia_x, &f_sparse, &ia_target, &q_sparse)?;
        flops.push(sparse.last_stats().flops as f64);
        let propagated = &f_sparse * ia_target.gather(sparse.state().mean());
        for (k, g) in ia_target.iter().enumerate() {
            sparse.state_mut().mean_mut()[g] = propagated[k];
        }

        // 3. compare
        let sparse_x = ia_target.gather(sparse.state().mean());
        let sparse_p = IndexSet::gather_matrix(&ia_target, &ia_target, sparse.state().covariance());
        let deviation = (sparse_x - dense.state()).amax().max((sparse_p - dense.covariance()).amax());
        deviations.push(deviation);
    }

    println!("Extra blocks:                 {:?}", args.extra_blocks);
    println!("State size:                   {:?}", sparse.state().capacity());
    println!("Largest deviation:            {:e}", deviations.iter().copied().fold(0.0, f64::max));
    println!("Mean predict flops:           {:?}", flops.iter().mean());
    println!("Covariance asymmetry:         {:e}", sparse.state().symmetry_error());
    Ok(())
}

fn transition(dt: f64) -> Covariance {
    // | 1 0 dt 0  |
    // | 0 1 0  dt |
    // | 0 0 1  0  |
    // | 0 0 0  1  |
    let mut jacobian = Covariance::identity();
    jacobian[(0, 2)] = dt;
    jacobian[(1, 3)] = dt;
    jacobian
}

// Step function for the constant-velocity target
fn step_fn(state: StateVector, input: Vector1<f64>) -> StepReturn<f64, 4> {
    let jacobian = transition(input.x);
    StepReturn {
        state: jacobian * state,
        jacobian,
        covariance: Covariance::identity() * PROCESS_COVARIANCE,
    }
}
