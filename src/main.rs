use clap::Parser;
use nalgebra::{DMatrix, DVector};
use sparse_ekf::planar::{Outcome, PlanarSlam};
use sparse_ekf::simulation::Simulation;
use sparse_ekf::{plot, Config, Gaussian};
use statrs::statistics::Statistics;
use tracing::{info, warn};

/// Name of the plot
const NAME: &str = "Sparse EKF SLAM (planar, anchored landmarks)";

// Mounting offset of the sensor on the robot
const SENSOR_OFFSET: [f64; 2] = [0.2, 0.0];

// Prior uncertainty of the mounting offset
// Unfiltered: fixed, added to every observation
// Filtered: initial covariance, refined by the map
const MOUNT_COVARIANCE: f64 = 1e-4;

/// Runs the sparse EKF on a simulated planar SLAM problem
#[derive(Parser, Debug)]
#[command(name = "sparse-ekf")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of time steps (overrides the configuration)
    #[arg(short, long)]
    steps: Option<usize>,

    /// Number of landmarks (overrides the configuration)
    #[arg(short, long)]
    landmarks: Option<usize>,

    /// Estimate the sensor mounting offset with the map
    #[arg(long)]
    filtered_sensor: bool,

    /// Where to write the trajectory plot
    #[arg(short, long, default_value = "sparse_ekf.png")]
    output: String,

    /// Skip plotting
    #[arg(long)]
    no_plot: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sparse_ekf=info")),
        )
        .init();

    // Parse the arguments
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(steps) = args.steps {
        config.simulation.steps = steps;
    }
    if let Some(landmarks) = args.landmarks {
        config.simulation.landmarks = landmarks;
        config.filter.capacity = config.filter.capacity.max(4 * landmarks + 6);
    }
    config.simulation.filtered_sensor |= args.filtered_sensor;
    let dt = config.simulation.delta_time;

    // Ground truth
    let offset = DVector::from_column_slice(&SENSOR_OFFSET);
    let mut simulation = Simulation::new(
        config.simulation.clone(),
        nalgebra::Vector2::new(SENSOR_OFFSET[0], SENSOR_OFFSET[1]),
    )?;

    // The filtered sensor starts from a deliberately wrong offset guess
    let mount = if config.simulation.filtered_sensor {
        Gaussian::new(
            &offset * 0.5,
            DMatrix::identity(2, 2) * (MOUNT_COVARIANCE * 100.0),
        )?
    } else {
        Gaussian::new(offset, DMatrix::identity(2, 2) * MOUNT_COVARIANCE)?
    };
    let mut slam = PlanarSlam::new(&config, simulation.true_position(0.0), mount)?;

    // Initialize variables needed for plotting
    let mut true_history = Vec::new();
    let mut estimated_history = Vec::new();
    let mut errors: Vec<f64> = Vec::new();
    let mut largest_error = 0.0_f64;

    for k in 0..config.simulation.steps {
        let step = simulation.step(k);

        // 1. fuse every sighting of this step
        for sighting in &step.sightings {
            match slam.observe(sighting.landmark, sighting.measured) {
                Ok(Outcome::Gated { distance_squared }) => {
                    warn!(landmark = sighting.landmark, distance_squared, "sighting gated");
                }
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }

        // 2. find error between actual and estimated
        let estimate = slam.robot_position()?;
        let error = (estimate - step.true_position).norm();
        largest_error = largest_error.max(error);
        errors.push(error.powi(2));

        true_history.push((step.true_position.x, step.true_position.y));
        estimated_history.push((estimate.x, estimate.y));

        // 3. predict the next state from odometry
        slam.predict(step.odometry, dt)?;
    }

    let state = slam.ekf().state();
    let stats = slam.stats();
    info!(
        symmetry_error = state.symmetry_error(),
        free = state.free_coordinates(),
        "run finished"
    );

    // Print the results
    println!("------------------------- Input -------------------------");
    println!("Steps:                        {:?}", config.simulation.steps);
    println!("Time Delta:                   {:?}", dt);
    println!("Landmarks:                    {:?}", config.simulation.landmarks);
    println!("Filtered sensor:              {:?}", config.simulation.filtered_sensor);
    println!("Velocity sigma:               {:?}", config.simulation.velocity_sigma);
    println!("Observation sigma:            {:?}", config.simulation.observation_sigma);
    println!("\n------------------------- Map ---------------------------");
    println!("Initialized:                  {:?}", stats.initialized);
    println!("Corrected:                    {:?}", stats.corrected);
    println!("Reparametrized:               {:?}", stats.reparametrized);
    println!("Gated:                        {:?}", stats.gated);
    println!("Rejected:                     {:?}", stats.rejected);
    println!("Sensor offset estimate:       {:.4?}", slam.sensor_offset()?);
    println!("\n------------------------- Error -------------------------");
    let raw_mse = errors.iter().mean();
    println!("Largest:                      {:?}", largest_error);
    println!("MSE:                          {:?}", raw_mse);
    println!("RMSE:                         {:?}", raw_mse.sqrt());
    println!("Covariance asymmetry:         {:e}\n", state.symmetry_error());

    let true_landmarks: Vec<(f64, f64)> = simulation.landmarks().iter().map(|l| (l.x, l.y)).collect();
    let mut estimated_landmarks = Vec::new();
    for id in slam.landmark_ids() {
        if let Some(l) = slam.landmark_position(id)? {
            let truth = simulation.landmarks()[id];
            println!(
                "landmark {:>3}: estimate [{:.3}, {:.3}]  error {:.4}",
                id,
                l.x,
                l.y,
                (l - truth).norm()
            );
            estimated_landmarks.push((l.x, l.y));
        }
    }

    // Plot the results
    if !args.no_plot {
        plot(
            NAME,
            &args.output,
            &true_history,
            &estimated_history,
            &true_landmarks,
            &estimated_landmarks,
        )?;
        println!("\nPlot written to {}", args.output);
    }
    Ok(())
}
