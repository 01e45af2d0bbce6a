use plotters::prelude::*;

/// Plots true and estimated robot trajectories together with the true and
/// estimated landmark positions, as a PNG at `path`.
pub fn plot(
    name: &str,
    path: &str,
    true_trajectory: &[(f64, f64)],
    estimated_trajectory: &[(f64, f64)],
    true_landmarks: &[(f64, f64)],
    estimated_landmarks: &[(f64, f64)],
) -> Result<(), Box<dyn std::error::Error>> {
    let all = true_trajectory
        .iter()
        .chain(estimated_trajectory)
        .chain(true_landmarks)
        .chain(estimated_landmarks);
    let extent = all
        .map(|(x, y)| x.abs().max(y.abs()))
        .fold(1.0_f64, f64::max)
        * 1.1;

    let root = BitMapBackend::new(path, (900, 900)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(name, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-extent..extent, -extent..extent)?;

    chart.configure_mesh().x_desc("x [m]").y_desc("y [m]").draw()?;

    chart
        .draw_series(LineSeries::new(true_trajectory.iter().copied(), &BLACK))?
        .label("true trajectory")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .draw_series(LineSeries::new(estimated_trajectory.iter().copied(), &RED))?
        .label("estimated trajectory")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .draw_series(
            true_landmarks
                .iter()
                .map(|p| Cross::new(*p, 6, BLACK.stroke_width(2))),
        )?
        .label("true landmarks")
        .legend(|(x, y)| Cross::new((x + 10, y), 6, BLACK.stroke_width(2)));

    chart
        .draw_series(
            estimated_landmarks
                .iter()
                .map(|p| Circle::new(*p, 4, BLUE.filled())),
        )?
        .label("estimated landmarks")
        .legend(|(x, y)| Circle::new((x + 10, y), 4, BLUE.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
