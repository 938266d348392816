use coherence_lib::config::{ProtocolKind, SimulationConfig};
use coherence_lib::engine::SimulationState;
use coherence_lib::events::EventKind;
use coherence_lib::run_wrapper::{run_to_completion, RunStats};
use coherence_lib::workload::Workload;
use env_logger::Env;

/// Cumulative message count after each completed operation
fn message_curve(state: &SimulationState) -> Vec<(usize, usize)> {
    let mut sent = 0;
    let mut curve = vec![(0, 0)];
    for event in state.event_log.iter() {
        match event.kind {
            EventKind::MessageSend(_) => sent += 1,
            EventKind::OperationComplete { operation_index } => {
                curve.push((operation_index + 1, sent))
            }
            _ => {}
        }
    }
    curve
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(
        Env::default().filter_or("COHERENCE_LOG", "warn"),
    );

    let param_tokens: Vec<String> = std::env::args().collect();
    let trace_path = param_tokens
        .get(1)
        .ok_or("You should specify exactly one trace file")?;
    let workload = Workload::from_file(trace_path)?;

    std::fs::create_dir_all("eval")?;
    let output_path = format!("eval/protocol_eval_{}.csv", workload.name);
    let mut writer = csv::Writer::from_path(&output_path)?;
    writer.write_record([
        "Protocol",
        "Steps",
        "Operations",
        "Messages",
        "Inter-chip messages",
        "Memory writes",
        "Directory updates",
        "Messages/op",
    ])?;

    // Same core count for every protocol
    let configs = ProtocolKind::ALL.map(|protocol| match protocol {
        ProtocolKind::Piranha => SimulationConfig::piranha(2, 2),
        bus => SimulationConfig::bus(bus, 4),
    });

    let mut curves: Vec<(ProtocolKind, Vec<(usize, usize)>)> = vec![];
    for config in configs {
        let state = run_to_completion(&workload, config)?;
        let stats = RunStats::from_state(&state);
        writer.write_record(&[
            config.protocol.to_string(),
            stats.steps.to_string(),
            stats.operations.to_string(),
            stats.messages.to_string(),
            stats.inter_chip_messages.to_string(),
            stats.memory_writes.to_string(),
            stats.directory_updates.to_string(),
            format!("{:.3}", stats.messages_per_operation),
        ])?;
        curves.push((config.protocol, message_curve(&state)));
    }
    writer.flush()?;

    // Plot the data
    use plotters::prelude::*;

    let x_max = workload.operations.len().max(1);
    let y_max = curves
        .iter()
        .flat_map(|(_, curve)| curve.iter().map(|(_, y)| *y))
        .max()
        .unwrap_or(0)
        .max(1);
    let plot_title = format!("Cumulative messages: {}", workload.name);
    let svg_path = format!("eval/protocol_eval_{}.svg", workload.name);

    let root =
        SVGBackend::new(svg_path.as_str(), (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut ctx = ChartBuilder::on(&root)
        .caption(plot_title.as_str(), ("sans-serif", 40).into_font())
        .margin(5)
        .x_label_area_size(40)
        .y_label_area_size(40)
        .build_cartesian_2d(0..x_max, 0..y_max + y_max / 10 + 1)?;
    ctx.configure_mesh()
        .x_desc("Operations completed")
        .y_desc("Messages")
        .draw()?;

    for (i, (protocol, curve)) in curves.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        ctx.draw_series(LineSeries::new(curve.iter().copied(), color))?
            .label(protocol.name())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color)
            });
    }

    ctx.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;

    println!("Wrote {} and {}", output_path, svg_path);
    Ok(())
}
