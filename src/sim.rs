use coherence_lib::config::{ProtocolKind, SimulationConfig};
use coherence_lib::run_wrapper::{self, RunStats};
use coherence_lib::workload::Workload;
use env_logger::Env;
use std::env;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let trace_file = args
        .next()
        .ok_or("You should specify exactly one trace file")?;

    let mut config = SimulationConfig::default();
    let mut verbose = false;
    let mut history = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => verbose = true,
            "-h" => history = true,
            "-p" => {
                let protocol_arg = args.next().ok_or(
                    "You should specify a protocol (MSI, MESI, PIRANHA) \
                     after -p",
                )?;
                config.protocol = protocol_arg.parse::<ProtocolKind>()?;
            }
            "-n" => config.node_count = parse_count(args.next(), "-n")?,
            "-c" => {
                config.chip_count = Some(parse_count(args.next(), "-c")?)
            }
            "-k" => {
                config.cores_per_chip = Some(parse_count(args.next(), "-k")?)
            }
            "-m" => config.memory_size = parse_count(args.next(), "-m")?,
            _ => {
                return Err(format!("Unknown parameter: {}", arg).into());
            }
        }
    }

    // logging
    let env = Env::default()
        .filter_or("COHERENCE_LOG", if verbose { "debug" } else { "info" })
        .write_style_or("COHERENCE_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let workload = Workload::from_file(&trace_file)?;
    let state = run_wrapper::run_to_completion(&workload, config)?;

    if history {
        for event in state.event_log.iter() {
            eprintln!("[HISTORY] {}", event);
        }
    }

    println!(
        "{} on '{}' ({} nodes)",
        state.config.protocol, workload.name, state.config.node_count
    );
    println!("Caches:");
    for node in &state.nodes {
        let lines: Vec<String> = node
            .cache
            .iter()
            .map(|(address, line)| format!("@{:#x}={}", address, line))
            .collect();
        println!("  P{:<2} {}", node.id, lines.join(" "));
    }

    let words: Vec<String> = state
        .memory
        .iter()
        .map(|(address, word)| format!("{:#x}:{}", address, word))
        .collect();
    println!("Memory: {}", words.join(" "));

    if !state.directory.is_empty() {
        println!("Directory:");
        for (address, entry) in state.directory.iter() {
            let sharers: Vec<String> =
                entry.sharers.iter().map(|s| format!("P{}", s)).collect();
            let owner = entry
                .owner
                .map(|o| format!("P{}", o))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  @{:#x} {} owner={} sharers=[{}] data={}",
                address,
                entry.state,
                owner,
                sharers.join(","),
                entry.data
            );
        }
    }

    let stats = RunStats::from_state(&state);
    println!(
        "Steps: {}, operations: {}, messages: {} ({} inter-chip), \
         memory writes: {}, messages/op: {:.2}",
        stats.steps,
        stats.operations,
        stats.messages,
        stats.inter_chip_messages,
        stats.memory_writes,
        stats.messages_per_operation
    );

    Ok(())
}

fn parse_count(
    arg: Option<String>,
    flag: &str,
) -> Result<usize, Box<dyn Error>> {
    let value = arg.ok_or_else(|| {
        format!("You should specify a number after {}", flag)
    })?;
    let count = value
        .parse::<usize>()
        .map_err(|_| format!("Invalid number '{}' after {}", value, flag))?;
    Ok(count)
}
