//! Zim-Seq - multi-row step sequencer for text-based modular patches
//!
//! This is the main entry point for the zim-seq CLI application.

#![allow(clippy::multiple_crate_versions)] // Dependencies have conflicting sub-dependencies

use anyhow::{anyhow, Result};
use rustyline::error::ReadlineError;
use rustyline::{Config, EditMode, Editor};
use std::time::Duration;
use zim_seq::graph::ModuleInfo;
use zim_seq::graph_engine::GraphEngine;
use zim_seq::modules::ModuleType;
use zim_seq::observability::ConsoleObserver;

const DEFAULT_RENDER_SECONDS: f32 = 4.0;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("play") => {
            if let Some(patch_file) = args.get(2) {
                play_patch(patch_file)?;
            } else {
                eprintln!("Usage: zim-seq play <patch_file>");
            }
        }
        Some("render") => {
            let trace = args.iter().any(|a| a == "--trace");
            let mut rest = args.iter().skip(2).filter(|a| *a != "--trace");
            if let Some(patch_file) = rest.next() {
                let seconds = match rest.next() {
                    Some(s) => s.parse().map_err(|_| anyhow!("Invalid duration: {}", s))?,
                    None => DEFAULT_RENDER_SECONDS,
                };
                render_patch(patch_file, seconds, trace)?;
            } else {
                eprintln!("Usage: zim-seq render <patch_file> [seconds] [--trace]");
            }
        }
        Some("repl") => {
            run_repl()?;
        }
        Some("help" | "-h" | "--help") | None => {
            print_help();
        }
        Some(_) => {
            eprintln!("Unknown command. Use 'help' to see available commands.");
            print_help();
        }
    }

    Ok(())
}

fn play_patch(patch_file: &str) -> Result<()> {
    println!("Loading patch: {patch_file}");

    let mut engine = GraphEngine::new();
    engine.load_patch_file(patch_file)?;
    engine.start()?;

    println!("Playing... Press Enter to stop");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    engine.stop();
    Ok(())
}

fn render_patch(patch_file: &str, seconds: f32, trace: bool) -> Result<()> {
    if !(seconds.is_finite() && seconds >= 0.0) {
        return Err(anyhow!("Duration must be a non-negative number of seconds"));
    }

    let mut engine = GraphEngine::new();
    engine.load_patch_file(patch_file)?;
    if trace {
        let console = ConsoleObserver::new(false).with_sample_rate(engine.sample_rate());
        engine.add_observer(Box::new(console));
    }

    let report = engine.render(Duration::from_secs_f32(seconds));
    print!("{report}");

    for (name, grid) in engine.describe_all() {
        println!("\n{name}:");
        print!("{grid}");
    }
    Ok(())
}

/// Split `args` into exactly `N` words
fn words<const N: usize>(args: &str, usage: &str) -> Result<[String; N]> {
    let parts: Vec<String> = args.split_whitespace().map(str::to_string).collect();
    parts.try_into().map_err(|_| anyhow!("Usage: {}", usage))
}

fn parse_cell(row: &str, step: &str, lane: &str) -> Result<(usize, usize, usize)> {
    let parse = |s: &str| s.parse::<usize>().map_err(|_| anyhow!("Not a cell number: {}", s));
    Ok((parse(row)?, parse(step)?, parse(lane)?))
}

/// Sequencer-level REPL commands; `None` when the input is not one of them
fn run_module_command(engine: &GraphEngine, input: &str) -> Option<Result<String>> {
    let (command, args) = input.split_once(' ').unwrap_or((input, ""));
    let result = match command {
        "reset" => words::<1>(args, "reset <module>").and_then(|[module]| {
            engine.reset_module(&module)?;
            Ok(format!("Reset {module}"))
        }),
        "randomize" => words::<1>(args, "randomize <module>").and_then(|[module]| {
            engine.randomize_module(&module)?;
            Ok(format!("Randomized {module}"))
        }),
        "press" => words::<4>(args, "press <module> <row> <step> <lane>").and_then(
            |[module, row, step, lane]| {
                let (row, step, lane) = parse_cell(&row, &step, &lane)?;
                engine.press(&module, row, step, lane)?;
                Ok(format!("Pressed {module} row {row} step {step} lane {lane}"))
            },
        ),
        "show" => words::<1>(args, "show <module>")
            .and_then(|[module]| engine.describe_module(&module)),
        "save" => words::<2>(args, "save <module> <file>").and_then(|[module, file]| {
            engine.save_state_file(&module, &file)?;
            Ok(format!("Saved {module} to {file}"))
        }),
        "load" => words::<2>(args, "load <module> <file>").and_then(|[module, file]| {
            engine.load_state_file(&module, &file)?;
            Ok(format!("Loaded {module} from {file}"))
        }),
        _ => return None,
    };
    Some(result)
}

fn print_module_info(info: &ModuleInfo) {
    println!("Module: {}", info.name);
    println!("  Inputs:");
    for input in &info.inputs {
        println!("    - {} (default: {}): {}", input.name, input.default_value, input.description);
    }
    println!("  Outputs:");
    for output in &info.outputs {
        println!("    - {}: {}", output.name, output.description);
    }
}

fn run_repl() -> Result<()> {
    println!("Zim-Seq REPL - Type 'help' for commands, 'quit' to exit");
    println!("Vi mode enabled: ESC for normal mode, 'i' for insert mode");

    let config = Config::builder()
        .edit_mode(EditMode::Vi)
        .history_ignore_space(true)
        .max_history_size(1000)?
        .build();

    let mut rl = Editor::<(), _>::with_config(config)?;

    let history_path = dirs::home_dir().map(|mut path| {
        path.push(".zim_seq_history");
        path
    });

    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    let mut engine = GraphEngine::new();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();

                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(&line);

                match input {
                    "quit" | "exit" => break,
                    "help" => print_repl_help(),
                    "start" => match engine.start() {
                        Ok(()) => println!("Audio started"),
                        Err(e) => eprintln!("Error: {e}"),
                    },
                    "stop" => {
                        engine.stop();
                        println!("Audio stopped");
                    }
                    "clear" => {
                        engine.clear_patch();
                        println!("Patch cleared");
                    }
                    "list" => {
                        let modules = engine.list_modules();
                        if modules.is_empty() {
                            println!("No modules loaded");
                        } else {
                            println!("Modules:");
                            for module in modules {
                                println!("  - {module}");
                            }
                        }
                    }
                    "validate" => {
                        let errors = engine.validate_connections();
                        if errors.is_empty() {
                            println!("✓ All connections are valid");
                        } else {
                            println!("Connection errors:");
                            for error in errors {
                                println!("  - {error}");
                            }
                        }
                    }
                    _ => {
                        if let Some(name) = input.strip_prefix("inspect ") {
                            let name = name.trim();
                            match engine
                                .inspect_module(name)
                                .or_else(|| GraphEngine::inspect_module_type(name))
                            {
                                Some(info) => print_module_info(&info),
                                None => eprintln!("Module '{name}' not found"),
                            }
                        } else if let Some(result) = run_module_command(&engine, input) {
                            match result {
                                Ok(msg) => println!("{msg}"),
                                Err(e) => eprintln!("Error: {e}"),
                            }
                        } else {
                            match engine.process_line(input) {
                                Ok(msg) => println!("{msg}"),
                                Err(e) => eprintln!("Error: {e}"),
                            }
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }

    Ok(())
}

fn print_help() {
    println!(
        "Zim-Seq - multi-row CV/gate step sequencer

Usage:
    zim-seq play <patch_file>              Play a patch through the sound card
    zim-seq render <patch_file> [seconds] [--trace]
                                           Run a patch offline and print a summary
    zim-seq repl                           Start interactive REPL
    zim-seq help                           Show this help

Examples:
    zim-seq render patches/basic.zim 8
    zim-seq repl
"
    );
}

fn print_repl_help() {
    println!(
        "REPL Commands:
    help                          - Show this help
    start / stop                  - Start or stop audio processing
    clear                         - Clear current patch
    list                          - List all modules
    inspect <module|type>         - Show a module's ports
    validate                      - Validate all connections
    show <seq>                    - Print the sequencer grid
    press <seq> <row> <step> <lane> - Toggle a gate cell (1-based)
    reset <seq>                   - Arm every gate and rewind all rows
    randomize <seq>               - Coin-flip every gate
    save <seq> <file>             - Save the gate pattern as JSON
    load <seq> <file>             - Restore a saved gate pattern
    quit                          - Exit REPL

Module Types:"
    );
    for module_type in ModuleType::ALL {
        println!("    {}", module_type.usage());
    }
    println!(
        "
Patch Syntax:
    seq: seq 4 16 2               - 4 rows, 16 steps, 2 gate lanes
    clk: clock 4                  - 4 Hz clock
    seq.clock1 <- clk.gate        - Clock row 1 (rows 2-4 follow)
    seq.steps2 <- 5               - Row 2 loops over 5 steps
    seq.value1_3 <- 7.5           - Row 1 step 3 value
    out <- seq.gate1_1 * 0.1      - Listen to a gate lane
    out.left <- seq.cv1 * 0.05    - Left channel only"
    );
}
