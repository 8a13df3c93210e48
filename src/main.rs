use std::path::PathBuf;

use tracing::{error, info};
use warehouse_fleet::{FleetConfig, logging, sim};

fn print_usage(program: &str) {
    println!("Warehouse fleet CLI");
    println!("Usage:");
    println!("  {program} [--config path] (run demo)");
    println!("  {program} [--config path] bench [robots] [tasks] [stations]");
    println!("  {program} --help");
    println!();
    println!("Omit trailing bench arguments to keep their defaults.");
    println!("Defaults:");
    println!("  bench  robots=<robot.count> tasks=100 stations=<layout.stations>");
    println!("Logging:");
    println!("  RUST_LOG overrides the default filter (warehouse_fleet=info).");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

fn parse_count(program: &str, name: &str, arg: Option<String>) -> Option<usize> {
    arg.map(|v| {
        v.parse::<usize>()
            .unwrap_or_else(|_| exit_with_usage(program, &format!("bench: invalid {name} value: {v}")))
    })
}

fn main() {
    logging::init();

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "warehouse_fleet".to_string());
    let mut args = std::env::args().skip(1).peekable();

    let mut config_path: Option<PathBuf> = None;
    if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        match args.next() {
            Some(path) => config_path = Some(PathBuf::from(path)),
            None => exit_with_usage(&program, "--config requires a path"),
        }
    }

    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            match FleetConfig::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    error!("{e}");
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        None => FleetConfig::default(),
    };

    let result = match args.next().as_deref() {
        Some("bench") => {
            let robots = parse_count(&program, "robots", args.next());
            let tasks = parse_count(&program, "tasks", args.next());
            let stations = parse_count(&program, "stations", args.next());
            if let Some(extra) = args.next() {
                exit_with_usage(&program, &format!("bench: unexpected argument: {extra}"));
            }
            if robots == Some(0) {
                exit_with_usage(&program, "bench: robots must be > 0");
            }
            sim::run_benchmark(config, robots, tasks, stations)
        }
        Some("demo") | None => sim::run_demo(config),
        Some("--help") | Some("-h") | Some("help") => {
            print_usage(&program);
            Ok(())
        }
        Some(other) => exit_with_usage(&program, &format!("unknown command: {other}")),
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
