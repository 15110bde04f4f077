//! Command-line driver for building and interpolating pooled tables.
//!
//! `forge run` builds a table from a deterministic workload, interpolates
//! one column, checks the interpolant against the column, and prints the
//! pool report.  `forge config` prints the default configuration as JSON.

use std::env;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use table_forge::{Engine, EngineConfig, GenerationOrder, StreamingRows, Table};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const CONFIG_ENV: &str = "TABLE_FORGE_CONFIG";

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("table_forge=info,forge=info,warn"));
    #[cfg(feature = "json-logs")]
    {
        let layer = fmt::layer().json().with_target(true).with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(layer).init();
    }
    #[cfg(not(feature = "json-logs"))]
    {
        let layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(layer).init();
    }
}

fn print_help() {
    println!("Usage: forge <run|config|help> ...");
    println!("  run [--height <N>] [--width <N>] [--column <N>] [--config <file>]");
    println!("      [--seed <u64>] [--parallel] [--json]");
    println!("  config   print the default engine configuration");
    println!();
    println!("{CONFIG_ENV}=<file> supplies a config when --config is absent.");
}

fn main() {
    init_logging();
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("run") => cmd_run(args.collect()),
        Some("config") => match EngineConfig::default().to_json_string() {
            Ok(json) => println!("{json}"),
            Err(err) => fatal(&format!("failed to render config: {err}")),
        },
        Some("help") | Some("-h") | Some("--help") | None => print_help(),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

struct RunOptions {
    height: usize,
    width: usize,
    column: usize,
    config: Option<String>,
    seed: Option<u64>,
    parallel: bool,
    json: bool,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    let value = value.unwrap_or_else(|| fatal(&format!("{flag} expects a value")));
    value
        .parse()
        .unwrap_or_else(|_| fatal(&format!("invalid {flag} value: {value}")))
}

fn parse_run(args: Vec<String>) -> RunOptions {
    let mut opts = RunOptions {
        height: 1 << 12,
        width: 8,
        column: 0,
        config: env::var(CONFIG_ENV).ok(),
        seed: None,
        parallel: false,
        json: false,
    };
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--height" => opts.height = parse_value("--height", iter.next()),
            "--width" => opts.width = parse_value("--width", iter.next()),
            "--column" => opts.column = parse_value("--column", iter.next()),
            "--config" => opts.config = Some(parse_value("--config", iter.next())),
            "--seed" => opts.seed = Some(parse_value("--seed", iter.next())),
            "--parallel" => opts.parallel = true,
            "--json" => opts.json = true,
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    opts
}

fn workload(width: usize, seed: Option<u64>) -> StreamingRows {
    match seed {
        // Each row reseeds from its index so rows stay reproducible in any order.
        Some(seed) => StreamingRows::new(width, move |idx| {
            let mut rng = StdRng::seed_from_u64(seed ^ (idx as u64).rotate_left(32));
            (0..width).map(|_| rng.gen::<u64>()).collect()
        }),
        None => StreamingRows::constant_index(width),
    }
}

fn cmd_run(args: Vec<String>) {
    let opts = parse_run(args);
    let config = match &opts.config {
        Some(path) => EngineConfig::from_path(path)
            .unwrap_or_else(|err| fatal(&format!("failed to load {path}: {err}"))),
        None => EngineConfig::default(),
    };
    let order = if opts.parallel {
        GenerationOrder::Parallel
    } else {
        GenerationOrder::Sequential
    };
    let engine = Engine::new(config)
        .unwrap_or_else(|err| fatal(&format!("engine init failed: {err}")))
        .with_generation_order(order);

    let rows = workload(opts.width, opts.seed);
    let started = Instant::now();
    let table = engine
        .builder()
        .build_from_rows(opts.height, &rows)
        .unwrap_or_else(|err| fatal(&format!("table build failed: {err}")));
    let build_ms = started.elapsed().as_secs_f64() * 1e3;
    let commitment = table.commitment();
    info!(
        height = table.height(),
        width = table.width(),
        chunks = table.chunk_count(),
        root = %commitment.root_hex(),
        "table committed"
    );

    let (interp_ms, verified) = if table.is_empty() {
        (0.0, true)
    } else {
        interpolate_and_verify(&engine, &table, opts.column)
    };
    drop(table);
    let snapshot = engine.report_memory_usage();

    if opts.json {
        let out = json!({
            "height": opts.height,
            "width": opts.width,
            "root": commitment.root_hex(),
            "build_ms": build_ms,
            "interpolate_ms": interp_ms,
            "verified": verified,
            "memory": snapshot,
        });
        println!("{out}");
    } else {
        println!("table      {} x {}", opts.height, opts.width);
        println!("root       {}", commitment.root_hex());
        println!("build      {build_ms:.3} ms");
        println!("interpolate {interp_ms:.3} ms");
        println!("verified   {verified}");
        println!("{snapshot}");
    }
    if !verified {
        std::process::exit(2);
    }
}

fn interpolate_and_verify(engine: &Engine, table: &Table, column: usize) -> (f64, bool) {
    let started = Instant::now();
    let poly = engine
        .interpolate_column(table, column)
        .unwrap_or_else(|err| fatal(&format!("interpolation failed: {err}")));
    let elapsed = started.elapsed().as_secs_f64() * 1e3;
    let evals = engine
        .evaluate_streaming(poly.coefficients(), table.height())
        .unwrap_or_else(|err| fatal(&format!("evaluation failed: {err}")));
    let expected = table
        .column(column)
        .unwrap_or_else(|| fatal(&format!("column {column} out of range")));
    (elapsed, evals == expected)
}
