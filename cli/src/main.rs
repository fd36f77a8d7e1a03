#[macro_use]
extern crate log;

use std::process;

use clap::{Arg, Command, crate_version};

mod params;
mod run;

use crate::params::Parameters;

/// Protocol version this harness speaks to the engine with.
const ENGINE_PROTOCOL: &str = "0.1";

fn command() -> Command<'static> {
    Command::new("graphbench")
        .version(crate_version!())
        .about("Measures steady-state latency of an image classifier and prints its top-k labels")
        .arg(
            Arg::new("model")
                .long("model")
                .takes_value(true)
                .required(true)
                .help("Model topology: ONNX file, NNEF directory or archive, frozen TF graph"),
        )
        .arg(
            Arg::new("weights")
                .long("weights")
                .takes_value(true)
                .help("Weights file, must sit next to the topology"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .takes_value(true)
                .default_value("onnx")
                .help("Model format (onnx, nnef, tf)"),
        )
        .arg(
            Arg::new("model_name")
                .long("model-name")
                .takes_value(true)
                .default_value("mobilenet")
                .help("Name the model is registered under"),
        )
        .arg(
            Arg::new("image")
                .long("image")
                .takes_value(true)
                .help("Test image (an all-zero input is used otherwise)"),
        )
        .arg(
            Arg::new("labels")
                .long("labels")
                .takes_value(true)
                .help("Newline-delimited class names (class indices are printed otherwise)"),
        )
        .arg(
            Arg::new("repeat")
                .short('r')
                .long("repeat")
                .takes_value(true)
                .default_value("1")
                .help("Timed executions"),
        )
        .arg(
            Arg::new("warmup")
                .long("warmup")
                .takes_value(true)
                .default_value("10")
                .help("Untimed executions before the timed loop"),
        )
        .arg(
            Arg::new("top_k")
                .long("top-k")
                .takes_value(true)
                .default_value("5")
                .help("Number of predictions to print"),
        )
        .arg(Arg::new("height").long("height").takes_value(true).default_value("224"))
        .arg(Arg::new("width").long("width").takes_value(true).default_value("224"))
        .arg(
            Arg::new("mean")
                .long("mean")
                .takes_value(true)
                .default_value("104.007,116.669,122.679")
                .help("Per-plane means, in output plane order"),
        )
        .arg(Arg::new("scale").long("scale").takes_value(true).default_value("0.017"))
        .arg(Arg::new("rgb").long("rgb").help("Lay planes out as RGB instead of BGR"))
        .arg(Arg::new("json").long("json").help("Print a single JSON report"))
        .arg(
            Arg::new("verbosity")
                .short('v')
                .multiple_occurrences(true)
                .help("Sets the level of verbosity."),
        )
}

fn main() {
    let matches = command().get_matches();

    let level = match matches.occurrences_of("verbosity") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).format_timestamp_nanos().init();

    let outcome = Parameters::from_clap(&matches).and_then(|params| run::handle(&params));
    if let Err(e) = outcome {
        error!("{e:?}");
        process::exit(1)
    }
}
