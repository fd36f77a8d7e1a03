use graphbench_engine::Engine;
use graphbench_libcli::{
    BenchReport, InputTensor, LabelTable, Prediction, bench, classify, preprocess,
};
use serde::Serialize;

use crate::params::Parameters;

const GRAPH_NAME: &str = "graph0";

#[derive(Serialize)]
struct Report<'a> {
    model: &'a str,
    graph: &'a str,
    output_shape: Vec<usize>,
    bench: BenchReport,
    predictions: Vec<Prediction>,
}

/// Runs the whole session: load, bind, prepare, bench, decode, tear down.
pub fn handle(params: &Parameters) -> anyhow::Result<()> {
    let say = |line: String| {
        if !params.json {
            println!("{line}");
        }
    };

    let input = match &params.image {
        Some(path) => preprocess(path, &params.preprocess)?,
        None => {
            info!("No image given, using an all-zero input");
            InputTensor::zeros(params.preprocess.height, params.preprocess.width)
        }
    };

    let engine = Engine::init()?;
    engine.request_version(crate::ENGINE_PROTOCOL)?;
    engine.load_model(
        &params.model_name,
        &params.format,
        &params.model,
        params.weights.as_deref(),
    )?;
    say("Load model successfully".to_string());

    let mut graph = engine.create_graph(GRAPH_NAME, &params.model_name)?;
    say(format!("Create graph {GRAPH_NAME} successfully"));

    let input_handle = graph.input_tensor(0, 0)?;
    graph.set_tensor_shape(&input_handle, &input.shape())?;
    graph.set_tensor_buffer(&input_handle, input.as_slice())?;
    graph.prepare()?;

    say(format!("REPEAT COUNT= {}", params.limits.repeat));
    let report = bench(&mut graph, &params.limits)?;
    say(format!(
        "Repeat [{}] time {:.2} us per RUN. used {} us",
        report.repeat,
        report.mean_micros(),
        report.total_micros()
    ));

    let output = graph.output_tensor(0, 0)?;
    let output_shape = graph.tensor_shape(&output)?;
    let scores = graph.tensor_buffer(&output)?.to_vec();
    let dims: Vec<String> = output_shape.iter().map(|d| d.to_string()).collect();
    say(format!("output tensor shape: [{}]", dims.join(" ")));

    let labels = match &params.labels {
        Some(path) => LabelTable::load(path)?,
        None => (0..scores.len()).map(|i| i.to_string()).collect(),
    };
    let predictions = classify(&scores, &labels, params.top_k)?;
    for prediction in &predictions {
        say(prediction.to_string());
    }

    graph.release_tensor(output)?;
    graph.release_tensor(input_handle)?;
    graph.postrun()?;
    graph.destroy();
    engine.remove_model(&params.model_name)?;
    engine.release();

    if params.json {
        let report = Report {
            model: &params.model_name,
            graph: GRAPH_NAME,
            output_shape,
            bench: report,
            predictions,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        say("ALL TEST DONE".to_string());
    }
    Ok(())
}
