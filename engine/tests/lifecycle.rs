use graphbench_engine::prelude::*;
use graphbench_engine::{element_count, f32_byte_len};
use prost::Message;
use tract_onnx::pb;

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("GRAPHBENCH_LOG").try_init();
}

/// An NNEF model summing each channel of a `[1, 3, h, w]` input into a
/// `[1, 3]` score vector.
fn channel_sum_model(h: usize, w: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let graph = format!(
        "version 1.0;

graph channel_sum( input ) -> ( output )
{{
    input = external<scalar>(shape = [1, 3, {h}, {w}]);
    pooled = sum_reduce(input, axes = [2, 3]);
    output = reshape(pooled, shape = [1, 3]);
}}
"
    );
    std::fs::write(dir.path().join("graph.nnef"), graph).unwrap();
    dir
}

/// Two `[1, 3]` inputs added together.
fn pair_model() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let graph = "version 1.0;

graph pair( left, right ) -> ( output )
{
    left = external<scalar>(shape = [1, 3]);
    right = external<scalar>(shape = [1, 3]);
    output = add(left, right);
}
";
    std::fs::write(dir.path().join("graph.nnef"), graph).unwrap();
    dir
}

fn float_value(name: &str, shape: &[i64]) -> pb::ValueInfoProto {
    let dim = shape
        .iter()
        .map(|&d| pb::tensor_shape_proto::Dimension {
            value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(d)),
            ..Default::default()
        })
        .collect();
    pb::ValueInfoProto {
        name: name.to_string(),
        r#type: Some(pb::TypeProto {
            value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                elem_type: pb::tensor_proto::DataType::Float as i32,
                shape: Some(pb::TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An ONNX model summing each channel of a `[1, 3, 2, 2]` input, then adding
/// a `[0, 10, 20]` bias. Written as `model.onnx` in the returned directory.
fn channel_sum_onnx() -> tempfile::TempDir {
    use pb::attribute_proto::AttributeType;
    let reduce = pb::NodeProto {
        name: "reduce".into(),
        op_type: "ReduceSum".into(),
        input: vec!["input".into()],
        output: vec!["pooled".into()],
        attribute: vec![
            pb::AttributeProto {
                name: "axes".into(),
                r#type: AttributeType::Ints as i32,
                ints: vec![2, 3],
                ..Default::default()
            },
            pb::AttributeProto {
                name: "keepdims".into(),
                r#type: AttributeType::Int as i32,
                i: 0,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    let add = pb::NodeProto {
        name: "add".into(),
        op_type: "Add".into(),
        input: vec!["pooled".into(), "bias".into()],
        output: vec!["output".into()],
        ..Default::default()
    };
    let bias = pb::TensorProto {
        name: "bias".into(),
        dims: vec![1, 3],
        data_type: pb::tensor_proto::DataType::Float as i32,
        float_data: vec![0.0, 10.0, 20.0],
        ..Default::default()
    };
    let model = pb::ModelProto {
        ir_version: 7,
        opset_import: vec![pb::OperatorSetIdProto { domain: String::new(), version: 11 }],
        graph: Some(pb::GraphProto {
            name: "channel_sum".into(),
            node: vec![reduce, add],
            initializer: vec![bias],
            input: vec![float_value("input", &[1, 3, 2, 2])],
            output: vec![float_value("output", &[1, 3])],
            ..Default::default()
        }),
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.onnx"), model.encode_to_vec()).unwrap();
    dir
}

fn engine_with_model(name: &str, h: usize, w: usize) -> EngineResult<(Engine, tempfile::TempDir)> {
    setup_test_logger();
    let engine = Engine::init()?;
    engine.request_version("0.1")?;
    let dir = channel_sum_model(h, w);
    engine.load_model(name, "nnef", dir.path(), None)?;
    Ok((engine, dir))
}

fn bound_graph<'a>(
    engine: &'a Engine,
    model: &str,
    shape: &[usize],
    buffer: &'a [f32],
) -> EngineResult<(Graph<'a>, TensorHandle)> {
    let mut graph = engine.create_graph("graph0", model)?;
    let input = graph.input_tensor(0, 0)?;
    graph.set_tensor_shape(&input, shape)?;
    graph.set_tensor_buffer(&input, buffer)?;
    Ok((graph, input))
}

#[test]
fn duplicate_name_is_rejected_and_registry_unchanged() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("mobilenet", 4, 4)?;
    let other = channel_sum_model(8, 8);
    let err = engine.load_model("mobilenet", "nnef", other.path(), None).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateName(ref name) if name == "mobilenet"));
    assert_eq!(engine.model_names(), vec!["mobilenet".to_string()]);

    // The first registration still answers with its own input shape.
    let input = vec![0f32; 48];
    let (mut graph, _) = bound_graph(&engine, "mobilenet", &[1, 3, 4, 4], &input)?;
    graph.prepare()?;
    graph.run()?;
    Ok(())
}

#[test]
fn missing_artifacts_fail_to_load() -> EngineResult<()> {
    setup_test_logger();
    let engine = Engine::init()?;
    let dir = tempfile::tempdir().unwrap();
    let err = engine.load_model("m", "nnef", dir.path().join("nowhere"), None).unwrap_err();
    assert!(matches!(err, EngineError::ModelLoad { .. }));

    let model = channel_sum_model(4, 4);
    let stray = dir.path().join("weights.dat");
    std::fs::write(&stray, b"").unwrap();
    let err = engine.load_model("m", "nnef", model.path(), Some(stray.as_path())).unwrap_err();
    assert!(matches!(err, EngineError::ModelLoad { .. }));

    let empty = tempfile::tempdir().unwrap();
    let err = engine.load_model("m", "nnef", empty.path(), None).unwrap_err();
    assert!(matches!(err, EngineError::ModelLoad { .. }));
    assert!(!engine.has_model("m"));
    Ok(())
}

#[test]
fn model_info_describes_registration() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let info = engine.model_info("sum")?;
    assert_eq!(info.format, ModelFormat::Nnef);
    assert_eq!(info.inputs.len(), 1);
    assert_eq!(info.output_count, 1);
    assert_eq!(info.graphs, 0);
    let graph = engine.create_graph("graph0", "sum")?;
    assert_eq!(engine.model_info("sum")?.graphs, 1);
    graph.destroy();
    assert_eq!(engine.model_info("sum")?.graphs, 0);
    Ok(())
}

#[test]
fn binding_requires_exact_byte_length() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let short = vec![0f32; 47];
    let long = vec![0f32; 49];
    let exact = vec![0f32; 48];
    let mut graph = engine.create_graph("graph0", "sum")?;
    let input = graph.input_tensor(0, 0)?;
    graph.set_tensor_shape(&input, &[1, 3, 4, 4])?;

    let err = graph.set_tensor_buffer(&input, &short).unwrap_err();
    assert!(matches!(
        err,
        EngineError::BufferSizeMismatch { expected: 192, actual: 188, .. }
    ));
    assert_eq!(graph.state(), GraphState::Created);
    assert!(matches!(graph.tensor_buffer_size(&input), Err(EngineError::ShapeQuery(_))));

    graph.set_tensor_buffer(&input, &exact)?;
    assert_eq!(graph.state(), GraphState::Bound);
    assert_eq!(graph.tensor_buffer_size(&input)?, f32_byte_len(&[1, 3, 4, 4]));

    // A failed rebind drops the previous binding.
    assert!(graph.set_tensor_buffer(&input, &long).is_err());
    assert_eq!(graph.state(), GraphState::Created);
    assert!(matches!(graph.prepare(), Err(EngineError::InvalidState { .. })));
    Ok(())
}

#[test]
fn binding_needs_a_declared_and_consistent_shape() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let buffer = vec![0f32; 3 * 8 * 8];
    let mut graph = engine.create_graph("graph0", "sum")?;
    let input = graph.input_tensor(0, 0)?;
    assert!(matches!(
        graph.set_tensor_buffer(&input, &buffer),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(graph.set_tensor_shape(&input, &[]), Err(EngineError::InvalidArgument(_))));
    assert!(matches!(
        graph.set_tensor_shape(&input, &[1, 0, 4, 4]),
        Err(EngineError::InvalidArgument(_))
    ));
    graph.set_tensor_shape(&input, &[1, 3, 8, 8])?;
    assert!(matches!(
        graph.set_tensor_buffer(&input, &buffer),
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(graph.state(), GraphState::Created);
    Ok(())
}

#[test]
fn unknown_tensor_slots_are_not_found() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let mut graph = engine.create_graph("graph0", "sum")?;
    assert!(matches!(
        graph.input_tensor(1, 0),
        Err(EngineError::TensorNotFound { kind: TensorKind::Input, node: 1, slot: 0 })
    ));
    assert!(matches!(
        graph.input_tensor(0, 1),
        Err(EngineError::TensorNotFound { kind: TensorKind::Input, .. })
    ));
    assert!(matches!(
        graph.output_tensor(3, 0),
        Err(EngineError::TensorNotFound { kind: TensorKind::Output, .. })
    ));
    Ok(())
}

#[test]
fn prepare_once_then_run_repeatedly() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    for n in [1, 5, 100] {
        let input = vec![0.5f32; 48];
        let (mut graph, _) = bound_graph(&engine, "sum", &[1, 3, 4, 4], &input)?;
        assert!(matches!(graph.run(), Err(EngineError::InvalidState { .. })));
        graph.prepare()?;
        for _ in 0..n {
            graph.run()?;
        }
        assert_eq!(graph.run_count(), n);
        assert!(matches!(graph.prepare(), Err(EngineError::InvalidState { .. })));
        graph.postrun()?;
        assert!(matches!(graph.prepare(), Err(EngineError::InvalidState { .. })));
        assert!(matches!(graph.run(), Err(EngineError::InvalidState { .. })));
        graph.destroy();
    }
    Ok(())
}

#[test]
fn zero_image_output_size_agrees_with_shape() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 224, 224)?;
    let input = vec![0f32; 3 * 224 * 224];
    let (mut graph, input_handle) = bound_graph(&engine, "sum", &[1, 3, 224, 224], &input)?;
    graph.prepare()?;
    graph.run()?;

    let output = graph.output_tensor(0, 0)?;
    let mut dims = [0usize; 4];
    let rank = graph.get_tensor_shape(&output, &mut dims)?;
    assert_eq!(&dims[..rank], &[1, 3]);
    assert_eq!(element_count(&dims[..rank]), graph.tensor_buffer_size(&output)? / 4);
    assert_eq!(graph.tensor_buffer(&output)?, &[0.0, 0.0, 0.0]);

    graph.release_tensor(input_handle)?;
    graph.release_tensor(output)?;
    graph.postrun()?;
    graph.destroy();
    engine.remove_model("sum")?;
    engine.release();
    Ok(())
}

#[test]
fn runs_read_the_bound_buffer() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let mut first = vec![0f32; 48];
    first[0..16].fill(1.0);
    first[16..32].fill(3.0);
    first[32..48].fill(2.0);
    let second = vec![1f32; 48];

    let (mut graph, input) = bound_graph(&engine, "sum", &[1, 3, 4, 4], &first)?;
    graph.prepare()?;
    let output = graph.output_tensor(0, 0)?;
    assert!(matches!(graph.tensor_shape(&output), Err(EngineError::ShapeQuery(_))));

    graph.run()?;
    let scores = graph.tensor_buffer(&output)?.to_vec();
    assert_eq!(scores, vec![16.0, 48.0, 32.0]);

    graph.set_tensor_buffer(&input, &second)?;
    graph.run()?;
    assert_eq!(graph.tensor_buffer(&output)?, &[16.0, 16.0, 16.0]);

    graph.destroy();
    // The copied scores survive the graph.
    assert_eq!(scores[1], 48.0);
    Ok(())
}

#[test]
fn shape_queries_reject_undersized_buffers() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let buffer = vec![0f32; 48];
    let (mut graph, input) = bound_graph(&engine, "sum", &[1, 3, 4, 4], &buffer)?;
    let mut small = [0usize; 3];
    assert!(matches!(graph.get_tensor_shape(&input, &mut small), Err(EngineError::ShapeQuery(_))));
    assert_eq!(small, [0, 0, 0]);
    let mut dims = [0usize; 6];
    assert_eq!(graph.get_tensor_shape(&input, &mut dims)?, 4);
    assert_eq!(&dims[..4], &[1, 3, 4, 4]);
    graph.prepare()?;
    Ok(())
}

#[test]
fn released_and_foreign_handles_are_invalid() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let buffer = vec![0f32; 48];
    let mut first = engine.create_graph("graph0", "sum")?;
    let mut second = engine.create_graph("graph1", "sum")?;
    assert_ne!(first.id(), second.id());

    let handle = first.input_tensor(0, 0)?;
    assert!(matches!(
        second.set_tensor_shape(&handle, &[1, 3, 4, 4]),
        Err(EngineError::InvalidHandle(_))
    ));

    first.release_tensor(handle)?;
    assert!(matches!(
        first.set_tensor_shape(&handle, &[1, 3, 4, 4]),
        Err(EngineError::InvalidHandle(_))
    ));
    assert!(matches!(
        first.set_tensor_buffer(&handle, &buffer),
        Err(EngineError::InvalidHandle(_))
    ));
    assert!(matches!(first.release_tensor(handle), Err(EngineError::InvalidHandle(_))));

    let output = second.output_tensor(0, 0)?;
    assert!(matches!(
        second.set_tensor_buffer(&output, &buffer),
        Err(EngineError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn model_outlives_its_graphs() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let graph = engine.create_graph("graph0", "sum")?;
    let err = engine.remove_model("sum").unwrap_err();
    assert!(matches!(err, EngineError::ModelInUse { graphs: 1, .. }));
    assert!(engine.has_model("sum"));

    graph.destroy();
    engine.remove_model("sum")?;
    assert!(!engine.has_model("sum"));
    assert!(matches!(engine.remove_model("sum"), Err(EngineError::ModelNotFound(_))));
    engine.release();
    Ok(())
}

#[test]
fn dropped_graph_releases_its_model() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    {
        let buffer = vec![0f32; 48];
        let (mut graph, _input) = bound_graph(&engine, "sum", &[1, 3, 4, 4], &buffer)?;
        graph.prepare()?;
        graph.run()?;
    }
    engine.remove_model("sum")?;
    Ok(())
}

#[test]
fn failed_rebind_after_prepare_unbinds_the_input() -> EngineResult<()> {
    let (engine, _dir) = engine_with_model("sum", 4, 4)?;
    let ones = vec![1f32; 48];
    let short = vec![1f32; 47];
    let (mut graph, input) = bound_graph(&engine, "sum", &[1, 3, 4, 4], &ones)?;
    graph.prepare()?;
    graph.run()?;
    let output = graph.output_tensor(0, 0)?;

    assert!(matches!(
        graph.set_tensor_buffer(&input, &short),
        Err(EngineError::BufferSizeMismatch { .. })
    ));
    assert!(matches!(graph.tensor_buffer_size(&input), Err(EngineError::ShapeQuery(_))));
    assert!(matches!(graph.run(), Err(EngineError::Execution { .. })));
    assert_eq!(graph.state(), GraphState::Prepared);
    assert!(matches!(graph.tensor_buffer(&output), Err(EngineError::ShapeQuery(_))));
    assert!(matches!(graph.prepare(), Err(EngineError::InvalidState { .. })));

    // The plan survives: a valid rebind is enough to run again.
    graph.set_tensor_buffer(&input, &ones)?;
    graph.run()?;
    assert_eq!(graph.tensor_buffer(&output)?, &[16.0, 16.0, 16.0]);
    assert_eq!(graph.run_count(), 2);
    Ok(())
}

#[test]
fn handles_do_not_cross_engines() -> EngineResult<()> {
    let (first, _first_dir) = engine_with_model("sum", 4, 4)?;
    let second = Engine::init()?;
    let pair = pair_model();
    second.load_model("pair", "nnef", pair.path(), None)?;

    let mut single = first.create_graph("graph0", "sum")?;
    let mut double = second.create_graph("graph0", "pair")?;
    assert_ne!(single.id(), double.id());

    // Both handles are the first of their graph; only the second one
    // addresses a slot past the single-input graph.
    let left = single.input_tensor(0, 0)?;
    let right = double.input_tensor(1, 0)?;
    assert!(matches!(
        single.set_tensor_shape(&right, &[1, 3]),
        Err(EngineError::InvalidHandle(_))
    ));
    assert!(matches!(single.tensor_shape(&right), Err(EngineError::InvalidHandle(_))));
    assert!(matches!(single.tensor_buffer(&right), Err(EngineError::InvalidHandle(_))));
    assert!(matches!(
        double.set_tensor_shape(&left, &[1, 3, 4, 4]),
        Err(EngineError::InvalidHandle(_))
    ));

    single.set_tensor_shape(&left, &[1, 3, 4, 4])?;
    double.set_tensor_shape(&right, &[1, 3])?;
    Ok(())
}

#[test]
fn onnx_input_shapes_are_checked_at_prepare() -> EngineResult<()> {
    setup_test_logger();
    let dir = channel_sum_onnx();
    let engine = Engine::init()?;
    engine.load_model("sum", "onnx", dir.path().join("model.onnx"), None)?;
    let info = engine.model_info("sum")?;
    assert_eq!(info.format, ModelFormat::Onnx);
    assert_eq!(info.inputs, vec!["input".to_string()]);

    let input: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let (mut graph, _) = bound_graph(&engine, "sum", &[1, 3, 2, 2], &input)?;
    graph.prepare()?;
    graph.run()?;
    let output = graph.output_tensor(0, 0)?;
    assert_eq!(graph.tensor_shape(&output)?, vec![1, 3]);
    assert_eq!(graph.tensor_buffer(&output)?, &[6.0, 32.0, 58.0]);
    graph.postrun()?;
    graph.destroy();

    // Inference models accept any declared shape at bind time.
    let wide = vec![1f32; 16];
    let (mut graph, _) = bound_graph(&engine, "sum", &[1, 4, 2, 2], &wide)?;
    assert_eq!(graph.state(), GraphState::Bound);
    assert!(matches!(graph.prepare(), Err(EngineError::Prepare { .. })));
    Ok(())
}
