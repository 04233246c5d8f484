use anyhow::{Context, Result};
use approx::assert_abs_diff_eq;
use ndarray::{arr2, Array2};
use std::sync::Arc;
use tflite_bridge::engine::{Kernel, ModelSpec, ReferenceEngine, TensorSpec};
use tflite_bridge::{
    Config, ErrorKind, Interpreter, InterpreterOptions, InterpreterState, TensorType,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn build(
    engine: &Arc<ReferenceEngine>,
    spec: &ModelSpec,
    options: &InterpreterOptions,
) -> Result<Interpreter> {
    init_tracing();
    let bytes = spec.to_bytes()?;
    let interpreter = Interpreter::with_engine(engine.clone(), &bytes, options)
        .context("failed to build reference interpreter")?;
    Ok(interpreter)
}

#[test]
fn identity_model_end_to_end() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::UInt8, &[1, 4]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    assert_eq!(engine.last_num_threads(), -1);
    assert_eq!(interpreter.input_tensor_count(), 1);
    assert_eq!(interpreter.output_tensor_count(), 1);

    interpreter.allocate_tensors()?;
    let input = interpreter.input_tensor(0)?;
    input.copy_from_buffer(&vec![0u8; input.byte_size()])?;

    interpreter.invoke()?;

    let output = interpreter.output_tensor(0)?;
    assert_eq!(output.byte_size(), 4);
    assert_eq!(output.tensor_type(), TensorType::UInt8);
    assert_eq!(output.name(), "output");
    assert_eq!(interpreter.state(), InterpreterState::Invoked);
    Ok(())
}

#[test]
fn positive_thread_count_reaches_engine() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[2]);
    let options = InterpreterOptions::default().with_num_threads(4);
    let interpreter = build(&engine, &spec, &options)?;
    assert_eq!(engine.last_num_threads(), 4);
    assert_eq!(interpreter.engine_name(), "reference");
    Ok(())
}

#[test]
fn input_views_report_declared_rank() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec {
        inputs: vec![
            TensorSpec::new("image", TensorType::UInt8, &[1, 224, 224, 3]),
            TensorSpec::new("mask", TensorType::Float32, &[1, 7]),
        ],
        outputs: vec![TensorSpec::new("scores", TensorType::UInt8, &[1, 1001])],
        kernel: Kernel::Fail,
        arena_limit: None,
        max_threads: None,
    };
    let interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    assert_eq!(interpreter.input_tensor_count(), 2);
    for (i, declared) in spec.inputs.iter().enumerate() {
        let view = interpreter.input_tensor(i)?;
        assert_eq!(view.num_dims(), declared.shape.len());
        assert_eq!(view.dims(), declared.shape);
        assert_eq!(view.name(), declared.name.as_str());
    }
    let inputs = interpreter.inputs()?;
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].byte_size(), 224 * 224 * 3);

    let outputs = interpreter.outputs()?;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].dims(), vec![1, 1001]);
    Ok(())
}

#[test]
fn copy_round_trip_returns_same_bytes() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[2, 3]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    let input = interpreter.input_tensor(0)?;
    let written: Vec<u8> = (0..input.byte_size() as u8).collect();
    input.copy_from_buffer(&written)?;

    let mut read = vec![0u8; input.byte_size()];
    input.copy_to_buffer(&mut read)?;
    assert_eq!(read, written);
    Ok(())
}

#[test]
fn size_mismatch_fails_without_writing() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::UInt8, &[4]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    let input = interpreter.input_tensor(0)?;
    input.copy_from_buffer(&[1, 2, 3, 4])?;

    let err = input.copy_from_buffer(&[9, 9, 9]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    assert!(err.to_string().contains("size mismatch"));

    let mut short = [7u8; 2];
    let err = input.copy_to_buffer(&mut short).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    assert_eq!(short, [7, 7]);

    let mut read = [0u8; 4];
    input.copy_to_buffer(&mut read)?;
    assert_eq!(read, [1, 2, 3, 4]);
    Ok(())
}

#[test]
fn copy_before_allocation_fails() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::UInt8, &[3]);
    let interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    let err = interpreter.input_tensor(0)?.copy_from_buffer(&[1, 2, 3]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    assert!(err.to_string().contains("not allocated"));

    let mut out = [0u8; 3];
    let err = interpreter.output_tensor(0)?.copy_to_buffer(&mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    Ok(())
}

#[test]
fn invoke_before_allocation_is_engine_error() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::UInt8, &[3]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    let err = interpreter.invoke().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);
    let msg = err.to_string();
    assert!(msg.contains("Invoke failed (kTfLiteError)"), "{}", msg);
    assert!(msg.contains("not ready"), "{}", msg);
    assert_eq!(interpreter.state(), InterpreterState::Constructed);
    Ok(())
}

#[test]
fn resize_then_allocate_reflects_new_dims() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[1, 4]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    interpreter.resize_input_tensor(0, &[3, 4])?;
    assert!(!interpreter.is_allocated());
    interpreter.allocate_tensors()?;

    let input = interpreter.input_tensor(0)?;
    assert_eq!(input.dims(), vec![3, 4]);
    assert_eq!(input.byte_size(), 3 * 4 * 4);
    assert_eq!(interpreter.output_tensor(0)?.dims(), vec![3, 4]);
    Ok(())
}

#[test]
fn rejected_shapes_and_indices() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[1, 4]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    let err = interpreter.resize_input_tensor(0, &[1, -1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resize);
    assert!(err.to_string().contains("ResizeInputTensor failed"));

    let err = interpreter.resize_input_tensor(5, &[1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);

    assert_eq!(interpreter.input_tensor(1).unwrap_err().kind(), ErrorKind::Argument);
    assert_eq!(interpreter.output_tensor(9).unwrap_err().kind(), ErrorKind::Argument);
    Ok(())
}

#[test]
fn allocation_failure_is_reported() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[1, 4]).with_arena_limit(32);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    interpreter.resize_input_tensor(0, &[8, 4])?;
    let err = interpreter.allocate_tensors().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert!(err.to_string().contains("AllocateTensors failed"));
    assert!(err.to_string().contains("exceeds limit"));
    assert!(!interpreter.is_allocated());

    interpreter.resize_input_tensor(0, &[1, 4])?;
    interpreter.allocate_tensors()?;
    assert!(interpreter.is_allocated());
    Ok(())
}

#[test]
fn unreservable_arena_is_allocation_error() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[1, 4]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;

    interpreter.resize_input_tensor(0, &[i32::MAX, i32::MAX])?;
    let err = interpreter.allocate_tensors().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert!(err.to_string().contains("AllocateTensors failed"));
    assert!(!interpreter.is_allocated());

    interpreter.resize_input_tensor(0, &[i32::MAX, i32::MAX, i32::MAX])?;
    let err = interpreter.allocate_tensors().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert_eq!(interpreter.invoke().unwrap_err().kind(), ErrorKind::Invocation);

    interpreter.resize_input_tensor(0, &[1, 4])?;
    interpreter.allocate_tensors()?;
    assert_eq!(interpreter.input_tensor(0)?.byte_size(), 16);
    Ok(())
}

#[test]
fn rejected_interpreter_releases_model() {
    init_tracing();
    let engine = Arc::new(ReferenceEngine::new());
    let bytes = ModelSpec::identity(TensorType::UInt8, &[2])
        .with_max_threads(2)
        .to_bytes()
        .expect("serialize model");
    let options = InterpreterOptions::default().with_num_threads(8);
    let err = Interpreter::with_engine(engine.clone(), &bytes, &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Construction);
    assert!(err.to_string().contains("CreateInterpreter failed"));
    assert!(err.to_string().contains("at most 2"));
    assert_eq!(engine.live_models(), 0);
    assert_eq!(engine.live_interpreters(), 0);
    assert_eq!(engine.invalid_releases(), 0);
}

#[test]
fn kernel_failure_is_invocation_error() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Int32, &[2]).with_kernel(Kernel::Fail);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    let err = interpreter.invoke().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);
    assert!(err.to_string().ends_with("kernel reported failure"));
    assert_eq!(interpreter.state(), InterpreterState::TensorsAllocated);
    Ok(())
}

#[test]
fn invalid_model_leaves_nothing_behind() {
    init_tracing();
    let engine = Arc::new(ReferenceEngine::new());
    let err = Interpreter::with_engine(engine.clone(), &[1, 2, 3], &InterpreterOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Construction);
    assert!(err.to_string().contains("CreateModel failed"));
    assert_eq!(engine.live_models(), 0);
    assert_eq!(engine.live_interpreters(), 0);
}

#[test]
fn destruction_is_idempotent() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Int8, &[2]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    assert_eq!(engine.live_interpreters(), 1);
    assert_eq!(engine.live_models(), 1);

    interpreter.close();
    interpreter.close();
    drop(interpreter);

    assert_eq!(engine.live_interpreters(), 0);
    assert_eq!(engine.live_models(), 0);
    assert_eq!(engine.invalid_releases(), 0);
    Ok(())
}

#[test]
fn repeated_invoke_with_rewritten_inputs() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::UInt8, &[2]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    for round in 0..3u8 {
        interpreter.input_tensor(0)?.copy_from_buffer(&[round, round + 1])?;
        interpreter.invoke()?;
        let mut out = [0u8; 2];
        interpreter.output_tensor(0)?.copy_to_buffer(&mut out)?;
        assert_eq!(out, [round, round + 1]);
    }
    Ok(())
}

#[test]
fn typed_arrays_through_ndarray() -> Result<()> {
    let engine = Arc::new(ReferenceEngine::new());
    let spec = ModelSpec::identity(TensorType::Float32, &[2, 2]);
    let mut interpreter = build(&engine, &spec, &InterpreterOptions::default())?;
    interpreter.allocate_tensors()?;

    let input: Array2<f32> = arr2(&[[0.5, 1.5], [-2.0, 3.25]]);
    interpreter.input_tensor(0)?.copy_from_array(&input)?;
    interpreter.invoke()?;

    let output = interpreter.output_tensor(0)?.to_array::<f32>()?;
    assert_eq!(output.shape(), &[2, 2]);
    for (got, want) in output.iter().zip(input.iter()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
    }

    let err = interpreter.output_tensor(0)?.to_array::<i32>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    let wrong_shape = Array2::<f32>::zeros((3, 2));
    let err = interpreter
        .input_tensor(0)?
        .copy_from_array(&wrong_shape)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Copy);
    Ok(())
}

#[test]
fn missing_model_file_and_config() {
    init_tracing();
    let err = Interpreter::from_file("/nonexistent/model.tflite", &InterpreterOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.to_string(), "File not found: /nonexistent/model.tflite");

    let config = Config::default();
    let err = Interpreter::from_config(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[cfg(not(feature = "tflite"))]
#[test]
fn model_loaded_from_config_file() -> Result<()> {
    init_tracing();
    let dir = std::env::temp_dir().join(format!("tflite-bridge-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let model_path = dir.join("identity.json");
    std::fs::write(&model_path, ModelSpec::identity(TensorType::UInt8, &[3]).to_bytes()?)?;
    let config_path = dir.join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "model:\n  path: {}\ninterpreter:\n  num_threads: 2\n",
            model_path.display()
        ),
    )?;

    let config = Config::from_yaml_file(&config_path)?;
    let mut interpreter = Interpreter::from_config(&config)?;
    interpreter.allocate_tensors()?;
    assert_eq!(interpreter.input_tensor(0)?.byte_size(), 3);

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
