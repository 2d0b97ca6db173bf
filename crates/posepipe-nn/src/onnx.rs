//! ONNX model blobs compiled with tract.

use std::io::Cursor;
use std::sync::Arc;

use tract_onnx::prelude::{
    tvec, Datum, Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact,
    TypedOp,
};

use posepipe_core::{
    PoseError, Result, DISPLACEMENTS_LEN, HEATMAP_LEN, MODEL_INPUT_CHANNELS, MODEL_INPUT_HEIGHT,
    MODEL_INPUT_LEN, MODEL_INPUT_WIDTH, OFFSETS_LEN,
};

use crate::graph::{CompiledGraph, GraphCompiler};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const INPUT_SHAPE: [usize; 4] = [1, MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH, MODEL_INPUT_CHANNELS];
const OUTPUT_LENS: [usize; 4] = [DISPLACEMENTS_LEN, DISPLACEMENTS_LEN, HEATMAP_LEN, OFFSETS_LEN];

/// Compiles an NHWC float ONNX pose model with four outputs
/// (forward displacements, backward displacements, heatmap, offsets).
#[derive(Debug, Default)]
pub struct OnnxCompiler;

impl GraphCompiler for OnnxCompiler {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn compile(&self, model: &[u8]) -> Result<Arc<dyn CompiledGraph>> {
        let runnable = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(model))
            .map_err(|e| PoseError::ModelLoad(format!("failed to parse ONNX graph: {e}")))?
            .with_input_fact(0, f32::fact(INPUT_SHAPE).into())
            .map_err(|e| PoseError::ModelLoad(format!("invalid input shape: {e}")))?
            .into_optimized()
            .map_err(|e| PoseError::ModelLoad(format!("unable to optimize graph: {e}")))?
            .into_runnable()
            .map_err(|e| PoseError::ModelLoad(format!("unable to make graph runnable: {e}")))?;

        let outputs = runnable.model().outputs.len();
        if outputs != OUTPUT_LENS.len() {
            return Err(PoseError::ModelLoad(format!(
                "pose model must have {} outputs, found {outputs}",
                OUTPUT_LENS.len()
            )));
        }
        Ok(Arc::new(OnnxGraph { runnable }))
    }
}

struct OnnxGraph {
    runnable: RunnableModel,
}

impl CompiledGraph for OnnxGraph {
    fn input_len(&self) -> usize {
        MODEL_INPUT_LEN
    }

    fn output_lens(&self) -> &[usize] {
        &OUTPUT_LENS
    }

    fn run(&self, input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()> {
        let tensor = Tensor::from_shape(&INPUT_SHAPE, &input[..MODEL_INPUT_LEN])
            .map_err(|e| PoseError::Accelerator(format!("bad input tensor: {e}")))?;
        let results = self
            .runnable
            .run(tvec![tensor.into()])
            .map_err(|e| PoseError::Accelerator(format!("ONNX execution failed: {e}")))?;

        for (index, (value, out)) in results.into_iter().zip(outputs.iter_mut()).enumerate() {
            let tensor = value.into_tensor();
            let data = tensor
                .as_slice::<f32>()
                .map_err(|e| PoseError::Accelerator(format!("output {index}: {e}")))?;
            if data.len() != out.len() {
                return Err(PoseError::Accelerator(format!(
                    "output {index} has {} elements, expected {}",
                    data.len(),
                    out.len()
                )));
            }
            out.copy_from_slice(data);
        }
        Ok(())
    }
}
