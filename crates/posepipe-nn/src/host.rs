use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use posepipe_core::{PoseError, Result, SyncFence};

use crate::backend::{AcceleratorBackend, AcceleratorCapabilities, ExecutionBindings};
use crate::graph::{CompiledGraph, GraphCompiler};
use crate::layout::MemoryPreference;

/// Host accelerator settings.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub capabilities: AcceleratorCapabilities,
    /// Reported placement preference for every input and output.
    pub preference: MemoryPreference,
}

impl HostConfig {
    pub fn for_feature_level(feature_level: i64) -> Self {
        Self {
            capabilities: AcceleratorCapabilities::for_feature_level(feature_level),
            preference: MemoryPreference::default(),
        }
    }
}

/// Counters for what the host accelerator has been asked to do.
#[derive(Debug, Default)]
pub struct HostStats {
    compilations: AtomicU64,
    executions_created: AtomicU64,
    sync_computes: AtomicU64,
    burst_computes: AtomicU64,
    fenced_computes: AtomicU64,
}

impl HostStats {
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::SeqCst)
    }

    pub fn executions_created(&self) -> u64 {
        self.executions_created.load(Ordering::SeqCst)
    }

    pub fn sync_computes(&self) -> u64 {
        self.sync_computes.load(Ordering::SeqCst)
    }

    pub fn burst_computes(&self) -> u64 {
        self.burst_computes.load(Ordering::SeqCst)
    }

    pub fn fenced_computes(&self) -> u64 {
        self.fenced_computes.load(Ordering::SeqCst)
    }
}

pub struct HostExecution {
    id: u64,
    graph: Arc<dyn CompiledGraph>,
    bindings: ExecutionBindings,
    reusable: bool,
    computes: u64,
}

impl HostExecution {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn begin(&mut self) -> Result<()> {
        if !self.reusable && self.computes > 0 {
            return Err(PoseError::Contract(format!(
                "execution {} is not reusable and was already computed",
                self.id
            )));
        }
        self.computes += 1;
        Ok(())
    }
}

/// Burst context. The host has no per-burst state beyond its identity.
#[derive(Debug)]
pub struct HostBurst {
    id: u64,
}

/// Completion of a fenced host execution.
pub struct HostEvent {
    done: mpsc::Receiver<Result<()>>,
}

type Task = Box<dyn FnOnce() + Send>;

/// Accelerator that runs compiled graphs on the CPU.
///
/// Fenced executions run on a dedicated thread: it waits for the dependency,
/// computes, and reports back through the returned [`HostEvent`].
pub struct HostAccelerator {
    compiler: Box<dyn GraphCompiler>,
    config: HostConfig,
    stats: Arc<HostStats>,
    next_id: u64,
    queue: Option<mpsc::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl HostAccelerator {
    pub fn new(compiler: Box<dyn GraphCompiler>, config: HostConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let worker = std::thread::Builder::new()
            .name("posepipe-accelerator".into())
            .spawn(move || {
                for task in rx {
                    task();
                }
            })?;

        tracing::info!(
            compiler = compiler.name(),
            capabilities = ?config.capabilities,
            "host accelerator ready"
        );

        Ok(Self {
            compiler,
            config,
            stats: Arc::new(HostStats::default()),
            next_id: 1,
            queue: Some(tx),
            worker: Some(worker),
        })
    }

    /// Shared counters, still readable after the accelerator moves into a stage.
    pub fn stats(&self) -> Arc<HostStats> {
        Arc::clone(&self.stats)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Read the input, run the graph and write every output in place.
fn run_graph(graph: &dyn CompiledGraph, bindings: &ExecutionBindings) -> Result<()> {
    const F32: usize = std::mem::size_of::<f32>();

    let input_len = graph.input_len();
    if input_len * F32 > bindings.input_len {
        return Err(PoseError::Accelerator(format!(
            "graph input of {input_len} floats exceeds bound input of {} bytes",
            bindings.input_len
        )));
    }
    let input = bindings.input.read::<f32>(0, input_len)?;

    let mut region = bindings
        .output
        .write::<f32>(0, bindings.layout.total_size() / F32)?;
    let mut rest: &mut [f32] = &mut region;
    let mut consumed = 0;
    let mut outputs: Vec<&mut [f32]> = Vec::with_capacity(graph.output_lens().len());

    for (index, &len) in graph.output_lens().iter().enumerate() {
        let layout = bindings
            .layout
            .output(index)
            .ok_or_else(|| PoseError::Accelerator(format!("no layout for output {index}")))?;
        if layout.offset % F32 != 0 {
            return Err(PoseError::Contract(format!(
                "output {index} at byte {} is not aligned for f32 access",
                layout.offset
            )));
        }
        if len * F32 > layout.padded_length {
            return Err(PoseError::Accelerator(format!(
                "output {index} needs {} bytes, layout reserves {}",
                len * F32,
                layout.padded_length
            )));
        }
        let start = layout.offset / F32;
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(start - consumed);
        let (tensor, tail) = tail.split_at_mut(len);
        consumed = start + len;
        rest = tail;
        outputs.push(tensor);
    }

    graph.run(&input, &mut outputs)
}

impl AcceleratorBackend for HostAccelerator {
    type Compiled = Arc<dyn CompiledGraph>;
    type Execution = HostExecution;
    type Burst = HostBurst;
    type Event = HostEvent;

    fn name(&self) -> &'static str {
        "host"
    }

    fn capabilities(&self) -> AcceleratorCapabilities {
        self.config.capabilities
    }

    fn compile(&mut self, model: &[u8]) -> Result<Self::Compiled> {
        let graph = self.compiler.compile(model)?;
        self.stats.compilations.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            compiler = self.compiler.name(),
            bytes = model.len(),
            outputs = graph.output_lens().len(),
            "compiled model"
        );
        Ok(graph)
    }

    fn input_padding(&self, _compiled: &Self::Compiled, _index: usize) -> Result<usize> {
        Ok(self.config.preference.padding)
    }

    fn output_preference(&self, _compiled: &Self::Compiled, _index: usize) -> Result<MemoryPreference> {
        Ok(self.config.preference)
    }

    fn create_burst(&mut self, _compiled: &Self::Compiled) -> Result<Self::Burst> {
        if !self.config.capabilities.burst {
            return Err(PoseError::Accelerator("burst execution not supported".into()));
        }
        let id = self.next_id();
        tracing::debug!(burst = id, "created burst");
        Ok(HostBurst { id })
    }

    fn create_execution(
        &mut self,
        compiled: &Self::Compiled,
        bindings: &ExecutionBindings,
        reusable: bool,
    ) -> Result<Self::Execution> {
        if reusable && !self.config.capabilities.reusable_execution {
            return Err(PoseError::Accelerator(
                "reusable execution not supported".into(),
            ));
        }
        let id = self.next_id();
        self.stats.executions_created.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(execution = id, reusable, "created execution");
        Ok(HostExecution {
            id,
            graph: Arc::clone(compiled),
            bindings: bindings.clone(),
            reusable,
            computes: 0,
        })
    }

    fn compute(&mut self, execution: &mut Self::Execution) -> Result<()> {
        execution.begin()?;
        run_graph(execution.graph.as_ref(), &execution.bindings)?;
        self.stats.sync_computes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn burst_compute(
        &mut self,
        execution: &mut Self::Execution,
        burst: &mut Self::Burst,
    ) -> Result<()> {
        execution.begin()?;
        tracing::trace!(execution = execution.id, burst = burst.id, "burst compute");
        run_graph(execution.graph.as_ref(), &execution.bindings)?;
        self.stats.burst_computes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_compute_with_dependency(
        &mut self,
        execution: &mut Self::Execution,
        dependency: SyncFence,
    ) -> Result<Self::Event> {
        if !self.config.capabilities.sync_fence {
            return Err(PoseError::Accelerator(
                "fence dependencies not supported".into(),
            ));
        }
        execution.begin()?;

        let graph = Arc::clone(&execution.graph);
        let bindings = execution.bindings.clone();
        let stats = Arc::clone(&self.stats);
        let (done_tx, done_rx) = mpsc::channel();
        let task: Task = Box::new(move || {
            let result = dependency
                .wait()
                .and_then(|()| run_graph(graph.as_ref(), &bindings));
            if result.is_ok() {
                stats.fenced_computes.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(result);
        });

        self.queue
            .as_ref()
            .ok_or_else(|| PoseError::Accelerator("accelerator queue shut down".into()))?
            .send(task)
            .map_err(|_| PoseError::Accelerator("accelerator queue thread exited".into()))?;

        Ok(HostEvent { done: done_rx })
    }

    fn wait(&mut self, event: Self::Event) -> Result<()> {
        event
            .done
            .recv()
            .map_err(|_| PoseError::Accelerator("fenced execution was dropped".into()))?
    }
}

impl Drop for HostAccelerator {
    fn drop(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("accelerator queue thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BuiltinCompiler, LUMINANCE_MODEL};
    use crate::layout::ExecutionLayout;
    use posepipe_core::capabilities::{FEATURE_LEVEL_4, FEATURE_LEVEL_5};
    use posepipe_core::{fence_pair, HEATMAP_LEN, MODEL_INPUT_BYTES, OUTPUT_TENSOR_BYTES};
    use posepipe_gpu::{BufferUsage, HostAllocator, SharedBuffer, SharedBufferAllocator};

    struct Fixture {
        accelerator: HostAccelerator,
        compiled: Arc<dyn CompiledGraph>,
        bindings: ExecutionBindings,
        _input: SharedBuffer,
        output: SharedBuffer,
    }

    fn fixture(feature_level: i64) -> Fixture {
        let mut accelerator = HostAccelerator::new(
            Box::new(BuiltinCompiler),
            HostConfig::for_feature_level(feature_level),
        )
        .unwrap();
        let compiled = accelerator.compile(LUMINANCE_MODEL).unwrap();

        let allocator = HostAllocator::new();
        let input = allocator
            .allocate(MODEL_INPUT_BYTES, BufferUsage::GPU_DATA_BUFFER)
            .unwrap();
        // Mid-gray everywhere.
        input
            .handle()
            .write::<f32>(0, MODEL_INPUT_BYTES / 4)
            .unwrap()
            .fill(0.0);
        let layout =
            ExecutionLayout::plan(&OUTPUT_TENSOR_BYTES, |_| Ok(MemoryPreference::default()))
                .unwrap();
        let mut output = allocator
            .allocate(layout.total_size(), BufferUsage::CPU_READ_OFTEN)
            .unwrap();
        output.lock().unwrap();

        let bindings = ExecutionBindings {
            input: input.handle(),
            input_len: MODEL_INPUT_BYTES,
            output: output.handle(),
            layout,
        };
        Fixture {
            accelerator,
            compiled,
            bindings,
            _input: input,
            output,
        }
    }

    fn heatmap(f: &Fixture) -> Vec<f32> {
        let offset = f.bindings.layout.outputs()[2].offset;
        f.output.read::<f32>(offset, HEATMAP_LEN).unwrap().to_vec()
    }

    #[test]
    fn test_sync_compute_writes_outputs() {
        let mut f = fixture(FEATURE_LEVEL_4);
        let mut exec = f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, false)
            .unwrap();
        f.accelerator.compute(&mut exec).unwrap();

        // Gray input: luminance 0 in every cell.
        assert!(heatmap(&f).iter().all(|v| v.abs() < 1e-5));
        assert_eq!(f.accelerator.stats().sync_computes(), 1);
    }

    #[test]
    fn test_single_use_execution() {
        let mut f = fixture(FEATURE_LEVEL_4);
        let mut exec = f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, false)
            .unwrap();
        f.accelerator.compute(&mut exec).unwrap();
        assert!(matches!(
            f.accelerator.compute(&mut exec),
            Err(PoseError::Contract(_))
        ));
    }

    #[test]
    fn test_modern_features_gated_by_level() {
        let mut f = fixture(FEATURE_LEVEL_4);
        assert!(f.accelerator.create_burst(&f.compiled).is_err());
        assert!(f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, true)
            .is_err());
        let mut exec = f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, false)
            .unwrap();
        assert!(f
            .accelerator
            .start_compute_with_dependency(&mut exec, SyncFence::none())
            .is_err());
    }

    #[test]
    fn test_fenced_compute_waits_for_dependency() {
        let mut f = fixture(FEATURE_LEVEL_5);
        let mut exec = f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, true)
            .unwrap();

        let (signaler, fence) = fence_pair().unwrap();
        let event = f
            .accelerator
            .start_compute_with_dependency(&mut exec, fence)
            .unwrap();
        assert_eq!(f.accelerator.stats().fenced_computes(), 0);

        signaler.signal().unwrap();
        f.accelerator.wait(event).unwrap();
        assert_eq!(f.accelerator.stats().fenced_computes(), 1);

        // Reusable: the same execution runs again through a burst.
        let mut burst = f.accelerator.create_burst(&f.compiled).unwrap();
        f.accelerator.burst_compute(&mut exec, &mut burst).unwrap();
        assert_eq!(f.accelerator.stats().burst_computes(), 1);
    }

    #[test]
    fn test_abandoned_dependency_fails_execution() {
        let mut f = fixture(FEATURE_LEVEL_5);
        let mut exec = f
            .accelerator
            .create_execution(&f.compiled, &f.bindings, true)
            .unwrap();
        let (signaler, fence) = fence_pair().unwrap();
        let event = f
            .accelerator
            .start_compute_with_dependency(&mut exec, fence)
            .unwrap();
        drop(signaler);
        assert!(f.accelerator.wait(event).is_err());
    }
}
