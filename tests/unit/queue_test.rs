//! Unit tests for the generation queue

use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use zimage_server::config::ConfigStore;
use zimage_server::engine::{
    Component, Device, DeviceInfo, DiffusionPipeline, InferenceEngine, InferenceParams,
    LoadRequest, SeedSource,
};
use zimage_server::generation::{GenerationRequest, GenerationService, OutputStore};
use zimage_server::pipeline::PipelineManager;
use zimage_server::queue::{GenerationQueue, QueueConfig};
use zimage_server::AppError;

/// Tracks how many inference calls overlap
#[derive(Default)]
struct Probe {
    started: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ProbeEngine {
    probe: Arc<Probe>,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

struct ProbePipeline {
    probe: Arc<Probe>,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

impl InferenceEngine for ProbeEngine {
    fn name(&self) -> &str {
        "probe"
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn supports_quantization(&self) -> bool {
        false
    }

    fn load(&self, _request: &LoadRequest<'_>) -> anyhow::Result<Box<dyn DiffusionPipeline>> {
        Ok(Box::new(ProbePipeline {
            probe: self.probe.clone(),
            gate: self.gate.clone(),
        }))
    }
}

impl DiffusionPipeline for ProbePipeline {
    fn has_component(&self, _component: Component) -> bool {
        false
    }

    fn quantize(&mut self, _component: Component) -> anyhow::Result<()> {
        Ok(())
    }

    fn enable_cpu_offload(&mut self, _ordinal: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn to_device(&mut self, _device: Device) -> anyhow::Result<()> {
        Ok(())
    }

    fn generate(
        &self,
        params: &InferenceParams<'_>,
        _seed: Option<&SeedSource>,
    ) -> anyhow::Result<DynamicImage> {
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(now, Ordering::SeqCst);

        match &self.gate {
            Some(gate) => {
                let _ = gate.lock().unwrap().recv();
            }
            None => std::thread::sleep(Duration::from_millis(30)),
        }

        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        Ok(DynamicImage::new_rgb8(params.width, params.height))
    }
}

fn build_queue(
    dir: &tempfile::TempDir,
    engine: ProbeEngine,
    max_pending: usize,
) -> Arc<GenerationQueue> {
    let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));
    let pipelines = Arc::new(PipelineManager::new(Arc::new(engine), config.clone()));
    let service = Arc::new(GenerationService::new(
        pipelines,
        config,
        OutputStore::new(dir.path().join("output")),
    ));
    Arc::new(GenerationQueue::with_config(service, QueueConfig { max_pending }))
}

fn small_request() -> GenerationRequest {
    GenerationRequest::new("a red cube").with_size(16, 16).with_steps(1)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[test]
fn test_queue_config_defaults() {
    let config = QueueConfig::default();
    assert_eq!(config.max_pending, 16);
}

#[tokio::test]
async fn test_concurrent_submissions_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(Probe::default());
    let queue = build_queue(
        &dir,
        ProbeEngine {
            probe: probe.clone(),
            gate: None,
        },
        8,
    );

    let results = futures::future::join_all((0..4).map(|_| queue.submit(small_request()))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(probe.started.load(Ordering::SeqCst), 4);
    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(queue.processed_count(), 4);
    assert_eq!(queue.pending_count(), 0);
}

#[tokio::test]
async fn test_rejects_when_queue_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(Probe::default());
    let (gate_tx, gate_rx) = mpsc::channel();
    let queue = build_queue(
        &dir,
        ProbeEngine {
            probe: probe.clone(),
            gate: Some(Arc::new(Mutex::new(gate_rx))),
        },
        1,
    );

    // First job occupies the worker
    let running = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(small_request()).await }
    });
    wait_until(|| probe.started.load(Ordering::SeqCst) == 1).await;

    // Second job waits in the single pending slot
    let waiting = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(small_request()).await }
    });
    wait_until(|| queue.pending_count() == 2).await;

    let rejected = queue.submit(small_request()).await;
    assert!(matches!(rejected, Err(AppError::QueueFull(1))));

    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    assert!(running.await.unwrap().is_ok());
    assert!(waiting.await.unwrap().is_ok());
    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().processed, 2);
}

#[tokio::test]
async fn test_abandoned_job_is_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(Probe::default());
    let (gate_tx, gate_rx) = mpsc::channel();
    let queue = build_queue(
        &dir,
        ProbeEngine {
            probe: probe.clone(),
            gate: Some(Arc::new(Mutex::new(gate_rx))),
        },
        4,
    );

    let running = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(small_request()).await }
    });
    wait_until(|| probe.started.load(Ordering::SeqCst) == 1).await;

    let abandoned = tokio::spawn({
        let queue = queue.clone();
        async move { queue.submit(small_request()).await }
    });
    wait_until(|| queue.pending_count() == 2).await;
    abandoned.abort();
    wait_until(|| queue.pending_count() == 1).await;

    gate_tx.send(()).unwrap();
    assert!(running.await.unwrap().is_ok());
    wait_until(|| queue.skipped_count() == 1).await;

    let stats = queue.stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(probe.started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validation_errors_pass_through_queue() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(Probe::default());
    let queue = build_queue(
        &dir,
        ProbeEngine {
            probe: probe.clone(),
            gate: None,
        },
        4,
    );

    let result = queue
        .submit(GenerationRequest::new("a red cube").with_size(100, 512))
        .await;

    assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    assert_eq!(probe.started.load(Ordering::SeqCst), 0);
}
