use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::pipeline::{PipelineError, ScanPipeline};
use crate::preprocess::PreprocessOptions;
use crate::recognizer::OcrProvider;
use crate::types::{ScanJob, ScanResult};

/// Several pipelines, each with its own adapter, sharing one job queue.
pub struct ScanPool {
    pipelines: Vec<ScanPipeline>,
}

pub struct PoolOutcome {
    /// One result per job, in job order.
    pub results: Vec<ScanResult>,
    /// Every pipeline, returned for inspection or shutdown.
    pub pipelines: Vec<ScanPipeline>,
}

impl ScanPool {
    pub fn new(pipelines: Vec<ScanPipeline>) -> Self {
        Self { pipelines }
    }

    /// Acquire `workers` adapters (at least one) from `provider`.
    pub fn acquire(
        provider: &dyn OcrProvider,
        lang: &str,
        workers: usize,
        options: &PreprocessOptions,
    ) -> Self {
        let pipelines = (0..workers.max(1))
            .map(|_| ScanPipeline::acquire(provider, lang, options.clone()))
            .collect();
        Self { pipelines }
    }

    pub fn ready_count(&self) -> usize {
        self.pipelines.iter().filter(|p| p.is_ready()).count()
    }

    pub fn into_pipelines(self) -> Vec<ScanPipeline> {
        self.pipelines
    }

    /// Run `jobs` across every ready pipeline. Each pipeline handles one job at
    /// a time; pipelines without an adapter sit the batch out, and a pipeline
    /// that loses its adapter stops taking jobs.
    pub async fn run(self, jobs: Vec<ScanJob>) -> Result<PoolOutcome, PipelineError> {
        let (ready, idle): (Vec<_>, Vec<_>) = self.pipelines.into_iter().partition(ScanPipeline::is_ready);
        if ready.is_empty() {
            return Err(PipelineError::AdapterUnavailable);
        }

        let total = jobs.len();
        let queue = Arc::new(Mutex::new(jobs.into_iter().enumerate().collect::<VecDeque<_>>()));
        tracing::info!(jobs = total, workers = ready.len(), "Starting pooled scan");

        let workers: Vec<_> = ready
            .into_iter()
            .map(|mut pipeline| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut done = Vec::new();
                    // A worker whose adapter crashed leaves the rest of the queue to the others.
                    while pipeline.is_ready() {
                        let next = queue.lock().await.pop_front();
                        let Some((idx, job)) = next else { break };
                        let (key, name) = (job.key(), job.name.clone());
                        let result = match pipeline.process(job).await {
                            Ok(result) => result,
                            Err(e) => ScanResult::failed(key, name, e.to_string()),
                        };
                        done.push((idx, result));
                    }
                    (pipeline, done)
                })
            })
            .collect();

        let mut pipelines = idle;
        let mut indexed = Vec::with_capacity(total);
        for worker in workers {
            let (pipeline, done) = worker.await.map_err(|e| PipelineError::WorkerLost(e.to_string()))?;
            pipelines.push(pipeline);
            indexed.extend(done);
        }

        // Only reachable when every adapter was lost mid-batch.
        let stranded: Vec<_> = queue.lock().await.drain(..).collect();
        if !stranded.is_empty() {
            tracing::error!(jobs = stranded.len(), "No OCR adapter left; failing remaining files");
        }
        for (idx, job) in stranded {
            let reason = PipelineError::AdapterUnavailable.to_string();
            indexed.push((idx, ScanResult::failed(job.key(), job.name, reason)));
        }
        indexed.sort_by_key(|(idx, _)| *idx);

        Ok(PoolOutcome {
            results: indexed.into_iter().map(|(_, r)| r).collect(),
            pipelines,
        })
    }
}
