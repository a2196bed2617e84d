//! 批量执行器
//!
//! 每条任务独立派生 RNG（seed + index），策略切换只改变调度方式，
//! 不改变单条任务的采样与生成语义。超时按单条任务计，串行策略
//! 不设超时，便于本地调试时挂着断点跑。

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Semaphore;

use crate::batch::{BatchOutcome, BatchStrategy, ProgressFn, ProgressTracker};
use crate::config::{BatchSection, GenerationSection};
use crate::dialog::DialogEngine;
use crate::error::EngineError;
use crate::tools::ToolSource;

/// 批量生成入口
#[derive(Clone)]
pub struct BatchRunner {
    engine: Arc<DialogEngine>,
    source: Arc<dyn ToolSource>,
    strategy: BatchStrategy,
    concurrency: usize,
    job_timeout: Option<Duration>,
    min_apis: usize,
    max_apis: usize,
    seed: Option<u64>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("strategy", &self.strategy)
            .field("concurrency", &self.concurrency)
            .field("job_timeout", &self.job_timeout)
            .field("min_apis", &self.min_apis)
            .field("max_apis", &self.max_apis)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    pub fn new(
        engine: Arc<DialogEngine>,
        source: Arc<dyn ToolSource>,
        batch: &BatchSection,
        generation: &GenerationSection,
    ) -> Result<Self, EngineError> {
        let strategy = batch.strategy.parse::<BatchStrategy>()?;
        if generation.min_apis_per_dialog == 0
            || generation.min_apis_per_dialog > generation.max_apis_per_dialog
        {
            return Err(EngineError::Config(format!(
                "非法的 API 采样范围: {}..={}",
                generation.min_apis_per_dialog, generation.max_apis_per_dialog
            )));
        }
        Ok(Self {
            engine,
            source,
            strategy,
            concurrency: batch.concurrency.max(1),
            job_timeout: (batch.timeout_secs > 0).then(|| Duration::from_secs(batch.timeout_secs)),
            min_apis: generation.min_apis_per_dialog,
            max_apis: generation.max_apis_per_dialog,
            seed: generation.seed,
        })
    }

    /// 生成 count 条对话，结果按 index 升序返回
    pub async fn run(&self, count: usize, progress: Option<Arc<ProgressFn>>) -> Vec<BatchOutcome> {
        let run_id = uuid::Uuid::new_v4();
        tracing::info!(
            %run_id,
            count,
            strategy = ?self.strategy,
            concurrency = self.concurrency,
            "开始批量生成"
        );

        let tracker = Arc::new(ProgressTracker::new(count, progress));
        let mut outcomes = match self.strategy {
            BatchStrategy::Sequential => self.run_sequential(count, &tracker).await,
            BatchStrategy::Threaded => self.run_threaded(count, &tracker).await,
            BatchStrategy::Buffered => self.run_buffered(count, &tracker).await,
        };
        outcomes.sort_by_key(BatchOutcome::index);

        let (completed, failed) = tracker.snapshot();
        tracing::info!(%run_id, completed, failed, "批量生成结束");
        outcomes
    }

    /// 单条任务：派生 RNG、采样工具、生成对话
    async fn run_one(&self, index: usize) -> BatchOutcome {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };
        let api_count = rng.gen_range(self.min_apis..=self.max_apis);
        let tools = self.source.sample(api_count, &mut rng);

        match self.engine.generate(&tools, None, &mut rng).await {
            Ok(dialog) => BatchOutcome::Success {
                index,
                dialog: Box::new(dialog),
            },
            Err(e) => {
                tracing::error!(index, error = %e, "生成失败，跳过该条");
                BatchOutcome::Failed {
                    index,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_one_with_timeout(&self, index: usize) -> BatchOutcome {
        let Some(timeout) = self.job_timeout else {
            return self.run_one(index).await;
        };
        match tokio::time::timeout(timeout, self.run_one(index)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = EngineError::JobTimeout(timeout.as_secs());
                tracing::error!(index, error = %error, "生成失败，跳过该条");
                BatchOutcome::Failed {
                    index,
                    error: error.to_string(),
                }
            }
        }
    }

    async fn run_sequential(&self, count: usize, tracker: &ProgressTracker) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for index in 0..count {
            let outcome = self.run_one(index).await;
            tracker.record(outcome.is_success());
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_threaded(
        &self,
        count: usize,
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<BatchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(count);

        for index in 0..count {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            let runner = self.clone();
            let tracker = Arc::clone(tracker);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = runner.run_one_with_timeout(index).await;
                tracker.record(outcome.is_success());
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(count);
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(index, error = %e, "生成任务异常退出");
                    tracker.record(false);
                    outcomes.push(BatchOutcome::Failed {
                        index,
                        error: "job panicked".to_string(),
                    });
                }
            }
        }
        outcomes
    }

    async fn run_buffered(
        &self,
        count: usize,
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<BatchOutcome> {
        stream::iter(0..count)
            .map(|index| {
                let runner = self.clone();
                let tracker = Arc::clone(tracker);
                async move {
                    let outcome = runner.run_one_with_timeout(index).await;
                    tracker.record(outcome.is_success());
                    outcome
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}
