//! 自适应批调度
//!
//! 请求进入单一 FIFO 队列，批大小由在线拟合的成本模型决定：
//! 对每个候选大小预测单条耗时，选择使整批耗时最小的大小。
//! 样本不足或模型不可用时退回 `min(队列长度, 最大批大小)`。

use crate::config::BatchingConfig;
use crate::core::regression::{RidgeModel, FEATURES};
use crate::inference::{LoadMonitor, LoadSample};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

const RIDGE_ALPHA: f64 = 1.0;

/// 估算输入长度时参考的队首请求数
const INPUT_LENGTH_WINDOW: usize = 5;

/// 可排队的负载
pub trait BatchItem {
    /// 输入长度（字符数）
    fn input_len(&self) -> usize;
}

impl BatchItem for String {
    fn input_len(&self) -> usize {
        self.chars().count()
    }
}

/// 排队中的请求
#[derive(Debug)]
pub struct PendingRequest<T> {
    pub id: u64,
    pub payload: T,
    pub enqueue_time: Instant,
}

/// 一次批处理的性能记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPerformanceSample {
    pub batch_size: usize,
    pub avg_input_length: f64,
    pub system_load_at_capture: f64,
    pub memory_at_capture: f64,
    /// 整批耗时（秒）
    pub measured_processing_time: f64,
}

impl BatchPerformanceSample {
    fn features(&self) -> [f64; FEATURES] {
        [
            self.batch_size as f64,
            self.avg_input_length,
            self.system_load_at_capture,
            self.memory_at_capture,
        ]
    }

    fn per_item_time(&self) -> f64 {
        self.measured_processing_time / self.batch_size.max(1) as f64
    }
}

#[derive(Debug, Default)]
struct History {
    samples: VecDeque<BatchPerformanceSample>,
    recorded: u64,
    model: Option<RidgeModel>,
}

/// 自适应批调度器
pub struct AdaptiveBatchScheduler<T> {
    queue: Mutex<VecDeque<PendingRequest<T>>>,
    history: Mutex<History>,
    next_id: AtomicU64,
    monitor: Arc<dyn LoadMonitor>,
    config: BatchingConfig,
    batch_ready: Notify,
}

impl<T: BatchItem> AdaptiveBatchScheduler<T> {
    pub fn new(config: BatchingConfig, monitor: Arc<dyn LoadMonitor>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(History::default()),
            next_id: AtomicU64::new(0),
            monitor,
            config,
            batch_ready: Notify::new(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// 入队，返回单调递增的序号
    pub fn enqueue(&self, payload: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let len = {
            let mut queue = self.queue.lock();
            queue.push_back(PendingRequest {
                id,
                payload,
                enqueue_time: Instant::now(),
            });
            queue.len()
        };

        if len >= self.config.max_batch_size {
            self.batch_ready.notify_waiters();
        }
        id
    }

    /// 取出一批请求
    ///
    /// 队列为空时返回空批；否则至少返回一个请求。
    pub fn drain_batch(&self) -> Vec<PendingRequest<T>> {
        let model = self.history.lock().fitted_model(self.config.min_samples);
        let load = model.as_ref().map(|_| self.monitor.sample());

        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return Vec::new();
        }

        let upper = queue.len().min(self.config.max_batch_size).max(1);
        let size = match (model, load) {
            (Some(model), Some(load)) => {
                let avg_input = average_input_length(&queue);
                optimal_size(&model, upper, avg_input, load).unwrap_or_else(|| {
                    tracing::warn!("Batch size prediction unusable, using fallback size {}", upper);
                    upper
                })
            }
            _ => upper,
        };

        tracing::debug!("Draining batch of {} from queue of {}", size, queue.len());
        queue.drain(..size).collect()
    }

    /// 记录一次批处理性能，每 `refit_interval` 个样本重新拟合
    pub fn record_sample(&self, batch_size: usize, processing_time: Duration, avg_input_length: f64) {
        let load = self.monitor.sample();
        let sample = BatchPerformanceSample {
            batch_size,
            avg_input_length,
            system_load_at_capture: load.cpu_percent,
            memory_at_capture: load.memory_percent,
            measured_processing_time: processing_time.as_secs_f64(),
        };

        let mut history = self.history.lock();
        if history.samples.len() >= self.config.history_capacity.max(1) {
            history.samples.pop_front();
        }
        history.samples.push_back(sample);
        history.recorded += 1;

        let interval = self.config.refit_interval.max(1) as u64;
        if history.recorded % interval == 0 && history.samples.len() >= self.config.min_samples {
            history.refit();
        }
    }

    /// 等待队列达到最大批大小或等待窗口结束
    pub async fn wait_for_batch(&self) {
        let notified = self.batch_ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.len() >= self.config.max_batch_size {
            return;
        }
        let _ = tokio::time::timeout(self.config.max_batch_wait(), notified).await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.history.lock().samples.len()
    }

    pub fn has_model(&self) -> bool {
        self.history.lock().model.is_some()
    }

    pub fn samples(&self) -> Vec<BatchPerformanceSample> {
        self.history.lock().samples.iter().cloned().collect()
    }
}

impl History {
    fn fitted_model(&self, min_samples: usize) -> Option<RidgeModel> {
        if self.samples.len() < min_samples {
            return None;
        }
        self.model.clone()
    }

    fn refit(&mut self) {
        let training: Vec<_> = self
            .samples
            .iter()
            .map(|s| (s.features(), s.per_item_time()))
            .collect();

        match RidgeModel::fit(&training, RIDGE_ALPHA) {
            Some(model) => {
                tracing::info!("Updated adaptive batching performance model");
                self.model = Some(model);
            }
            None => {
                tracing::warn!("Batch model refit failed, keeping previous model");
            }
        }
    }
}

fn average_input_length<T: BatchItem>(queue: &VecDeque<PendingRequest<T>>) -> f64 {
    let window: Vec<usize> = queue
        .iter()
        .take(INPUT_LENGTH_WINDOW)
        .map(|r| r.payload.input_len())
        .collect();
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<usize>() as f64 / window.len() as f64
}

/// 在 `1..=upper` 中选择预测整批耗时最小的大小
fn optimal_size(model: &RidgeModel, upper: usize, avg_input: f64, load: LoadSample) -> Option<usize> {
    (1..=upper)
        .filter_map(|size| {
            let per_item = model.predict(&[
                size as f64,
                avg_input,
                load.cpu_percent,
                load.memory_percent,
            ]);
            let total = per_item * size as f64;
            total.is_finite().then_some((size, total))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(size, _)| size)
}
