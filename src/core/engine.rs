//! 查询引擎
//!
//! 将驻留管理、语义缓存与批调度串成一条查询管道：
//!
//! ```text
//! submit → 变换 → 缓存查找 ──命中──→ Ready
//!                    └─未命中→ 入队 → dispatch_once → ensure_loaded → chat → 写缓存 → 回复
//! ```
//!
//! [`EngineContext`] 在进程启动时构造一次，显式传给所有使用者。

use crate::api::error::InferenceError;
use crate::api::request::{ChatMessage, QueryRequest};
use crate::api::response::{HitKind, QueryOutcome, QueryResponse};
use crate::cache::{CacheLookup, SemanticQueryCache};
use crate::config::Config;
use crate::core::scheduler::{AdaptiveBatchScheduler, BatchItem};
use crate::core::ticker::BatchTicker;
use crate::inference::{HardwareProfile, InferenceGateway, LoadMonitor};
use crate::management::ModelResidencyManager;
use crate::plugins::{NoopTransform, PiiRedactor, QueryTransform};
use crate::Result;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

const FINGERPRINT_SEPARATOR: &str = "\u{1f}";

/// 由多个部分计算上下文指纹
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(FINGERPRINT_SEPARATOR.as_bytes());
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// 排队等待推理的查询
pub struct QueryJob {
    request: QueryRequest,
    submitted: Instant,
    deadline: Instant,
    reply: oneshot::Sender<Result<QueryOutcome>>,
}

impl BatchItem for QueryJob {
    fn input_len(&self) -> usize {
        self.request.query.chars().count()
            + self
                .request
                .context
                .as_ref()
                .map(|c| c.chars().count())
                .unwrap_or(0)
    }
}

/// 提交结果
pub enum Submission {
    /// 缓存命中，立即可用
    Ready(QueryOutcome),
    /// 已入队，结果通过 `receiver` 返回
    Pending {
        ticket: u64,
        receiver: oneshot::Receiver<Result<QueryOutcome>>,
    },
}

/// 引擎共享的组件
pub struct EngineContext {
    pub residency: ModelResidencyManager,
    pub cache: SemanticQueryCache,
    pub scheduler: AdaptiveBatchScheduler<QueryJob>,
    pub gateway: Arc<dyn InferenceGateway>,
    pub transform: Arc<dyn QueryTransform>,
    system_prompt: String,
    default_deadline: Duration,
    batch_wait: Duration,
}

impl EngineContext {
    /// 构造所有组件
    pub async fn build(
        config: &Config,
        gateway: Arc<dyn InferenceGateway>,
        load_monitor: Arc<dyn LoadMonitor>,
        profile: HardwareProfile,
    ) -> Self {
        let residency = ModelResidencyManager::open(&config.residency, profile, gateway.clone()).await;
        let transform: Arc<dyn QueryTransform> = if config.privacy.redact_queries {
            Arc::new(PiiRedactor::new())
        } else {
            Arc::new(NoopTransform)
        };

        tracing::info!(
            "Query engine ready - gateway: {}, transform: {}, cache capacity: {}",
            gateway.name(),
            transform.name(),
            config.cache.capacity
        );

        Self {
            residency,
            cache: SemanticQueryCache::new(&config.cache),
            scheduler: AdaptiveBatchScheduler::new(config.batching.clone(), load_monitor),
            gateway,
            transform,
            system_prompt: config.gateway.system_prompt.clone(),
            default_deadline: config.gateway.chat_timeout(),
            batch_wait: config.batching.max_batch_wait(),
        }
    }

    /// 周期等于最大批等待时间的节拍器
    pub fn ticker(&self) -> BatchTicker {
        BatchTicker::new(self.batch_wait)
    }
}

/// 查询引擎句柄，可廉价克隆
#[derive(Clone)]
pub struct QueryEngine {
    ctx: Arc<EngineContext>,
}

impl QueryEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// 提交查询：命中缓存立即返回，否则入队
    pub fn submit(&self, mut request: QueryRequest) -> Submission {
        let submitted = Instant::now();
        request.query = self.ctx.transform.sanitize_query(&request.query).into_owned();
        if let Some(context) = request.context.take() {
            request.context = Some(self.ctx.transform.sanitize_query(&context).into_owned());
        }

        let ready = |response: QueryResponse, hit: HitKind, similarity: Option<f32>| {
            Submission::Ready(QueryOutcome {
                response,
                hit,
                similarity,
                processing_time: submitted.elapsed(),
            })
        };

        match self
            .ctx
            .cache
            .lookup(&request.query, &request.context_fingerprint)
        {
            CacheLookup::Exact(response) => ready(response, HitKind::Exact, None),
            CacheLookup::Semantic {
                response,
                similarity,
            } => ready(response, HitKind::Semantic, Some(similarity)),
            CacheLookup::Miss => {
                let (reply, receiver) = oneshot::channel();
                let deadline = submitted + request.deadline.unwrap_or(self.ctx.default_deadline);
                let ticket = self.ctx.scheduler.enqueue(QueryJob {
                    request,
                    submitted,
                    deadline,
                    reply,
                });
                tracing::debug!("Query queued as ticket {}", ticket);
                Submission::Pending { ticket, receiver }
            }
        }
    }

    /// 提交并等待结果
    ///
    /// 超过截止时间返回 `InferenceError::Timeout`，排队中的请求在派发时被丢弃。
    pub async fn query(&self, request: QueryRequest) -> Result<QueryOutcome> {
        let deadline = request.deadline.unwrap_or(self.ctx.default_deadline);
        match self.submit(request) {
            Submission::Ready(outcome) => Ok(outcome),
            Submission::Pending { ticket, receiver } => {
                match tokio::time::timeout(deadline, receiver).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(InferenceError::Dropped.into()),
                    Err(_) => {
                        tracing::warn!("Query ticket {} timed out after {:?}", ticket, deadline);
                        Err(InferenceError::Timeout(deadline).into())
                    }
                }
            }
        }
    }

    /// 派发一批请求，返回实际处理的数量
    pub async fn dispatch_once(&self) -> usize {
        let batch = self.ctx.scheduler.drain_batch();
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        let avg_input =
            batch.iter().map(|r| r.payload.input_len()).sum::<usize>() as f64 / size as f64;
        let start = Instant::now();

        let processed = join_all(batch.into_iter().map(|r| self.process(r.payload)))
            .await
            .into_iter()
            .filter(|done| *done)
            .count();

        if processed > 0 {
            self.ctx
                .scheduler
                .record_sample(processed, start.elapsed(), avg_input);
        }
        tracing::debug!(
            "Dispatched batch: {} processed, {} skipped in {:?}",
            processed,
            size - processed,
            start.elapsed()
        );
        processed
    }

    /// 派发循环，直到 `shutdown` 完成
    pub async fn run<F>(&self, mut ticker: BatchTicker, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Query dispatch loop started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Query dispatch loop received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.ctx.scheduler.wait_for_batch() => {}
            }

            while !self.ctx.scheduler.is_empty() {
                if self.dispatch_once().await == 0 && self.ctx.scheduler.is_empty() {
                    break;
                }
            }
        }
    }

    async fn process(&self, job: QueryJob) -> bool {
        if job.reply.is_closed() {
            tracing::debug!("Caller gone, dropping queued query");
            return false;
        }
        if Instant::now() >= job.deadline {
            tracing::debug!("Deadline passed, dropping queued query");
            return false;
        }

        let budget = job.deadline.saturating_duration_since(job.submitted);
        let inferred =
            tokio::time::timeout_at(tokio::time::Instant::from_std(job.deadline), self.infer(&job.request))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!("Deadline of {:?} reached during inference, dropping query", budget);
                    Err(InferenceError::Timeout(budget).into())
                });

        let result = inferred.map(|response| {
            self.ctx.cache.store(
                &job.request.query,
                &job.request.context_fingerprint,
                response.clone(),
            );
            QueryOutcome {
                response,
                hit: HitKind::Inferred,
                similarity: None,
                processing_time: job.submitted.elapsed(),
            }
        });

        if let Err(e) = &result {
            tracing::error!("Query failed: {}", e);
        }
        // 调用方可能已超时离开
        let _ = job.reply.send(result);
        true
    }

    async fn infer(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let model = match &request.model {
            Some(model) => model.clone(),
            None => {
                self.ctx
                    .residency
                    .select_model(&request.task_hint, request.urgency)
                    .await
            }
        };
        self.ctx.residency.ensure_loaded(&model).await?;

        let prompt = match &request.context {
            Some(context) => format!("Data Context: {}\n\nQuery: {}", context, request.query),
            None => request.query.clone(),
        };
        let messages = [
            ChatMessage::system(self.ctx.system_prompt.as_str()),
            ChatMessage::user(prompt),
        ];

        let text = self.ctx.gateway.chat(&model, &messages).await?;
        let response = QueryResponse::from_model_output(model, text);
        Ok(self.ctx.transform.on_response(response))
    }
}
