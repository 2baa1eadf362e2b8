use super::gateway;
use crate::api::request::{QueryRequest, Urgency};
use crate::config::Config;
use crate::core::{fingerprint, EngineContext, QueryEngine};
use crate::inference::{HardwareProfiler, SystemLoadMonitor};
use crate::Result;
use std::sync::Arc;
use tokio::sync::oneshot;

/// 单次查询参数
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub text: String,
    pub context: Option<String>,
    pub task: String,
    pub urgent: bool,
    pub model: Option<String>,
}

impl QueryArgs {
    fn into_request(self) -> QueryRequest {
        let context_fingerprint = fingerprint([self.context.as_deref().unwrap_or_default()]);
        let mut request = QueryRequest::new(self.text, context_fingerprint).with_task(self.task);
        if let Some(context) = self.context {
            request = request.with_context(context);
        }
        if let Some(model) = self.model {
            request = request.with_model(model);
        }
        if self.urgent {
            request = request.with_urgency(Urgency::High);
        }
        request
    }
}

/// 通过完整管道执行一次查询
pub async fn query(config: &Config, args: QueryArgs) -> Result<()> {
    let ctx = EngineContext::build(
        config,
        gateway(config)?,
        Arc::new(SystemLoadMonitor::new()),
        HardwareProfiler::new().detect(),
    )
    .await;
    let engine = QueryEngine::new(ctx);

    let (stop, stopped) = oneshot::channel::<()>();
    let dispatcher = {
        let engine = engine.clone();
        let ticker = engine.context().ticker();
        tokio::spawn(async move {
            engine
                .run(ticker, async {
                    let _ = stopped.await;
                })
                .await
        })
    };

    let result = engine.query(args.into_request()).await;

    let _ = stop.send(());
    if let Err(e) = dispatcher.await {
        tracing::warn!("Dispatch loop ended abnormally: {}", e);
    }
    engine.context().residency.persist().await?;

    let outcome = result?;
    println!("{}", outcome.response.text);
    println!(
        "-- model: {}, source: {:?}, confidence: {:.2}, time: {:.2}s",
        outcome.response.model,
        outcome.hit,
        outcome.response.confidence,
        outcome.processing_time.as_secs_f64()
    );
    Ok(())
}
