//! 模型驻留管理
//!
//! 在固定内存预算下维护一组已加载模型：
//! - 已加载模型走快速路径，只更新使用记录
//! - 加载、卸载与驱逐在同一个互斥区内串行执行
//! - 每次成功的状态转换后写入检查点

use crate::api::error::ModelError;
use crate::api::request::{ChatMessage, Urgency};
use crate::config::ResidencyConfig;
use crate::inference::{CapabilityTier, HardwareProfile, InferenceGateway};
use crate::models::{ModelDescriptor, ModelStatus};
use crate::storage::checkpoint::{Checkpoint, CheckpointRecord, CheckpointStore};
use crate::Result;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// 浮点比较容差（GB）
const BUDGET_EPSILON: f64 = 1e-9;

const LOAD_PROBE_PROMPT: &str = "Hello";

/// 内存与硬件统计
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub budget_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub loaded_models: usize,
    pub total_usage: u64,
    pub total_memory_gb: f64,
    pub tier: CapabilityTier,
    pub cpu_count: usize,
    pub has_gpu: bool,
    pub primary_model: String,
}

/// 模型驻留管理器
pub struct ModelResidencyManager {
    models: RwLock<HashMap<String, ModelDescriptor>>,
    /// 加载/卸载/驱逐的互斥区
    transition: Mutex<()>,
    budget_gb: f64,
    gateway: Arc<dyn InferenceGateway>,
    store: CheckpointStore,
    profile: HardwareProfile,
    primary_model: String,
    task_models: HashMap<String, String>,
    auto_pull: bool,
}

impl ModelResidencyManager {
    /// 创建管理器并尝试从检查点恢复
    ///
    /// 检查点缺失或损坏都不是致命错误，此时从静态目录开始，所有模型均未加载。
    pub async fn open(
        config: &ResidencyConfig,
        profile: HardwareProfile,
        gateway: Arc<dyn InferenceGateway>,
    ) -> Self {
        let budget_gb = profile.memory_budget_gb(config.memory_budget_gb);
        let mut models: HashMap<String, ModelDescriptor> = config
            .catalog
            .iter()
            .map(|entry| (entry.name.clone(), ModelDescriptor::from(entry)))
            .collect();

        let store = CheckpointStore::new(&config.checkpoint_path);
        match store.load().await {
            Ok(Some(checkpoint)) => {
                let restored = checkpoint.len();
                restore_checkpoint(&mut models, checkpoint, budget_gb);
                tracing::info!("Loaded previous state: {} models", restored);
            }
            Ok(None) => {
                tracing::debug!("No checkpoint at {}", store.path().display());
            }
            Err(e) => {
                tracing::warn!("Failed to load state, starting from catalog: {}", e);
            }
        }

        tracing::info!(
            "Model residency manager initialized - budget: {:.1}GB, hardware: {}",
            budget_gb,
            profile.tier
        );

        Self {
            models: RwLock::new(models),
            transition: Mutex::new(()),
            budget_gb,
            gateway,
            store,
            profile,
            primary_model: config.primary_model.clone(),
            task_models: config.task_models.clone(),
            auto_pull: config.auto_pull,
        }
    }

    pub fn budget_gb(&self) -> f64 {
        self.budget_gb
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// 确保模型已加载
    ///
    /// 已加载时只更新 `last_used` 与 `usage_count`，不访问推理服务。
    /// 并发调用同一模型时只有一个调用者执行加载，其余等待后复用结果。
    pub async fn ensure_loaded(&self, name: &str) -> Result<()> {
        if self.touch_if_loaded(name).await {
            return Ok(());
        }

        let _section = self.transition.lock().await;

        // 等待互斥区期间可能已被其他调用者加载
        if self.touch_if_loaded(name).await {
            return Ok(());
        }
        self.recover_abandoned().await;

        let plan = {
            let models = self.models.read().await;
            let target = models
                .get(name)
                .ok_or_else(|| ModelError::NotFound(name.to_string()))?;
            plan_eviction(&models, name, target.size_gb, self.budget_gb).ok_or_else(|| {
                ModelError::ResourceExhausted {
                    model: name.to_string(),
                    required_gb: target.size_gb,
                    available_gb: self.budget_gb,
                }
            })?
        };

        let mut guard = LoadGuard::arm(&self.models, name);
        self.models
            .write()
            .await
            .get_mut(name)
            .ok_or_else(|| ModelError::NotFound(name.to_string()))?
            .begin_load()?;

        tracing::info!("Loading {}...", name);
        let start = Instant::now();

        // 拉取失败时不驱逐任何模型
        if let Err(reason) = self.pull_if_needed(name).await {
            return Err(self.fail_load(&mut guard, name, reason).await);
        }

        let evicted = if plan.is_empty() {
            Vec::new()
        } else {
            let evicted = self.evict(&plan).await;
            self.save_logged().await;
            evicted
        };

        match self.probe(name).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                if let Some(model) = self.models.write().await.get_mut(name) {
                    model.finish_load(elapsed);
                }
                guard.disarm();
                tracing::info!("Loaded {} in {:.2}s", name, elapsed.as_secs_f64());
                self.save_logged().await;
                Ok(())
            }
            Err(reason) => {
                let err = self.fail_load(&mut guard, name, reason).await;
                if !evicted.is_empty() {
                    self.reinstate(evicted).await;
                    self.save_logged().await;
                }
                Err(err)
            }
        }
    }

    async fn fail_load(
        &self,
        guard: &mut LoadGuard<'_>,
        name: &str,
        reason: String,
    ) -> crate::FerrousMoatError {
        if let Some(model) = self.models.write().await.get_mut(name) {
            model.abort_load();
        }
        guard.disarm();
        tracing::error!("Failed to load {}: {}", name, reason);
        ModelError::LoadFailure {
            model: name.to_string(),
            reason,
        }
        .into()
    }

    /// 显式卸载模型
    pub async fn unload(&self, name: &str) -> Result<()> {
        let _section = self.transition.lock().await;
        {
            let mut models = self.models.write().await;
            let model = models
                .get_mut(name)
                .ok_or_else(|| ModelError::NotFound(name.to_string()))?;
            model.begin_unload()?;
            model.finish_unload();
        }
        tracing::info!("Unloaded {}", name);
        self.save_logged().await;
        Ok(())
    }

    /// 为任务选择模型
    ///
    /// 任务路由的首选模型已加载时直接使用；紧急请求在主模型已加载时改用主模型，
    /// 避免热路径上的冷加载；否则返回首选模型。
    pub async fn select_model(&self, task_hint: &str, urgency: Urgency) -> String {
        let preferred = self
            .task_models
            .get(task_hint)
            .cloned()
            .unwrap_or_else(|| self.primary_model.clone());

        let models = self.models.read().await;
        let is_loaded = |name: &str| models.get(name).map(|m| m.is_loaded()).unwrap_or(false);

        if is_loaded(&preferred) {
            return preferred;
        }
        if urgency == Urgency::High && is_loaded(&self.primary_model) {
            tracing::info!(
                "Using already loaded model {} for urgent '{}' request",
                self.primary_model,
                task_hint
            );
            return self.primary_model.clone();
        }

        tracing::debug!("Selected model {} for task '{}'", preferred, task_hint);
        preferred
    }

    pub async fn descriptor(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.read().await.get(name).cloned()
    }

    /// 所有模型描述，按名称排序
    pub async fn descriptors(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<_> = self.models.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn loaded_models(&self) -> Vec<String> {
        let mut loaded: Vec<_> = self
            .models
            .read()
            .await
            .values()
            .filter(|m| m.is_loaded())
            .map(|m| m.name.clone())
            .collect();
        loaded.sort();
        loaded
    }

    /// 已加载模型的内存占用总和（GB）
    pub async fn resident_gb(&self) -> f64 {
        resident_gb(&*self.models.read().await)
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        let models = self.models.read().await;
        let used_gb = resident_gb(&models);
        MemoryStats {
            budget_gb: self.budget_gb,
            used_gb,
            available_gb: self.budget_gb - used_gb,
            loaded_models: models.values().filter(|m| m.is_loaded()).count(),
            total_usage: models.values().map(|m| m.usage_count).sum(),
            total_memory_gb: self.profile.total_memory_gb,
            tier: self.profile.tier,
            cpu_count: self.profile.cpu_count,
            has_gpu: self.profile.has_gpu,
            primary_model: self.primary_model.clone(),
        }
    }

    /// 立即写入检查点
    pub async fn persist(&self) -> Result<()> {
        let _section = self.transition.lock().await;
        self.save().await
    }

    async fn touch_if_loaded(&self, name: &str) -> bool {
        let mut models = self.models.write().await;
        match models.get_mut(name) {
            Some(model) if model.is_loaded() => {
                model.touch();
                true
            }
            _ => false,
        }
    }

    /// 按计划驱逐，返回被驱逐模型驱逐前的描述
    async fn evict(&self, plan: &[String]) -> Vec<ModelDescriptor> {
        let mut models = self.models.write().await;
        let mut evicted = Vec::with_capacity(plan.len());
        for name in plan {
            if let Some(model) = models.get_mut(name) {
                let before = model.clone();
                if model.begin_unload().is_ok() {
                    tracing::info!("Unloading {} to free {:.1}GB", name, model.size_gb);
                    model.finish_unload();
                    evicted.push(before);
                }
            }
        }
        evicted
    }

    /// 加载失败后恢复被驱逐的模型
    ///
    /// 目标模型已回到未加载，恢复后的驻留总量与驱逐前相同。
    async fn reinstate(&self, evicted: Vec<ModelDescriptor>) {
        let mut models = self.models.write().await;
        for before in evicted {
            if let Some(model) = models.get_mut(&before.name) {
                if model.status == ModelStatus::Unloaded {
                    tracing::info!("Reinstating {} after failed load", before.name);
                    *model = before;
                }
            }
        }
    }

    /// 持有互斥区时不存在进行中的转换，残留的过渡状态来自被取消的调用
    async fn recover_abandoned(&self) {
        for model in self.models.write().await.values_mut() {
            if model.status.is_transient() {
                tracing::warn!("Recovering {} from abandoned {:?} state", model.name, model.status);
                model.status = ModelStatus::Unloaded;
            }
        }
    }

    async fn pull_if_needed(&self, name: &str) -> std::result::Result<(), String> {
        if !self.auto_pull {
            return Ok(());
        }
        match self.gateway.pull(name).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("{} rejected pull", self.gateway.name())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn probe(&self, name: &str) -> std::result::Result<(), String> {
        self.gateway
            .chat(name, &[ChatMessage::user(LOAD_PROBE_PROMPT)])
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn save(&self) -> Result<()> {
        let checkpoint: Checkpoint = self
            .models
            .read()
            .await
            .iter()
            .map(|(name, model)| (name.clone(), CheckpointRecord::from(model)))
            .collect();
        self.store.save(&checkpoint).await
    }

    async fn save_logged(&self) {
        if let Err(e) = self.save().await {
            tracing::error!("Failed to save state: {}", e);
        }
    }
}

/// 加载过程被取消（future 被丢弃）时把目标模型从 `Loading` 恢复为未加载
struct LoadGuard<'a> {
    models: &'a RwLock<HashMap<String, ModelDescriptor>>,
    name: &'a str,
    armed: bool,
}

impl<'a> LoadGuard<'a> {
    fn arm(models: &'a RwLock<HashMap<String, ModelDescriptor>>, name: &'a str) -> Self {
        Self {
            models,
            name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // 拿不到锁时由下一次进入互斥区的调用恢复
        match self.models.try_write() {
            Ok(mut models) => {
                if let Some(model) = models.get_mut(self.name) {
                    if model.status == ModelStatus::Loading {
                        model.abort_load();
                    }
                }
                tracing::warn!("Load of {} cancelled, status reverted", self.name);
            }
            Err(_) => {
                tracing::warn!(
                    "Load of {} cancelled, status stays Loading until the next load attempt",
                    self.name
                );
            }
        }
    }
}

fn resident_gb(models: &HashMap<String, ModelDescriptor>) -> f64 {
    models
        .values()
        .filter(|m| m.is_loaded())
        .map(|m| m.size_gb)
        .sum()
}

/// 驱逐顺序：最不重要（priority 数值最大）优先，相同优先级时最久未用者优先
fn eviction_order(a: &ModelDescriptor, b: &ModelDescriptor) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.last_used.cmp(&b.last_used))
}

/// 计算为 `target` 腾出 `required_gb` 需要驱逐的模型
///
/// 返回 `None` 表示即便驱逐所有可驱逐模型也放不下。
fn plan_eviction(
    models: &HashMap<String, ModelDescriptor>,
    target: &str,
    required_gb: f64,
    budget_gb: f64,
) -> Option<Vec<String>> {
    let mut resident = resident_gb(models);
    if resident + required_gb <= budget_gb + BUDGET_EPSILON {
        return Some(Vec::new());
    }

    let mut candidates: Vec<&ModelDescriptor> = models
        .values()
        .filter(|m| m.is_loaded() && m.name != target)
        .collect();
    candidates.sort_by(|a, b| eviction_order(a, b));

    let mut plan = Vec::new();
    for candidate in candidates {
        plan.push(candidate.name.clone());
        resident -= candidate.size_gb;
        if resident + required_gb <= budget_gb + BUDGET_EPSILON {
            return Some(plan);
        }
    }
    None
}

/// 将检查点合并进目录
///
/// 目录中的大小与优先级保持不变；过渡状态归为未加载；超出预算的已加载模型按驱逐顺序降级。
fn restore_checkpoint(
    models: &mut HashMap<String, ModelDescriptor>,
    checkpoint: Checkpoint,
    budget_gb: f64,
) {
    for (name, record) in checkpoint {
        match models.get_mut(&name) {
            Some(model) => {
                model.status = record.status;
                model.last_used = record.last_used;
                model.load_duration_seconds = record.load_duration_seconds;
                model.usage_count = record.usage_count;
            }
            None => {
                models.insert(name.clone(), record.into_descriptor(name));
            }
        }
    }

    for model in models.values_mut() {
        if model.status.is_transient() {
            model.status = ModelStatus::Unloaded;
        }
    }

    let mut loaded: Vec<ModelDescriptor> =
        models.values().filter(|m| m.is_loaded()).cloned().collect();
    loaded.sort_by(eviction_order);
    let mut resident: f64 = loaded.iter().map(|m| m.size_gb).sum();
    for victim in loaded {
        if resident <= budget_gb + BUDGET_EPSILON {
            break;
        }
        if let Some(model) = models.get_mut(&victim.name) {
            tracing::warn!(
                "Restored model {} exceeds budget, marking unloaded",
                victim.name
            );
            model.status = ModelStatus::Unloaded;
            resident -= victim.size_gb;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogEntry;
    use crate::inference::ScriptedGateway;
    use crate::FerrousMoatError;
    use tempfile::TempDir;

    fn catalog(entries: &[(&str, f64, u32)]) -> Vec<CatalogEntry> {
        entries
            .iter()
            .map(|(name, size_gb, priority)| CatalogEntry {
                name: name.to_string(),
                size_gb: *size_gb,
                priority: *priority,
            })
            .collect()
    }

    fn residency_config(dir: &TempDir, budget_gb: f64, entries: &[(&str, f64, u32)]) -> ResidencyConfig {
        ResidencyConfig {
            memory_budget_gb: Some(budget_gb),
            checkpoint_path: dir.path().join("residency.json"),
            primary_model: entries[0].0.to_string(),
            catalog: catalog(entries),
            ..ResidencyConfig::default()
        }
    }

    async fn manager_with(
        config: &ResidencyConfig,
        gateway: Arc<ScriptedGateway>,
    ) -> ModelResidencyManager {
        ModelResidencyManager::open(config, HardwareProfile::from_parts(16.0, 8, false), gateway).await
    }

    fn all_models(entries: &[(&str, f64, u32)]) -> Arc<ScriptedGateway> {
        Arc::new(ScriptedGateway::new().with_models(entries.iter().map(|e| e.0)))
    }

    #[tokio::test]
    async fn test_idempotent_reuse() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let gateway = all_models(&entries);
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), gateway.clone()).await;

        manager.ensure_loaded("m").await.unwrap();
        assert_eq!(gateway.chat_calls(), 1);
        manager.ensure_loaded("m").await.unwrap();
        assert_eq!(gateway.chat_calls(), 1);

        let model = manager.descriptor("m").await.unwrap();
        assert_eq!(model.status, ModelStatus::Loaded);
        assert_eq!(model.usage_count, 2);
    }

    #[tokio::test]
    async fn test_eviction_prefers_less_essential_model() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 1), ("b", 1.0, 2), ("c", 1.0, 1)];
        let gateway = all_models(&entries);
        let manager = manager_with(&residency_config(&dir, 2.0, &entries), gateway).await;

        // a 更早使用，但 b 的 priority 数值更大，应先被驱逐
        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        manager.ensure_loaded("c").await.unwrap();

        assert_eq!(manager.loaded_models().await, vec!["a", "c"]);
        assert!(manager.resident_gb().await <= manager.budget_gb());
    }

    #[tokio::test]
    async fn test_eviction_oldest_first_among_equals() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 2), ("b", 1.0, 2), ("c", 1.0, 2)];
        let gateway = all_models(&entries);
        let manager = manager_with(&residency_config(&dir, 2.0, &entries), gateway).await;

        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        // 再次使用 a，b 成为最久未用
        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("c").await.unwrap();

        assert_eq!(manager.loaded_models().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_resource_exhausted_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let entries = [("small", 1.0, 1), ("huge", 8.0, 2)];
        let gateway = all_models(&entries);
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), gateway.clone()).await;

        manager.ensure_loaded("small").await.unwrap();
        match manager.ensure_loaded("huge").await {
            Err(FerrousMoatError::Model(ModelError::ResourceExhausted { required_gb, .. })) => {
                assert_eq!(required_gb, 8.0);
            }
            other => panic!("expected ResourceExhausted, got {:?}", other),
        }

        assert_eq!(manager.loaded_models().await, vec!["small"]);
        assert_eq!(
            manager.descriptor("huge").await.unwrap().status,
            ModelStatus::Unloaded
        );
        assert_eq!(gateway.chat_calls_for("huge"), 0);
    }

    #[tokio::test]
    async fn test_load_failure_reverts_status() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let gateway = all_models(&entries);
        gateway.fail_model("m");
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), gateway.clone()).await;

        match manager.ensure_loaded("m").await {
            Err(FerrousMoatError::Model(ModelError::LoadFailure { model, .. })) => assert_eq!(model, "m"),
            other => panic!("expected LoadFailure, got {:?}", other),
        }
        assert_eq!(manager.descriptor("m").await.unwrap().status, ModelStatus::Unloaded);

        // 管理器不自动重试，由调用方决定
        gateway.recover_model("m");
        manager.ensure_loaded("m").await.unwrap();
        assert_eq!(gateway.chat_calls_for("m"), 2);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), all_models(&entries)).await;

        assert!(matches!(
            manager.ensure_loaded("missing").await,
            Err(FerrousMoatError::Model(ModelError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_loads_single_winner() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let gateway = Arc::new(
            ScriptedGateway::new()
                .with_models(["m"])
                .with_delay(std::time::Duration::from_millis(50)),
        );
        let manager = Arc::new(manager_with(&residency_config(&dir, 4.0, &entries), gateway.clone()).await);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_loaded("m").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(gateway.chat_calls_for("m"), 1);
        assert_eq!(manager.descriptor("m").await.unwrap().usage_count, 8);
    }

    #[tokio::test]
    async fn test_budget_invariant_over_sequence() {
        let dir = TempDir::new().unwrap();
        let entries = [
            ("a", 1.5, 1),
            ("b", 2.0, 2),
            ("c", 0.5, 3),
            ("d", 3.0, 2),
            ("e", 2.5, 4),
        ];
        let gateway = all_models(&entries);
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), gateway).await;

        for name in ["a", "b", "c", "d", "e", "a", "c", "b", "e", "d", "c"] {
            let _ = manager.ensure_loaded(name).await;
            assert!(manager.resident_gb().await <= 4.0 + BUDGET_EPSILON);
        }
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 1), ("b", 1.0, 2)];
        let config = residency_config(&dir, 4.0, &entries);

        {
            let manager = manager_with(&config, all_models(&entries)).await;
            manager.ensure_loaded("a").await.unwrap();
            manager.ensure_loaded("a").await.unwrap();
            manager.persist().await.unwrap();
        }

        let manager = manager_with(&config, all_models(&entries)).await;
        let a = manager.descriptor("a").await.unwrap();
        assert_eq!(a.status, ModelStatus::Loaded);
        assert_eq!(a.usage_count, 2);
        assert_eq!(
            manager.descriptor("b").await.unwrap().status,
            ModelStatus::Unloaded
        );
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 1)];
        let config = residency_config(&dir, 4.0, &entries);
        std::fs::write(&config.checkpoint_path, "\u{0}garbage").unwrap();

        let manager = manager_with(&config, all_models(&entries)).await;
        let a = manager.descriptor("a").await.unwrap();
        assert_eq!(a.status, ModelStatus::Unloaded);
        assert_eq!(a.usage_count, 0);
    }

    #[tokio::test]
    async fn test_restore_demotes_over_budget() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 2.0, 1), ("b", 2.0, 2)];
        let wide = residency_config(&dir, 4.0, &entries);
        {
            let manager = manager_with(&wide, all_models(&entries)).await;
            manager.ensure_loaded("a").await.unwrap();
            manager.ensure_loaded("b").await.unwrap();
        }

        let narrow = ResidencyConfig {
            memory_budget_gb: Some(3.0),
            ..wide
        };
        let manager = manager_with(&narrow, all_models(&entries)).await;
        assert_eq!(manager.loaded_models().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_select_model_urgency() {
        let dir = TempDir::new().unwrap();
        let entries = [("tinyllama", 0.6, 1), ("phi3", 2.3, 2)];
        let mut config = residency_config(&dir, 4.0, &entries);
        config
            .task_models
            .insert("forecast".to_string(), "phi3".to_string());
        let manager = manager_with(&config, all_models(&entries)).await;

        // 无模型加载时返回任务首选模型
        assert_eq!(manager.select_model("forecast", Urgency::High).await, "phi3");

        manager.ensure_loaded("tinyllama").await.unwrap();
        assert_eq!(manager.select_model("forecast", Urgency::Normal).await, "phi3");
        assert_eq!(manager.select_model("forecast", Urgency::High).await, "tinyllama");
        assert_eq!(manager.select_model("summary", Urgency::Normal).await, "tinyllama");

        manager.ensure_loaded("phi3").await.unwrap();
        assert_eq!(manager.select_model("forecast", Urgency::High).await, "phi3");
    }

    #[tokio::test]
    async fn test_unload_and_stats() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 1), ("b", 1.5, 2)];
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), all_models(&entries)).await;

        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        let stats = manager.memory_stats().await;
        assert_eq!(stats.loaded_models, 2);
        assert!((stats.used_gb - 2.5).abs() < 1e-9);
        assert!((stats.available_gb - 1.5).abs() < 1e-9);

        manager.unload("b").await.unwrap();
        assert_eq!(manager.loaded_models().await, vec!["a"]);
        assert!(manager.unload("b").await.is_err());
    }

    #[tokio::test]
    async fn test_auto_pull_rejection() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let mut config = residency_config(&dir, 4.0, &entries);
        config.auto_pull = true;
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.fail_model("m");
        let manager = manager_with(&config, gateway.clone()).await;

        assert!(manager.ensure_loaded("m").await.is_err());
        assert_eq!(gateway.pull_calls(), 1);
        assert_eq!(gateway.chat_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_load_can_be_retried() {
        let dir = TempDir::new().unwrap();
        let entries = [("m", 1.0, 1)];
        let gateway = Arc::new(
            ScriptedGateway::new()
                .with_models(["m"])
                .with_delay(std::time::Duration::from_millis(200)),
        );
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), gateway.clone()).await;

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(20), manager.ensure_loaded("m")).await;
        assert!(cancelled.is_err());
        assert_eq!(manager.descriptor("m").await.unwrap().status, ModelStatus::Unloaded);

        manager.ensure_loaded("m").await.unwrap();
        assert_eq!(manager.descriptor("m").await.unwrap().status, ModelStatus::Loaded);
        assert_eq!(gateway.chat_calls_for("m"), 2);
    }

    #[tokio::test]
    async fn test_abandoned_transition_is_recovered() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.0, 1), ("b", 1.0, 1)];
        let manager = manager_with(&residency_config(&dir, 4.0, &entries), all_models(&entries)).await;

        {
            let mut models = manager.models.write().await;
            models.get_mut("a").unwrap().status = ModelStatus::Loading;
            models.get_mut("b").unwrap().status = ModelStatus::Unloading;
        }

        manager.ensure_loaded("a").await.unwrap();
        assert_eq!(manager.descriptor("a").await.unwrap().status, ModelStatus::Loaded);
        assert_eq!(manager.descriptor("b").await.unwrap().status, ModelStatus::Unloaded);
    }

    #[tokio::test]
    async fn test_rejected_pull_keeps_resident_models() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.5, 1), ("b", 1.0, 2)];
        let mut config = residency_config(&dir, 2.0, &entries);
        config.auto_pull = true;
        let gateway = all_models(&entries);
        let manager = manager_with(&config, gateway.clone()).await;

        manager.ensure_loaded("a").await.unwrap();
        gateway.fail_model("b");
        assert!(manager.ensure_loaded("b").await.is_err());

        assert_eq!(manager.loaded_models().await, vec!["a"]);
        assert_eq!(manager.descriptor("b").await.unwrap().status, ModelStatus::Unloaded);
    }

    #[tokio::test]
    async fn test_failed_load_reinstates_evicted_models() {
        let dir = TempDir::new().unwrap();
        let entries = [("a", 1.5, 1), ("b", 1.0, 2)];
        let gateway = Arc::new(ScriptedGateway::new().with_models(["a"]));
        let manager = manager_with(&residency_config(&dir, 2.0, &entries), gateway.clone()).await;

        manager.ensure_loaded("a").await.unwrap();
        let before = manager.descriptor("a").await.unwrap();

        match manager.ensure_loaded("b").await {
            Err(FerrousMoatError::Model(ModelError::LoadFailure { model, .. })) => {
                assert_eq!(model, "b")
            }
            other => panic!("expected load failure, got {:?}", other),
        }

        assert_eq!(manager.loaded_models().await, vec!["a"]);
        assert_eq!(manager.descriptor("a").await.unwrap(), before);
        assert_eq!(manager.descriptor("b").await.unwrap().status, ModelStatus::Unloaded);
        assert!(manager.resident_gb().await <= manager.budget_gb());

        let restored = CheckpointStore::new(&dir.path().join("residency.json"))
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored["a"].status, ModelStatus::Loaded);
        assert_eq!(restored["b"].status, ModelStatus::Unloaded);
    }

    #[test]
    fn test_plan_eviction_none_when_too_large() {
        let mut models = HashMap::new();
        let mut a = ModelDescriptor::new("a", 1.0, 1);
        a.status = ModelStatus::Loaded;
        models.insert("a".to_string(), a);
        models.insert("big".to_string(), ModelDescriptor::new("big", 5.0, 1));

        assert!(plan_eviction(&models, "big", 5.0, 4.0).is_none());
        assert_eq!(plan_eviction(&models, "big", 3.5, 4.0), Some(vec!["a".to_string()]));
        assert_eq!(plan_eviction(&models, "big", 3.0, 4.0), Some(vec![]));
    }
}
