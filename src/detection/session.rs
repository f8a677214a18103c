// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测会话 (Detection Session)
// 职责: 接收帧 → 工作线程推理 → 标签映射 → 聚合/告警 → 推送给订阅者
//
// 状态机: Idle → Capturing → Processing → Ready
// 同一时刻最多一个有效推理: 新提交的帧取代仍在执行的旧任务,
// 旧任务的结果按代号 (generation) 判定为过期并丢弃。

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::aggregator::DetectionAggregator;
use super::alerts::AlertEngine;
use super::label_mapper::LabelMapper;
use super::types::{AlertRecord, Category, Detection};
use crate::error::{PipelineError, Result};
use crate::models::InferenceAdapter;

/// 性能日志间隔 (推理轮次)
const LOG_EVERY: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
    Processing,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
        }
    }
}

/// 展示层读取的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub detections: Vec<Detection>,
    pub alerts: Vec<AlertRecord>,
    pub detection_accuracy: f32,
    pub counts: BTreeMap<Category, u64>,
    pub hazard_count: usize,
    pub last_processing_ms: f64,
    pub inference_fps: f64,
}

/// 推送给订阅者的事件
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    DetectionsUpdated(SessionSnapshot),
    AlertRaised(AlertRecord),
    /// 瞬时提示 (解码/推理失败), 不改变已有检测结果
    Warning(String),
}

struct Job {
    generation: u64,
    frame: RgbaImage,
}

/// 1秒窗口的推理帧率
struct FpsCounter {
    count: u64,
    last: Instant,
    current: f64,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            current: 0.0,
        }
    }

    fn tick(&mut self) {
        self.count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        if elapsed.as_secs() >= 1 {
            self.current = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = now;
        }
    }
}

/// 会话共享状态, 只有工作线程写入聚合器与告警列表
struct Shared {
    state: SessionState,
    generation: u64,
    aggregator: DetectionAggregator,
    alerts: AlertEngine,
    subscribers: Vec<Sender<SessionEvent>>,
    last_processing_ms: f64,
    fps: FpsCounter,
}

impl Shared {
    fn emit(&mut self, event: SessionEvent) {
        // 断开的订阅者直接移除
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            detections: self.aggregator.current().to_vec(),
            alerts: self.alerts.to_vec(),
            detection_accuracy: self.aggregator.detection_accuracy(),
            counts: self.aggregator.counts().clone(),
            hazard_count: self.aggregator.hazard_count(),
            last_processing_ms: self.last_processing_ms,
            inference_fps: self.fps.current,
        }
    }
}

type SharedState = Arc<(Mutex<Shared>, Condvar)>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 检测会话: 单个推理工作线程 + 状态机 + 订阅通道
pub struct DetectionSession {
    shared: SharedState,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    adapter_name: String,
}

impl DetectionSession {
    pub fn spawn(adapter: Box<dyn InferenceAdapter>, mapper: LabelMapper) -> Self {
        Self::with_aggregator(adapter, mapper, DetectionAggregator::new())
    }

    pub fn with_aggregator(
        adapter: Box<dyn InferenceAdapter>,
        mapper: LabelMapper,
        aggregator: DetectionAggregator,
    ) -> Self {
        let shared: SharedState = Arc::new((
            Mutex::new(Shared {
                state: SessionState::Idle,
                generation: 0,
                aggregator,
                alerts: AlertEngine::new(),
                subscribers: Vec::new(),
                last_processing_ms: 0.0,
                fps: FpsCounter::new(),
            }),
            Condvar::new(),
        ));

        let adapter_name = adapter.name().to_string();
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("detection-worker".to_string())
            .spawn(move || worker_loop(adapter, mapper, rx, worker_shared))
            .ok();
        let jobs = if worker.is_some() {
            Some(tx)
        } else {
            warn!("⚠️ 检测工作线程启动失败");
            None
        };
        info!("🔍 检测会话启动 ({})", adapter_name);

        Self {
            shared,
            jobs,
            worker,
            adapter_name,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Idle → Capturing, 其他状态下无操作
    pub fn start(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == SessionState::Idle {
            shared.set_state(SessionState::Capturing);
        }
    }

    /// 提交一帧进行检测
    ///
    /// 仍在执行的旧任务变为过期, 其结果不会写入状态。
    pub fn submit(&self, frame: RgbaImage) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| PipelineError::inference("detection worker stopped"))?;

        let mut shared = lock(&self.shared);
        if shared.state == SessionState::Idle {
            return Err(PipelineError::InvalidState {
                state: shared.state.as_str(),
                action: "submit a frame",
            });
        }
        if shared.state == SessionState::Processing {
            debug!("取代未完成的推理任务 (generation {})", shared.generation);
        }
        shared.generation += 1;
        let generation = shared.generation;
        jobs.send(Job { generation, frame })
            .map_err(|_| PipelineError::inference("detection worker stopped"))?;
        shared.set_state(SessionState::Processing);
        Ok(())
    }

    /// 取消会话: 回到 Idle, 在途推理的结果将被丢弃
    pub fn stop(&self) {
        let mut shared = lock(&self.shared);
        shared.generation += 1;
        shared.set_state(SessionState::Idle);
        self.shared.1.notify_all();
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.shared).subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.shared).snapshot()
    }

    pub fn mark_alert_read(&self, index: usize) -> bool {
        lock(&self.shared).alerts.mark_read(index)
    }

    pub fn mark_all_alerts_read(&self) {
        lock(&self.shared).alerts.mark_all_read();
    }

    /// 阻塞等待当前推理结束 (不再处于 Processing), 超时返回 false
    pub fn wait_until_settled(&self, timeout: Duration) -> bool {
        let guard = lock(&self.shared);
        let (guard, result) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |s| s.state == SessionState::Processing)
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);
        !result.timed_out()
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        lock(&self.shared).generation += 1;
        // 关闭任务通道, 工作线程在处理完当前任务后退出
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("⚠️ 检测工作线程异常退出");
            }
        }
    }
}

fn worker_loop(
    mut adapter: Box<dyn InferenceAdapter>,
    mapper: LabelMapper,
    rx: Receiver<Job>,
    shared: SharedState,
) {
    let mut passes: u64 = 0;

    for job in rx.iter() {
        // 队列中已被取代的任务直接跳过
        if lock(&shared).generation != job.generation {
            debug!("跳过过期任务 (generation {})", job.generation);
            continue;
        }

        let start = Instant::now();
        let result = adapter
            .infer(&job.frame)
            .map(|observations| mapper.classify_pass(&observations));
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut guard = lock(&shared);
        if guard.generation != job.generation {
            debug!("丢弃过期结果 (generation {})", job.generation);
            continue;
        }

        match result {
            Ok(detections) => {
                let found = detections.len();
                let inner = &mut *guard;
                let raised = inner.aggregator.ingest(detections, &mut inner.alerts);
                inner.last_processing_ms = total_ms;
                inner.fps.tick();
                for alert in raised {
                    inner.emit(SessionEvent::AlertRaised(alert));
                }
                inner.state = SessionState::Ready;
                let snapshot = inner.snapshot();
                inner.emit(SessionEvent::DetectionsUpdated(snapshot));
                inner.emit(SessionEvent::StateChanged(SessionState::Ready));

                passes += 1;
                if passes % LOG_EVERY == 0 {
                    info!(
                        "🎯 检测: {}个 | {:.1}ms/帧 | {:.1}fps | 精度 {:.2}",
                        found,
                        total_ms,
                        inner.fps.current,
                        inner.aggregator.detection_accuracy()
                    );
                }
            }
            Err(e) => {
                warn!("⚠️ 检测失败, 保留上一次结果: {}", e);
                guard.emit(SessionEvent::Warning(e.to_string()));
                guard.set_state(SessionState::Capturing);
            }
        }
        drop(guard);
        shared.1.notify_all();
    }

    debug!("检测工作线程退出");
}
