// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测系统 (Detection System)
//!
//! 独立工作线程执行推理, 其余组件均为纯逻辑:
//! - LabelMapper:         原始观测 → 领域检测 (阈值 + 关键词规则 + 坐标翻转)
//! - DetectionAggregator: 当前集 / 历史 / 类别计数 / 检测精度
//! - AlertEngine:         危险物体告警
//! - DetectionSession:    状态机 + 工作线程 + 订阅通道
pub mod aggregator;
pub mod alerts;
pub mod label_mapper;
pub mod session;
pub mod types;

pub use aggregator::DetectionAggregator;
pub use alerts::AlertEngine;
pub use label_mapper::{model_to_display, LabelMapper, LabelRule, RuleTable};
pub use session::{DetectionSession, SessionEvent, SessionSnapshot, SessionState};
pub use types::{AlertRecord, Category, Detection, RawObservation, Rect, Severity};
