#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数 (命令行 + JSON)
pub mod detection; // 检测系统: 标签映射、聚合、告警、会话
pub mod effects; // 环境模拟: 光照 + 遮挡
pub mod error; // 错误类型
pub mod models; // 模型接口与具体实现
pub mod renderer; // 检测叠加层绘制
pub mod simulation; // 模拟流水线

pub mod ort_backend;

pub use crate::config::{Args, SentinelConfig};
pub use crate::detection::{
    AlertEngine, AlertRecord, Category, Detection, DetectionAggregator, DetectionSession,
    LabelMapper, RawObservation, Rect, SessionEvent, SessionSnapshot, SessionState, Severity,
};
pub use crate::effects::{EffectParameters, EnvironmentPreset};
pub use crate::error::PipelineError;
pub use crate::models::{Bbox, InferenceAdapter, Model, ModelType};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};
pub use crate::renderer::OverlayRenderer;
pub use crate::simulation::{SimulationOutcome, Simulator};

/// 非极大值抑制 (类别无关), 按置信度降序保留
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 本地时间字符串, 用于输出文件命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
