// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 流水线错误类型 (Pipeline error taxonomy)

use std::path::PathBuf;

/// 检测/模拟流水线错误
///
/// - `Configuration`: 模型文件缺失或损坏,检测功能整体禁用,不自动重试
/// - `Input`:         图像解码/格式错误,跳过该帧,不影响已有检测结果
/// - `Inference`:     推理后端运行失败,保留上一次检测结果
/// - `Render`:        叠加层绘制失败,回退为原始图像
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("render error: {0}")]
    Render(String),

    /// 会话状态机拒绝的状态转换
    #[error("invalid session transition: cannot {action} while {state}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// 只有配置错误会禁用整个检测功能
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    pub fn configuration(e: impl std::fmt::Display) -> Self {
        PipelineError::Configuration(e.to_string())
    }

    pub fn input(e: impl std::fmt::Display) -> Self {
        PipelineError::Input(e.to_string())
    }

    pub fn inference(e: impl std::fmt::Display) -> Self {
        PipelineError::Inference(e.to_string())
    }

    pub fn render(e: impl std::fmt::Display) -> Self {
        PipelineError::Render(e.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        PipelineError::Input(e.to_string())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
