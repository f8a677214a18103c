// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 模型统一接口与推理适配器
//!
//! # 架构说明
//!
//! ## Model Trait
//! 统一的模型接口,定义标准流程: preprocess → run → postprocess
//! - **YOLOv8**: 同时覆盖 YOLOv11 (ONNX 输出格式相同), 文件: `yolov8.rs`
//! - **YOLOv10**: 端到端 NMS-Free 输出, 文件: `yolov10.rs`
//!
//! ## InferenceAdapter Trait
//! 检测流水线的边界: 图像 → 原始观测 (`RawObservation`, 模型坐标空间)。
//! 所有后端错误在此处转换为类型化的 `PipelineError`:
//! - 加载失败 → `Configuration`
//! - 预处理/解码失败 → `Input`
//! - 前向推理/解码输出失败 → `Inference`
//!
//! ## 使用示例
//! ```no_run
//! use safety_sentinel::models::{self, InferenceAdapter};
//! use safety_sentinel::SentinelConfig;
//!
//! let config = SentinelConfig::default();
//! let mut adapter = models::load(&config.model_options())?;
//! let image = image::open("frame.jpg")?.to_rgba8();
//! let observations = adapter.infer(&image)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use anyhow::Result;
use image::{DynamicImage, RgbaImage};
use ndarray::{Array, IxDyn};
use tracing::{error, info};

use crate::detection::RawObservation;
use crate::error::PipelineError;
use crate::OrtConfig;

pub mod bbox;
pub mod yolov10; // YOLOv10 端到端模型 (NMS-Free)
pub mod yolov8; // YOLOv8 / YOLOv11 完整模型 + 实现 Model trait

pub use bbox::Bbox;
pub use yolov10::YOLOv10;
pub use yolov8::YOLOv8;

/// 模型类型枚举（用于自动识别模型）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// YOLOv8 标准模型
    YOLOv8,
    /// YOLOv10 端到端模型 (NMS-Free)
    YOLOv10,
    /// YOLOv11 改进模型 (与 YOLOv8 输出兼容)
    YOLOv11,
}

impl ModelType {
    /// 从模型路径推断模型类型
    pub fn from_path(path: &str) -> Self {
        let path = path.to_lowercase();
        if path.contains("yolov10") || path.contains("v10") {
            ModelType::YOLOv10
        } else if path.contains("yolov11") || path.contains("yolo11") || path.contains("v11") {
            ModelType::YOLOv11
        } else {
            ModelType::YOLOv8
        }
    }

    /// 获取模型推荐的置信度阈值 (后端预过滤, 低于标签映射器阈值)
    pub fn default_conf_threshold(&self) -> f32 {
        match self {
            ModelType::YOLOv10 => 0.20, // v10端到端模型已过滤
            ModelType::YOLOv11 => 0.15, // v11与v8相同
            ModelType::YOLOv8 => 0.15,
        }
    }

    /// 获取模型推荐的IOU阈值
    pub fn default_iou_threshold(&self) -> f32 {
        0.45
    }
}

/// 模型构建参数
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub ort: OrtConfig,
    pub conf: Option<f32>,
    pub iou: Option<f32>,
    /// 元数据中没有类别名时使用
    pub names: Option<Vec<String>>,
    pub profile: bool,
}

/// 统一的深度学习模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 原始观测 (每张图片一组)
/// ```
pub trait Model: Send {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 推理: 执行模型前向传播
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 模型坐标空间的观测
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<RawObservation>>>;

    /// 完整的推理流程: preprocess → run → postprocess
    ///
    /// 预处理失败 → `Input`, 前向推理/后处理失败 → `Inference`
    fn forward(
        &mut self,
        images: &[DynamicImage],
        profile: bool,
    ) -> Result<Vec<Vec<RawObservation>>, PipelineError> {
        let xs = self.preprocess(images).map_err(PipelineError::input)?;
        let ys = self.run(xs, profile).map_err(PipelineError::inference)?;
        self.postprocess(ys, images).map_err(PipelineError::inference)
    }

    fn model_type(&self) -> ModelType;

    /// 打印模型信息
    fn summary(&self);
}

/// 推理适配器: 图像 → 原始观测
///
/// 调用方视角为同步调用, 但必须在工作线程中执行 (见 `detection::session`)。
pub trait InferenceAdapter: Send {
    fn name(&self) -> &str;

    fn infer(&mut self, image: &RgbaImage) -> Result<Vec<RawObservation>, PipelineError>;

    /// 先解码再推理, 解码失败返回 `Input` 错误
    fn infer_encoded(&mut self, bytes: &[u8]) -> Result<Vec<RawObservation>, PipelineError> {
        let image = decode_frame(bytes)?;
        self.infer(&image)
    }
}

/// 解码任意 `image` 支持的格式为 RGBA
pub fn decode_frame(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    ensure_non_empty(&image)?;
    Ok(image)
}

pub(crate) fn ensure_non_empty(image: &RgbaImage) -> Result<(), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Input(format!(
            "empty image: {}x{}",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// ONNX 模型适配器
pub struct OnnxAdapter<M: Model> {
    model: M,
    name: String,
    profile: bool,
}

impl<M: Model> OnnxAdapter<M> {
    /// 适配器名称取自模型类型
    pub fn new(model: M, profile: bool) -> Self {
        let name = format!("{:?}", model.model_type());
        Self {
            model,
            name,
            profile,
        }
    }
}

impl<M: Model> InferenceAdapter for OnnxAdapter<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&mut self, image: &RgbaImage) -> Result<Vec<RawObservation>, PipelineError> {
        ensure_non_empty(image)?;
        let images = [DynamicImage::ImageRgba8(image.clone())];
        let results = self.model.forward(&images, self.profile)?;
        Ok(results.into_iter().next().unwrap_or_default())
    }
}

/// 根据模型路径加载对应的模型 (进程启动时调用一次)
///
/// 模型缺失或损坏返回 `Configuration` 错误, 检测功能整体禁用。
pub fn load(options: &ModelOptions) -> Result<Box<dyn InferenceAdapter>, PipelineError> {
    let model_type = ModelType::from_path(&options.ort.f);
    match model_type {
        ModelType::YOLOv8 | ModelType::YOLOv11 => {
            wrap(YOLOv8::new(options, model_type), model_type, options.profile)
        }
        ModelType::YOLOv10 => wrap(YOLOv10::new(options), model_type, options.profile),
    }
}

fn wrap<M: Model + 'static>(
    model: Result<M>,
    model_type: ModelType,
    profile: bool,
) -> Result<Box<dyn InferenceAdapter>, PipelineError> {
    match model {
        Ok(m) => {
            info!("✅ {:?} 检测模型加载成功", model_type);
            m.summary();
            Ok(Box::new(OnnxAdapter::new(m, profile)))
        }
        Err(e) => {
            error!("❌ {:?} 模型加载失败: {:#}", model_type, e);
            Err(PipelineError::configuration(format!("{:#}", e)))
        }
    }
}

/// 类别名查找, 缺失时返回 `class_{id}`
pub(crate) fn class_name(names: &[String], id: usize) -> String {
    names
        .get(id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", id))
}
