// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 配置: 命令行参数 + JSON 配置文件
// 命令行优先于配置文件, 配置文件缺失时写出默认值

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::aggregator::{ACCURACY_CEIL, ACCURACY_FLOOR};
use crate::detection::types::MIN_CONFIDENCE;
use crate::detection::{DetectionAggregator, LabelMapper, LabelRule, RuleTable};
use crate::effects::{EffectParameters, EnvironmentPreset};
use crate::error::{PipelineError, Result};
use crate::models::ModelOptions;
use crate::ort_backend::DEFAULT_INPUT_SIZE;
use crate::renderer::{
    OverlayRenderer, DEFAULT_FONT, DEFAULT_LABEL_SCALE, DEFAULT_STRIP_OPACITY, DEFAULT_STROKE_WIDTH,
};
use crate::{OrtConfig, OrtEP};

/// 安全设备检测参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "空间站安全设备检测 + 环境模拟", long_about = None)]
pub struct Args {
    /// 待检测图像
    #[arg(short, long)]
    pub source: String,

    /// ONNX 模型路径 (覆盖配置文件)
    #[arg(short, long)]
    pub model: Option<String>,

    /// 配置文件路径, 默认位于用户配置目录
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 叠加层输出路径, 默认 runs/sentinel-{时间}.png
    #[arg(short, long)]
    pub output: Option<String>,

    /// 环境预设: "Normal Station" / "Maintenance Mode" / "Emergency Power" / "Debris Field"
    #[arg(long)]
    pub preset: Option<String>,

    /// 光照等级 [0,1], 0.5 为原始亮度
    #[arg(long)]
    pub lighting: Option<f32>,

    /// 遮挡等级 [0,1]
    #[arg(long)]
    pub occlusion: Option<f32>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<String>,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 后端置信度阈值 (NMS 前)
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IoU 阈值
    #[arg(long)]
    pub iou: Option<f32>,

    /// 告警列表输出 (JSON)
    #[arg(long)]
    pub alerts_json: Option<String>,

    /// 打印推理耗时
    #[arg(long)]
    pub profile: bool,

    /// 调试日志
    #[arg(short, long)]
    pub verbose: bool,
}

/// 持久化配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 模型 ===
    pub model: String,
    pub input_size: u32,
    pub backend_conf: Option<f32>, // 后端预过滤阈值, None 时按模型类型
    pub backend_iou: Option<f32>,
    pub class_names: Option<Vec<String>>, // 模型元数据无类别名时使用
    pub execution_provider: String,       // cpu / cuda / trt
    pub device_id: i32,
    pub trt_fp16: bool,
    pub intra_threads: usize,

    // === 检测 ===
    pub min_confidence: f32,
    pub accuracy_floor: f32,
    pub accuracy_ceil: f32,
    pub label_rules: Option<Vec<LabelRule>>, // 覆盖默认规则表 (有序)

    // === 叠加层 ===
    pub font: Option<String>, // None 时不绘制标签文字
    pub label_scale: f32,
    pub stroke_width: u32,
    pub strip_opacity: f32,

    // === 环境模拟 ===
    pub preset: String,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            model: "models/yolov8s-safety.onnx".to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            backend_conf: None,
            backend_iou: None,
            class_names: None,
            execution_provider: "cpu".to_string(),
            device_id: 0,
            trt_fp16: false,
            intra_threads: 4,

            min_confidence: MIN_CONFIDENCE,
            accuracy_floor: ACCURACY_FLOOR,
            accuracy_ceil: ACCURACY_CEIL,
            label_rules: None,

            font: Some(DEFAULT_FONT.to_string()),
            label_scale: DEFAULT_LABEL_SCALE,
            stroke_width: DEFAULT_STROKE_WIDTH,
            strip_opacity: DEFAULT_STRIP_OPACITY,

            preset: EnvironmentPreset::default().name.to_string(),
        }
    }
}

impl SentinelConfig {
    /// 用户配置目录下的默认路径
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("safety-sentinel").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("sentinel.json"))
    }

    /// 从JSON文件加载配置, 缺失时写出默认配置, 解析失败时使用默认值
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("⚠️ {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(PipelineError::configuration)?;
        fs::write(path, json).map_err(io_err)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if let Some(font) = &args.font {
            self.font = Some(font.clone());
        }
        if let Some(preset) = &args.preset {
            self.preset = preset.clone();
        }
        if args.conf.is_some() {
            self.backend_conf = args.conf;
        }
        if args.iou.is_some() {
            self.backend_iou = args.iou;
        }
        if args.trt {
            self.execution_provider = "trt".to_string();
        } else if args.cuda {
            self.execution_provider = "cuda".to_string();
        }
        if args.cuda || args.trt {
            self.device_id = args.device_id;
        }
    }

    pub fn ep(&self) -> OrtEP {
        match self.execution_provider.to_lowercase().as_str() {
            "cuda" => OrtEP::CUDA(self.device_id),
            "trt" | "tensorrt" => OrtEP::Trt(self.device_id),
            "cpu" => OrtEP::CPU,
            other => {
                warn!("⚠️ 未知执行提供者 {}, 使用 CPU", other);
                OrtEP::CPU
            }
        }
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            ort: OrtConfig {
                f: self.model.clone(),
                ep: self.ep(),
                trt_fp16: self.trt_fp16,
                image_size: (Some(self.input_size), Some(self.input_size)),
                intra_threads: self.intra_threads,
            },
            conf: self.backend_conf,
            iou: self.backend_iou,
            names: self.class_names.clone(),
            profile: false,
        }
    }

    pub fn label_mapper(&self) -> LabelMapper {
        let rules = match &self.label_rules {
            Some(rules) if !rules.is_empty() => RuleTable::new(rules.clone()),
            _ => RuleTable::default(),
        };
        LabelMapper::new(rules).with_min_confidence(self.min_confidence)
    }

    pub fn aggregator(&self) -> DetectionAggregator {
        DetectionAggregator::with_accuracy_bounds(self.accuracy_floor, self.accuracy_ceil)
    }

    /// 字体加载失败时不中断, 标签条照常绘制
    pub fn renderer(&self) -> OverlayRenderer {
        let renderer = match &self.font {
            Some(font) => match OverlayRenderer::new().with_font_file(font) {
                Ok(renderer) => renderer,
                Err(e) => {
                    warn!("⚠️ 字体加载失败, 标签不显示文字: {}", e);
                    OverlayRenderer::new()
                }
            },
            None => OverlayRenderer::new(),
        };
        renderer
            .with_stroke_width(self.stroke_width)
            .with_label_scale(self.label_scale)
            .with_strip_opacity(self.strip_opacity)
    }

    /// 预设为起点, 显式给出的光照/遮挡等级覆盖预设
    pub fn effect_parameters(
        &self,
        lighting: Option<f32>,
        occlusion: Option<f32>,
    ) -> EffectParameters {
        let preset = EnvironmentPreset::find(&self.preset).unwrap_or_else(|| {
            let fallback = EnvironmentPreset::default();
            warn!("⚠️ 未知环境预设 {}, 使用 {}", self.preset, fallback.name);
            fallback
        });
        EffectParameters::new(
            lighting.unwrap_or(preset.lighting),
            occlusion.unwrap_or(preset.occlusion),
        )
    }
}
