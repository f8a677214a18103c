// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端
// 负责: 会话构建 (执行提供者选择)、模型元数据读取、张量推理

use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use regex::Regex;
use tracing::{debug, info};

/// 默认推理输入尺寸
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// 执行提供者 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 后端构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    pub image_size: (Option<u32>, Option<u32>), // (height, width)
    pub intra_threads: usize,
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    height: u32,
    width: u32,
    names: Option<Vec<String>>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        if !Path::new(&args.f).is_file() {
            bail!("model file not found: {}", args.f);
        }

        let eps: Vec<ExecutionProviderDispatch> = match args.ep {
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
            OrtEP::CUDA(device_id) => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::Trt(device_id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .with_fp16(args.trt_fp16)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
        };

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(args.intra_threads.max(1))
            .map_err(ort_error)?
            .with_execution_providers(eps)
            .map_err(ort_error)?
            .commit_from_file(&args.f)
            .map_err(ort_error)
            .with_context(|| format!("failed to load model {}", args.f))?;

        let height = args.image_size.0.unwrap_or(DEFAULT_INPUT_SIZE);
        let width = args.image_size.1.unwrap_or(DEFAULT_INPUT_SIZE);

        let mut backend = Self {
            session,
            ep: args.ep,
            height,
            width,
            names: None,
        };
        backend.names = backend
            .fetch_from_metadata("names")
            .map(|raw| parse_names(&raw));

        info!(
            "✅ ONNX会话已创建: {} (EP: {:?}, 输入: {}x{})",
            args.f, backend.ep, width, height
        );
        Ok(backend)
    }

    /// 执行一次前向推理, 返回所有 f32 输出
    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = std::time::Instant::now();
        let input = Tensor::from_array(xs).map_err(ort_error)?;
        let outputs = self.session.run(ort::inputs![input]).map_err(ort_error)?;
        if profile {
            debug!("[ORT Inference]: {:?}", t.elapsed());
        }

        let mut ys = Vec::new();
        for (_, value) in outputs.iter() {
            let y = value.try_extract_array::<f32>().map_err(ort_error)?.into_owned();
            ys.push(y);
        }
        Ok(ys)
    }

    /// 从 onnx 模型文件的自定义元数据中读取字段
    pub fn fetch_from_metadata(&self, key: &str) -> Option<String> {
        match self.session.metadata() {
            Err(_) => None,
            Ok(metadata) => match metadata.custom(key) {
                Err(_) => None,
                Ok(value) => value,
            },
        }
    }

    pub fn names(&self) -> Option<&Vec<String>> {
        self.names.as_ref()
    }

    pub fn author(&self) -> Option<String> {
        self.fetch_from_metadata("author")
    }

    pub fn version(&self) -> Option<String> {
        self.fetch_from_metadata("version")
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

fn ort_error(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("ort: {}", e)
}

/// 解析元数据中的类别名
///
/// 格式: `{0: 'person', 1: 'fire extinguisher', 2: 'oxygen-tank', ...}`
pub fn parse_names(raw: &str) -> Vec<String> {
    let re = match Regex::new(r#"(['"])([-()\w '"]+?)(['"])"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(raw)
        .map(|c| c.extract())
        .map(|(_, [_, name, _])| name.to_string())
        .collect()
}
