// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 环境模拟流水线: 效果 → 推理 → 标签映射 → 叠加层
// 无状态: 不写入聚合器, 不产生告警

use image::RgbaImage;
use tracing::debug;

use crate::detection::{Detection, LabelMapper, RawObservation};
use crate::effects::{self, EffectParameters};
use crate::error::Result;
use crate::models::InferenceAdapter;
use crate::renderer::OverlayRenderer;

/// 一次模拟的全部产物
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    /// 施加效果后的图像 (推理输入)
    pub composed: RgbaImage,
    /// 后端原始输出
    pub observations: Vec<RawObservation>,
    /// 过滤后的检测 (阈值作用于合成后图像的推理结果)
    pub detections: Vec<Detection>,
    pub overlay: RgbaImage,
}

pub struct Simulator {
    adapter: Box<dyn InferenceAdapter>,
    mapper: LabelMapper,
    renderer: OverlayRenderer,
}

impl Simulator {
    pub fn new(
        adapter: Box<dyn InferenceAdapter>,
        mapper: LabelMapper,
        renderer: OverlayRenderer,
    ) -> Self {
        Self {
            adapter,
            mapper,
            renderer,
        }
    }

    pub fn mapper(&self) -> &LabelMapper {
        &self.mapper
    }

    /// 在合成后的图像上执行检测
    ///
    /// 因变暗而跌破阈值的观测会被丢弃。
    /// 推理或解码失败直接返回错误, 绘制失败回退为合成图像。
    ///
    /// 推理在调用线程上同步执行, 且没有过期结果保护:
    /// 不要在交互/UI 线程上调用, 交互场景使用 `DetectionSession`。
    pub fn run(
        &mut self,
        image: &RgbaImage,
        params: EffectParameters,
    ) -> Result<SimulationOutcome> {
        let composed = effects::apply(image, params);
        let observations = self.adapter.infer(&composed)?;
        let detections = self.mapper.classify_pass(&observations);
        debug!(
            "模拟: lighting={:.2} occlusion={:.2} | 原始{}个 → 检测{}个",
            params.lighting,
            params.occlusion,
            observations.len(),
            detections.len()
        );
        let overlay = self.renderer.render_or_base(&composed, &detections);
        Ok(SimulationOutcome {
            composed,
            observations,
            detections,
            overlay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Rect;
    use image::Rgba;

    /// 置信度与图像平均亮度成正比
    struct BrightnessProbe;

    impl InferenceAdapter for BrightnessProbe {
        fn name(&self) -> &str {
            "brightness"
        }

        fn infer(&mut self, image: &RgbaImage) -> Result<Vec<RawObservation>> {
            let sum: u64 = image.pixels().map(|p| p.0[0] as u64).sum();
            let mean = sum as f32 / (image.width() * image.height()) as f32 / 255.0;
            Ok(vec![RawObservation::new(
                "toolbox",
                mean,
                Rect::new(0.25, 0.25, 0.5, 0.5),
            )])
        }
    }

    fn simulator() -> Simulator {
        Simulator::new(
            Box::new(BrightnessProbe),
            LabelMapper::default(),
            OverlayRenderer::new(),
        )
    }

    #[test]
    fn test_identity_params_keep_detection() {
        let base = RgbaImage::from_pixel(32, 32, Rgba([153, 153, 153, 255]));
        let mut sim = simulator();
        let out = sim.run(&base, EffectParameters::identity()).unwrap();
        assert_eq!(out.composed, base);
        assert_eq!(out.detections.len(), 1);
    }

    #[test]
    fn test_threshold_applies_after_darkening() {
        // 原图置信度 0.6, 变暗后约 0.3
        let base = RgbaImage::from_pixel(32, 32, Rgba([153, 153, 153, 255]));
        let mut sim = simulator();
        let out = sim.run(&base, EffectParameters::new(0.0, 0.0)).unwrap();
        assert_eq!(out.observations.len(), 1);
        assert!(out.observations[0].confidence < 0.5);
        assert!(out.detections.is_empty());
        assert_eq!(out.overlay, out.composed);
    }
}
