// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv10 模型实现 (NMS-Free端到端检测)
// 特性: 无需NMS后处理, 直接输出最终检测框 [B, N, 6] = x1, y1, x2, y2, score, class

use anyhow::{bail, Result};
use image::DynamicImage;
use ndarray::{Array, ArrayView, Axis, IxDyn};
use tracing::info;

use super::yolov8::{letterbox, scale_wh};
use super::{class_name, Bbox, ModelOptions, ModelType};
use crate::detection::RawObservation;
use crate::OrtBackend;

/// YOLOv10 模型结构
pub struct YOLOv10 {
    engine: OrtBackend,
    height: u32,
    width: u32,
    conf: f32,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv10 {
    /// 从配置创建 YOLOv10 模型
    pub fn new(options: &ModelOptions) -> Result<Self> {
        let engine = OrtBackend::build(options.ort.clone())?;
        let (height, width) = (engine.height(), engine.width());
        let names = engine
            .names()
            .cloned()
            .or_else(|| options.names.clone())
            .unwrap_or_default();

        Ok(Self {
            engine,
            height,
            width,
            conf: options
                .conf
                .unwrap_or_else(|| ModelType::YOLOv10.default_conf_threshold()),
            names,
            profile: options.profile,
        })
    }
}

/// 解码单张图片的端到端输出 `[N, 6]`
pub(crate) fn decode_end_to_end(
    preds: ArrayView<f32, IxDyn>,
    ratio: f32,
    width_original: f32,
    height_original: f32,
    conf: f32,
) -> Vec<Bbox> {
    let mut boxes = Vec::new();
    for row in preds.axis_iter(Axis(0)) {
        if row.len() < 6 {
            continue;
        }
        let score = row[4];
        if !(score >= conf) {
            continue;
        }
        let x1 = (row[0] / ratio).clamp(0.0, width_original);
        let y1 = (row[1] / ratio).clamp(0.0, height_original);
        let x2 = (row[2] / ratio).clamp(0.0, width_original);
        let y2 = (row[3] / ratio).clamp(0.0, height_original);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        boxes.push(Bbox::new(
            x1,
            y1,
            x2 - x1,
            y2 - y1,
            row[5].max(0.0) as usize,
            score,
        ));
    }
    boxes
}

impl super::Model for YOLOv10 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        Ok(vec![letterbox(images, self.width, self.height)?])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let profile = profile || self.profile;
        let mut ys = Vec::new();
        for x in xs {
            ys.extend(self.engine.run(x, profile)?);
        }
        Ok(ys)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<RawObservation>>> {
        let preds = match xs.first() {
            Some(p) if p.ndim() == 3 => p,
            Some(p) => bail!("unexpected YOLOv10 output shape {:?}", p.shape()),
            None => bail!("model produced no outputs"),
        };

        let mut ys = Vec::new();
        for (idx, batch) in preds.axis_iter(Axis(0)).enumerate() {
            let x0 = match xs0.get(idx) {
                Some(x0) => x0,
                None => break,
            };
            let (w0, h0) = (x0.width() as f32, x0.height() as f32);
            let (ratio, _, _) = scale_wh(w0, h0, self.width as f32, self.height as f32);
            let boxes = decode_end_to_end(batch, ratio, w0, h0, self.conf);
            ys.push(
                boxes
                    .iter()
                    .map(|b| {
                        RawObservation::new(
                            class_name(&self.names, b.id()),
                            b.confidence(),
                            b.to_model_space(w0, h0),
                        )
                    })
                    .collect(),
            );
        }
        Ok(ys)
    }

    fn model_type(&self) -> ModelType {
        ModelType::YOLOv10
    }

    fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Model: YOLOv10 (NMS-Free)\n\
            > EP: {:?}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, conf: {}\n",
            self.engine.ep(),
            self.height,
            self.width,
            self.names.len(),
            self.conf
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_end_to_end() {
        let preds = Array::from_shape_vec(
            (3, 6),
            vec![
                10.0, 20.0, 50.0, 60.0, 0.9, 2.0, // 有效
                0.0, 0.0, 5.0, 5.0, 0.1, 1.0, // 低分
                30.0, 30.0, 30.0, 40.0, 0.8, 0.0, // 零宽
            ],
        )
        .unwrap()
        .into_dyn();
        let boxes = decode_end_to_end(preds.view(), 0.5, 200.0, 200.0, 0.2);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].id(), 2);
        assert!((boxes[0].xmin() - 20.0).abs() < 1e-5);
        assert!((boxes[0].width() - 80.0).abs() < 1e-5);
    }
}
