// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 完整模型实现 (YOLOv11 共用同一输出格式)
// 包含: 模型加载、预处理 (letterbox)、推理、后处理

use anyhow::{bail, Result};
use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayView, Axis, IxDyn};
use tracing::info;

use super::{class_name, Bbox, ModelOptions, ModelType};
use crate::detection::RawObservation;
use crate::{non_max_suppression, OrtBackend, OrtEP};

/// letterbox 填充值
pub(crate) const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    model_type: ModelType,
    height: u32,
    width: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(options: &ModelOptions, model_type: ModelType) -> Result<Self> {
        let engine = OrtBackend::build(options.ort.clone())?;
        let (height, width) = (engine.height(), engine.width());

        // class names: 元数据优先, 其次配置
        let names = engine
            .names()
            .cloned()
            .or_else(|| options.names.clone())
            .unwrap_or_default();

        Ok(Self {
            engine,
            model_type,
            height,
            width,
            conf: options
                .conf
                .unwrap_or_else(|| model_type.default_conf_threshold()),
            iou: options
                .iou
                .unwrap_or_else(|| model_type.default_iou_threshold()),
            names,
            profile: options.profile,
        })
    }
}

/// 等比缩放: 返回 (比例, 新宽, 新高)
pub(crate) fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// letterbox 预处理 (左上对齐, 其余填充), 输出 [N, 3, H, W]
pub(crate) fn letterbox(xs: &[DynamicImage], width: u32, height: u32) -> Result<Array<f32, IxDyn>> {
    let mut ys = Array::ones((xs.len(), 3, height as usize, width as usize)).into_dyn();
    ys.fill(PAD_VALUE);

    let mut resizer = fr::Resizer::new();
    for (idx, x) in xs.iter().enumerate() {
        let (w0, h0) = x.dimensions();
        if w0 == 0 || h0 == 0 {
            bail!("cannot preprocess empty image {}x{}", w0, h0);
        }
        let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
        let (w_new, h_new) = ((w_new as u32).clamp(1, width), (h_new as u32).clamp(1, height));

        // 使用 fast_image_resize 缩放 (RGBA)
        let src_image =
            fr::images::Image::from_vec_u8(w0, h0, x.to_rgba8().into_raw(), fr::PixelType::U8x4)?;
        let mut dst_image = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x4);
        resizer.resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        for (i, chunk) in dst_image.buffer().chunks_exact(4).enumerate() {
            let y = i / w_new as usize;
            let x = i % w_new as usize;
            ys[[idx, 0, y, x]] = chunk[0] as f32 / 255.0;
            ys[[idx, 1, y, x]] = chunk[1] as f32 / 255.0;
            ys[[idx, 2, y, x]] = chunk[2] as f32 / 255.0;
        }
    }
    Ok(ys)
}

/// 解码单张图片的 YOLOv8 预测
///
/// `preds`: [4 + nc, N], 框为输入尺寸下的 cxcywh。
pub(crate) fn decode_predictions(
    preds: ArrayView<f32, IxDyn>,
    ratio: f32,
    width_original: f32,
    height_original: f32,
    conf: f32,
    iou: f32,
) -> Vec<Bbox> {
    const CXYWH_OFFSET: usize = 4;
    let mut data: Vec<Bbox> = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let clss = pred.slice(s![CXYWH_OFFSET..]);

        let best = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max });
        let (id, &confidence) = match best {
            Some(best) => best,
            None => continue,
        };
        if confidence < conf {
            continue;
        }

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        // 两端分别裁剪到图像范围内
        let x1 = (cx - w / 2.).clamp(0.0, width_original);
        let y1 = (cy - h / 2.).clamp(0.0, height_original);
        let x2 = (cx + w / 2.).clamp(0.0, width_original);
        let y2 = (cy + h / 2.).clamp(0.0, height_original);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        data.push(Bbox::new(x1, y1, x2 - x1, y2 - y1, id, confidence));
    }

    non_max_suppression(&mut data, iou);
    data
}

// 实现统一的 Model trait
impl super::Model for YOLOv8 {
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
            Some(p) => p,
            None => bail!("model produced no outputs"),
        };
        if preds.ndim() != 3 {
            bail!("unexpected output shape {:?}", preds.shape());
        }
        // [B, 4+nc, N] 或转置的 [B, N, 4+nc]
        let preds = if preds.shape()[1] > preds.shape()[2] {
            preds.view().permuted_axes(IxDyn(&[0, 2, 1]))
        } else {
            preds.view()
        };
        if preds.shape()[1] <= 4 {
            bail!("output has no class scores: {:?}", preds.shape());
        }

        let mut ys = Vec::new();
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let x0 = match xs0.get(idx) {
                Some(x0) => x0,
                None => break,
            };
            let width_original = x0.width() as f32;
            let height_original = x0.height() as f32;
            let (ratio, _, _) = scale_wh(
                width_original,
                height_original,
                self.width as f32,
                self.height as f32,
            );

            let boxes = decode_predictions(
                anchor,
                ratio,
                width_original,
                height_original,
                self.conf,
                self.iou,
            );
            ys.push(
                boxes
                    .iter()
                    .map(|b| {
                        RawObservation::new(
                            class_name(&self.names, b.id()),
                            b.confidence(),
                            b.to_model_space(width_original, height_original),
                        )
                    })
                    .collect(),
            );
        }
        Ok(ys)
    }

    fn model_type(&self) -> ModelType {
        self.model_type
    }

    fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Model: {:?}{}\n\
            > EP: {:?} {}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, conf: {}, iou: {}\n",
            self.model_type,
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::from(""),
            },
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.height,
            self.width,
            self.names.len(),
            self.conf,
            self.iou,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_scale_wh() {
        let (r, w, h) = scale_wh(1280.0, 720.0, 640.0, 640.0);
        assert!((r - 0.5).abs() < 1e-6);
        assert_eq!((w, h), (640.0, 360.0));
    }

    #[test]
    fn test_letterbox_pads_bottom() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 32, Rgba([255, 0, 0, 255])));
        let ys = letterbox(&[img], 32, 32).unwrap();
        assert_eq!(ys.shape(), &[1, 3, 32, 32]);
        // 上半部分为图像内容
        assert!((ys[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(ys[[0, 1, 0, 0]].abs() < 1e-6);
        // 下半部分为填充
        assert!((ys[[0, 0, 31, 0]] - PAD_VALUE).abs() < 1e-6);
    }

    #[test]
    fn test_decode_predictions_threshold_and_nms() {
        // 4 + 2 类, 3 个候选
        let mut preds = Array::zeros((6, 3)).into_dyn();
        // 候选0: 中心(50,50) 20x20, 类1 0.9
        for (r, v) in [50.0, 50.0, 20.0, 20.0, 0.1, 0.9].iter().enumerate() {
            preds[[r, 0]] = *v;
        }
        // 候选1: 与候选0高度重叠, 类1 0.8 -> NMS抑制
        for (r, v) in [51.0, 50.0, 20.0, 20.0, 0.1, 0.8].iter().enumerate() {
            preds[[r, 1]] = *v;
        }
        // 候选2: 置信度过低
        for (r, v) in [10.0, 10.0, 5.0, 5.0, 0.05, 0.1].iter().enumerate() {
            preds[[r, 2]] = *v;
        }
        let boxes = decode_predictions(preds.view(), 1.0, 100.0, 100.0, 0.25, 0.45);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].id(), 1);
        assert!((boxes[0].xmin() - 40.0).abs() < 1e-4);
        assert!((boxes[0].confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_predictions_clips_edge_boxes() {
        let mut preds = Array::zeros((5, 2)).into_dyn();
        // 跨越左边界: cx=10 w=40 -> [0, 30]
        for (r, v) in [10.0, 50.0, 40.0, 20.0, 0.9].iter().enumerate() {
            preds[[r, 0]] = *v;
        }
        // 跨越下边界: cy=95 h=20 -> [85, 100]
        for (r, v) in [70.0, 95.0, 10.0, 20.0, 0.8].iter().enumerate() {
            preds[[r, 1]] = *v;
        }
        let mut boxes = decode_predictions(preds.view(), 1.0, 100.0, 100.0, 0.25, 0.45);
        boxes.sort_by(|a, b| a.xmin().total_cmp(&b.xmin()));
        assert_eq!(boxes.len(), 2);

        assert!(boxes[0].xmin().abs() < 1e-4);
        assert!((boxes[0].xmax() - 30.0).abs() < 1e-4);
        assert!((boxes[0].width() - 30.0).abs() < 1e-4);
        assert!((boxes[0].ymin() - 40.0).abs() < 1e-4);

        assert!((boxes[1].ymin() - 85.0).abs() < 1e-4);
        assert!((boxes[1].ymax() - 100.0).abs() < 1e-4);
        assert!((boxes[1].height() - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_predictions_drops_boxes_outside_image() {
        let mut preds = Array::zeros((5, 1)).into_dyn();
        // 完全位于图像左侧
        for (r, v) in [-30.0, 50.0, 20.0, 20.0, 0.9].iter().enumerate() {
            preds[[r, 0]] = *v;
        }
        let boxes = decode_predictions(preds.view(), 1.0, 100.0, 100.0, 0.25, 0.45);
        assert!(boxes.is_empty());
    }
}
