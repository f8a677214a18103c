// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 叠加层渲染 (Overlay Renderer)
// 检测框 + 标签条 "{category}: {pct}%", 输出新图像, 不修改输入

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use tracing::{info, warn};

use crate::detection::{Category, Detection};
use crate::error::{PipelineError, Result};

pub const DEFAULT_STROKE_WIDTH: u32 = 2;
pub const DEFAULT_LABEL_SCALE: f32 = 18.0;
pub const DEFAULT_STRIP_OPACITY: f32 = 0.7;
/// 随仓库分发的标签字体 (相对于工作目录)
pub const DEFAULT_FONT: &str = "assets/font/DejaVuSans.ttf";

/// 标签条内边距 (像素)
const STRIP_PADDING: u32 = 3;

/// 叠加层渲染器
///
/// 字体可选: 未配置字体时仍绘制框和标签条, 只是不绘制文字。
pub struct OverlayRenderer {
    font: Option<FontVec>,
    stroke_width: u32,
    label_scale: f32,
    strip_opacity: f32,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self {
            font: None,
            stroke_width: DEFAULT_STROKE_WIDTH,
            label_scale: DEFAULT_LABEL_SCALE,
            strip_opacity: DEFAULT_STRIP_OPACITY,
        }
    }
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载 TTF/OTF 字体, TTC 字体集取第一个字体
    pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec_and_index(bytes, 0).map_err(|e| {
            PipelineError::configuration(format!("{}: {}", path.display(), e))
        })?;
        info!("✅ 字体加载成功: {}", path.display());
        self.font = Some(font);
        Ok(self)
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_stroke_width(mut self, stroke_width: u32) -> Self {
        self.stroke_width = stroke_width.max(1);
        self
    }

    pub fn with_label_scale(mut self, label_scale: f32) -> Self {
        if label_scale.is_finite() && label_scale > 0.0 {
            self.label_scale = label_scale;
        }
        self
    }

    pub fn with_strip_opacity(mut self, opacity: f32) -> Self {
        if opacity.is_finite() {
            self.strip_opacity = opacity.clamp(0.0, 1.0);
        }
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 绘制所有检测
    ///
    /// 检测框为显示坐标 (归一化、左上原点)。空检测列表返回与输入相同的图像。
    pub fn render(&self, base: &RgbaImage, detections: &[Detection]) -> Result<RgbaImage> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::render(format!(
                "cannot draw on empty canvas {}x{}",
                width, height
            )));
        }

        let mut canvas = base.clone();
        for det in detections {
            let bbox = det.bbox();
            if !bbox.is_finite() {
                return Err(PipelineError::render(format!(
                    "non-finite box for {}: {:?}",
                    det.name(),
                    bbox
                )));
            }
            let (x1, y1, x2, y2) = bbox.clamped().to_pixels(width, height);
            let rect = pixel_rect(x1, y1, x2, y2, width, height);
            let color = rgba(det.category(), 255);

            for i in 0..self.stroke_width {
                let inset = i as i32;
                let w = rect.width() as i32 - 2 * inset;
                let h = rect.height() as i32 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    PixelRect::at(rect.left() + inset, rect.top() + inset)
                        .of_size(w as u32, h as u32),
                    color,
                );
            }

            self.draw_label(&mut canvas, det, rect);
        }
        Ok(canvas)
    }

    /// 绘制失败时回退为原始图像
    pub fn render_or_base(&self, base: &RgbaImage, detections: &[Detection]) -> RgbaImage {
        match self.render(base, detections) {
            Ok(image) => image,
            Err(e) => {
                warn!("⚠️ 叠加层绘制失败, 显示原始图像: {}", e);
                base.clone()
            }
        }
    }

    fn draw_label(&self, canvas: &mut RgbaImage, det: &Detection, rect: PixelRect) {
        let (width, height) = canvas.dimensions();
        let text = label_text(det);
        let scale = PxScale::from(self.label_scale);

        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, &text),
            // 无字体时按字号估算标签条尺寸
            None => (
                (text.chars().count() as f32 * self.label_scale * 0.55).ceil() as u32,
                self.label_scale.ceil() as u32,
            ),
        };
        let strip_w = (text_w + 2 * STRIP_PADDING).min(width);
        let strip_h = (text_h + 2 * STRIP_PADDING).min(height);

        // 优先放在框上方, 空间不足时放在框内顶部; 始终完整落在画布内
        let top = rect.top() - strip_h as i32;
        let y = if top >= 0 { top } else { rect.top() };
        let y = y.clamp(0, (height - strip_h) as i32) as u32;
        let x = rect.left().clamp(0, (width - strip_w) as i32) as u32;

        let strip_color = rgba(det.category(), 255);
        blend_rect(canvas, x, y, strip_w, strip_h, strip_color, self.strip_opacity);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                text_color(det.category()),
                (x + STRIP_PADDING) as i32,
                (y + STRIP_PADDING) as i32,
                scale,
                font,
                &text,
            );
        }
    }
}

/// 标签文本: "{category}: {pct}%"
pub fn label_text(det: &Detection) -> String {
    format!("{}: {}%", det.category(), det.confidence_percent())
}

fn rgba(category: Category, alpha: u8) -> Rgba<u8> {
    let (r, g, b) = category.color();
    Rgba([r, g, b, alpha])
}

/// 浅色背景用黑字, 深色背景用白字
fn text_color(category: Category) -> Rgba<u8> {
    let (r, g, b) = category.color();
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgba([0, 0, 0, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}

/// 像素坐标 → 画布内的整数矩形 (至少 1x1)
fn pixel_rect(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> PixelRect {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let left = x1.clamp(0.0, max_x).round();
    let top = y1.clamp(0.0, max_y).round();
    let right = x2.clamp(0.0, width as f32).round();
    let bottom = y2.clamp(0.0, height as f32).round();
    let w = (right - left).max(1.0) as u32;
    let h = (bottom - top).max(1.0) as u32;
    PixelRect::at(left as i32, top as i32).of_size(w, h)
}

/// 半透明填充
fn blend_rect(
    canvas: &mut RgbaImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Rgba<u8>,
    opacity: f32,
) {
    let (cw, ch) = canvas.dimensions();
    for py in y..(y + h).min(ch) {
        for px in x..(x + w).min(cw) {
            let dst = canvas.get_pixel_mut(px, py);
            for c in 0..3 {
                let v = color.0[c] as f32 * opacity + dst.0[c] as f32 * (1.0 - opacity);
                dst.0[c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
