// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 环境模拟效果链 (Image Effects Chain)
// 纯函数、无状态: 光照调整 → 遮挡暗角, 顺序固定不可交换

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// 效果参数, 两个分量均 ∈ [0,1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParameters {
    pub lighting: f32,
    pub occlusion: f32,
}

impl EffectParameters {
    pub fn new(lighting: f32, occlusion: f32) -> Self {
        Self {
            lighting: clamp_level(lighting),
            occlusion: clamp_level(occlusion),
        }
    }

    /// 恒等参数: 不改变任何像素
    pub fn identity() -> Self {
        Self::new(0.5, 0.0)
    }
}

impl Default for EffectParameters {
    fn default() -> Self {
        let p = EnvironmentPreset::default();
        Self::new(p.lighting, p.occlusion)
    }
}

impl From<EnvironmentPreset> for EffectParameters {
    fn from(p: EnvironmentPreset) -> Self {
        Self::new(p.lighting, p.occlusion)
    }
}

/// 环境预设: 命名的 (光照, 遮挡) 常量, 仅用作模拟控件初始值
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentPreset {
    pub name: &'static str,
    pub lighting: f32,
    pub occlusion: f32,
}

pub const PRESETS: [EnvironmentPreset; 4] = [
    EnvironmentPreset {
        name: "Normal Station",
        lighting: 0.8,
        occlusion: 0.0,
    },
    EnvironmentPreset {
        name: "Maintenance Mode",
        lighting: 0.6,
        occlusion: 0.4,
    },
    EnvironmentPreset {
        name: "Emergency Power",
        lighting: 0.3,
        occlusion: 0.2,
    },
    EnvironmentPreset {
        name: "Debris Field",
        lighting: 0.7,
        occlusion: 0.7,
    },
];

impl EnvironmentPreset {
    pub fn all() -> &'static [EnvironmentPreset] {
        &PRESETS
    }

    /// 按名称查找 (忽略大小写与首尾空白)
    pub fn find(name: &str) -> Option<EnvironmentPreset> {
        let name = name.trim();
        PRESETS
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .copied()
    }

    pub fn parameters(&self) -> EffectParameters {
        EffectParameters::from(*self)
    }
}

impl Default for EnvironmentPreset {
    fn default() -> Self {
        PRESETS[0]
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// 光照调整
///
/// `exposure = (level - 0.5) * 2`, 各颜色通道乘以 `2^exposure` 后裁剪到 [0,255];
/// alpha 不变。`level = 0.5` 时返回逐像素相同的图像。
pub fn adjust_lighting(image: &RgbaImage, level: f32) -> RgbaImage {
    let level = clamp_level(level);
    let exposure = (level - 0.5) * 2.0;
    if exposure == 0.0 {
        return image.clone();
    }
    let factor = 2f32.powf(exposure);

    let mut out = image.clone();
    for px in out.pixels_mut() {
        for channel in px.0.iter_mut().take(3) {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// 遮挡暗角的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VignetteGeometry {
    pub center: (f32, f32),
    pub inner_radius: f32,
    pub outer_radius: f32,
    /// 外半径处 (及以外) 的黑色不透明度
    pub max_alpha: f32,
}

impl VignetteGeometry {
    /// `outer = 0.8 * min(w, h)`, `inner = outer * (1 - 0.8 * level)`
    pub fn for_image(width: u32, height: u32, level: f32) -> Self {
        let level = clamp_level(level);
        let outer_radius = 0.8 * width.min(height) as f32;
        let inner_radius = outer_radius * (1.0 - 0.8 * level);
        Self {
            center: (width as f32 / 2.0, height as f32 / 2.0),
            inner_radius,
            outer_radius,
            max_alpha: level,
        }
    }

    /// 距中心 `distance` 处的黑色不透明度: 内半径内为0, 线性升至外半径处的 `max_alpha`
    pub fn alpha_at(&self, distance: f32) -> f32 {
        if distance <= self.inner_radius {
            0.0
        } else if distance >= self.outer_radius {
            self.max_alpha
        } else {
            let span = self.outer_radius - self.inner_radius;
            self.max_alpha * (distance - self.inner_radius) / span
        }
    }
}

/// 遮挡模拟: 以图像中心为圆心的径向暗角
///
/// `level <= 0` 时返回逐像素相同的图像。
pub fn apply_occlusion(image: &RgbaImage, level: f32) -> RgbaImage {
    if !(level > 0.0) {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let geometry = VignetteGeometry::for_image(width, height, level);
    let (cx, cy) = geometry.center;

    let mut out = image.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        // 以像素中心计算距离
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let alpha = geometry.alpha_at((dx * dx + dy * dy).sqrt());
        if alpha <= 0.0 {
            continue;
        }
        let keep = 1.0 - alpha;
        let Rgba([r, g, b, a]) = *px;
        *px = Rgba([
            (r as f32 * keep).round() as u8,
            (g as f32 * keep).round() as u8,
            (b as f32 * keep).round() as u8,
            a,
        ]);
    }
    out
}

/// 组合效果: 先光照, 后遮挡
pub fn compose_effects(image: &RgbaImage, lighting: f32, occlusion: f32) -> RgbaImage {
    apply_occlusion(&adjust_lighting(image, lighting), occlusion)
}

/// 按参数组合效果
pub fn apply(image: &RgbaImage, params: EffectParameters) -> RgbaImage {
    compose_effects(image, params.lighting, params.occlusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_image(w: u32, h: u32, seed: u64) -> RgbaImage {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        RgbaImage::from_fn(w, h, |_, _| Rgba([rng.gen(), rng.gen(), rng.gen(), rng.gen()]))
    }

    #[test]
    fn test_lighting_half_is_identity() {
        let img = random_image(37, 23, 1);
        assert_eq!(adjust_lighting(&img, 0.5), img);
    }

    #[test]
    fn test_occlusion_zero_is_identity() {
        let img = random_image(40, 30, 2);
        assert_eq!(apply_occlusion(&img, 0.0), img);
        assert_eq!(apply_occlusion(&img, -0.3), img);
    }

    #[test]
    fn test_compose_identity() {
        let img = random_image(19, 41, 3);
        assert_eq!(compose_effects(&img, 0.5, 0.0), img);
        assert_eq!(apply(&img, EffectParameters::identity()), img);
    }

    #[test]
    fn test_lighting_extremes() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([64, 100, 200, 128]));
        let bright = adjust_lighting(&img, 1.0);
        assert_eq!(bright.get_pixel(0, 0).0, [128, 200, 255, 128]);
        let dark = adjust_lighting(&img, 0.0);
        assert_eq!(dark.get_pixel(0, 0).0, [32, 50, 100, 128]);
    }

    #[test]
    fn test_vignette_geometry_maintenance_mode() {
        let preset = EnvironmentPreset::find("maintenance mode").unwrap();
        assert_eq!((preset.lighting, preset.occlusion), (0.6, 0.4));
        let g = VignetteGeometry::for_image(400, 300, preset.occlusion);
        assert!((g.outer_radius - 240.0).abs() < 1e-4);
        assert!((g.inner_radius - 240.0 * 0.68).abs() < 1e-3);
        assert_eq!(g.center, (200.0, 150.0));
        assert_eq!(g.alpha_at(0.0), 0.0);
        assert!((g.alpha_at(1000.0) - 0.4).abs() < 1e-6);
        let mid = (g.inner_radius + g.outer_radius) / 2.0;
        assert!((g.alpha_at(mid) - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_occlusion_darkens_corners_not_center() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([200, 200, 200, 255]));
        let out = apply_occlusion(&img, 1.0);
        assert_eq!(out.get_pixel(50, 50).0, [200, 200, 200, 255]);
        let corner = out.get_pixel(0, 0).0;
        assert!(corner[0] < 200);
        assert_eq!(corner[3], 255);
    }

    #[test]
    fn test_order_is_not_commutative() {
        // 先暗角后提亮时, 饱和裁剪会抹平暗角
        let img = RgbaImage::from_pixel(50, 50, Rgba([250, 250, 250, 255]));
        let lighting_first = compose_effects(&img, 1.0, 0.5);
        let occlusion_first = adjust_lighting(&apply_occlusion(&img, 0.5), 1.0);
        assert_ne!(lighting_first, occlusion_first);
    }

    #[test]
    fn test_parameters_clamped() {
        let p = EffectParameters::new(1.7, -0.2);
        assert_eq!((p.lighting, p.occlusion), (1.0, 0.0));
        assert_eq!(EffectParameters::default(), EffectParameters::new(0.8, 0.0));
        assert!(EnvironmentPreset::find("unknown").is_none());
    }
}
