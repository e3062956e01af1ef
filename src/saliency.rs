use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};

use crate::error::{Error, Result};

/// 生成显著性热力图并叠加到原图上
pub trait SaliencyProvider: Send + Sync {
    /// 输出图片的尺寸 (宽, 高)，输入会先缩放到该尺寸
    fn input_size(&self) -> (u32, u32);

    /// `target_class` 为空时由实现自行选择得分最高的类别
    fn explain(&self, image: &DynamicImage, target_class: Option<usize>) -> Result<RgbImage>;
}

/// 基于 Sobel 梯度的显著性
///
/// 类别对应梯度方向：0 为水平梯度，1 为垂直梯度，类别得分为该方向的梯度能量
#[derive(Debug, Clone)]
pub struct GradientSaliency {
    size: u32,
}

impl GradientSaliency {
    pub const NUM_CLASSES: usize = 2;

    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl Default for GradientSaliency {
    fn default() -> Self {
        Self::new(224)
    }
}

impl SaliencyProvider for GradientSaliency {
    fn input_size(&self) -> (u32, u32) {
        (self.size, self.size)
    }

    fn explain(&self, image: &DynamicImage, target_class: Option<usize>) -> Result<RgbImage> {
        if let Some(class) = target_class.filter(|&c| c >= Self::NUM_CLASSES) {
            return Err(Error::Provider(format!(
                "类别 {class} 超出范围，共 {} 个类别",
                Self::NUM_CLASSES
            )));
        }

        let resized = image.resize_exact(self.size, self.size, FilterType::Lanczos3);
        let rgb = resized.to_rgb8();
        let (gx, gy) = sobel(&resized.to_luma8());

        let class = target_class.unwrap_or_else(|| {
            let energy = |g: &[f32]| g.iter().map(|v| v * v).sum::<f32>();
            if energy(&gy) > energy(&gx) { 1 } else { 0 }
        });
        let mut cam: Vec<f32> = match class {
            0 => gx,
            _ => gy,
        };
        cam.iter_mut().for_each(|v| *v = v.abs());
        let max = cam.iter().copied().fold(0f32, f32::max);
        if max > 0. {
            cam.iter_mut().for_each(|v| *v /= max);
        }

        Ok(overlay(&rgb, &cam, 0.5))
    }
}

/// 计算水平和垂直方向的 Sobel 梯度，边缘像素按最近邻延拓
fn sobel(gray: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = gray.dimensions();
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        gray.get_pixel(x, y)[0] as f32 / 255.
    };

    let mut gx = Vec::with_capacity((w * h) as usize);
    let mut gy = Vec::with_capacity((w * h) as usize);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            gx.push(
                at(x + 1, y - 1) + 2. * at(x + 1, y) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2. * at(x - 1, y)
                    - at(x - 1, y + 1),
            );
            gy.push(
                at(x - 1, y + 1) + 2. * at(x, y + 1) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2. * at(x, y - 1)
                    - at(x + 1, y - 1),
            );
        }
    }
    (gx, gy)
}

/// jet 色表，输入范围 [0, 1]
fn jet(v: f32) -> [f32; 3] {
    let c = |offset: f32| (1.5 - (4. * v - offset).abs()).clamp(0., 1.);
    [c(3.), c(2.), c(1.)]
}

/// 将 [0, 1] 范围的热力图着色后与原图混合，结果按最大值重新拉伸到 255
///
/// 参数：
/// - image: 原图，尺寸须与热力图一致
/// - cam: 按行展开的热力图
/// - image_weight: 原图所占权重
pub fn overlay(image: &RgbImage, cam: &[f32], image_weight: f32) -> RgbImage {
    let mut blended: Vec<[f32; 3]> = image
        .pixels()
        .zip(cam)
        .map(|(p, &v)| {
            let heat = jet(v);
            let mut out = [0f32; 3];
            for c in 0..3 {
                out[c] = (1. - image_weight) * heat[c] + image_weight * p[c] as f32 / 255.;
            }
            out
        })
        .collect();

    let max = blended.iter().flatten().copied().fold(0f32, f32::max);
    if max > 0. {
        blended.iter_mut().flatten().for_each(|v| *v /= max);
    }

    let (w, h) = image.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b] = blended[(y * w + x) as usize];
        Rgb([(r * 255.) as u8, (g * 255.) as u8, (b * 255.) as u8])
    })
}
