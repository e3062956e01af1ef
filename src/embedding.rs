use image::DynamicImage;
use image::imageops::FilterType;

use crate::error::{Error, Result};

/// 把图片转换为固定长度、L2 归一化的特征向量
///
/// 相同输入必须得到相同输出，输出长度恒为 [`EmbeddingProvider::dimension`]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    fn extract(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// 缩略图特征：将灰度缩略图展开后归一化
///
/// 仅依赖像素，不需要模型文件，适合作为默认实现和测试使用
#[derive(Debug, Clone)]
pub struct ThumbnailEmbedder {
    width: u32,
    height: u32,
}

impl ThumbnailEmbedder {
    pub const WIDTH: u32 = 32;

    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 || dimension % Self::WIDTH as usize != 0 {
            return Err(Error::DimensionMismatch {
                expected: dimension.next_multiple_of(Self::WIDTH as usize).max(32),
                actual: dimension,
            });
        }
        Ok(Self { width: Self::WIDTH, height: (dimension / Self::WIDTH as usize) as u32 })
    }
}

impl EmbeddingProvider for ThumbnailEmbedder {
    fn dimension(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn extract(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Provider("图片尺寸为 0".to_owned()));
        }
        let thumb = image.resize_exact(self.width, self.height, FilterType::Triangle).to_luma8();
        let mut feature: Vec<f32> = thumb.as_raw().iter().map(|&p| p as f32 / 255.).collect();
        l2_normalize(&mut feature);
        Ok(feature)
    }
}

/// 原地 L2 归一化，零向量保持不变
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn output_is_unit_length() {
        let img = RgbImage::from_fn(50, 40, |x, y| Rgb([(x * 5) as u8, (y * 6) as u8, 128]));
        let embedder = ThumbnailEmbedder::new(64).unwrap();
        let v = embedder.extract(&DynamicImage::ImageRgb8(img)).unwrap();
        assert_eq!(v.len(), 64);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.).abs() < 1e-5);
    }

    #[test]
    fn rejects_unaligned_dimension() {
        assert!(ThumbnailEmbedder::new(100).is_err());
        assert!(ThumbnailEmbedder::new(0).is_err());
    }

    #[test]
    fn extraction_is_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(20, 20, |x, _| Rgb([x as u8 * 10; 3])));
        let embedder = ThumbnailEmbedder::new(2048).unwrap();
        assert_eq!(embedder.extract(&img).unwrap(), embedder.extract(&img).unwrap());
    }
}
