use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use indicatif::ProgressStyle;

use crate::error::{Error, Result};

/// 读取图片文件，无法读取或解码时返回 `NotFound`
pub fn imread(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    image::open(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))
}

/// 从内存中解码图片
pub fn imdecode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))
}

/// 将图片编码为 PNG
pub fn imencode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| Error::Provider(format!("PNG 编码失败: {e}")))?;
    Ok(buf.into_inner())
}

/// 计算文件内容的 blake3 哈希，返回十六进制字符串
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
