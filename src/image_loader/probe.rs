//! # 尺寸探测
//!
//! 仅读取图片头部获取宽高，不做完整解码。
//! 临时资源提交后用它模拟宿主图片元素的解码结果：成功即视为 load，失败即视为渲染错误。
//! 本地不认识的格式（SVG、未启用解码器的 AVIF 等）返回 `UnsupportedFormat`，交由宿主自行判断。

use std::io::Cursor;

use serde::Serialize;

use super::{ImageError, LoaderConfig};

/// 图片固有尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// 读取图片头部尺寸并做像素上限检查。
pub fn probe_dimensions(bytes: &[u8], config: &LoaderConfig) -> Result<ImageDimensions, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Decode("图片内容为空".to_string()));
    }

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(format!("无法识别图片格式：{}", e)))?;

    if reader.format().is_none() {
        return Err(ImageError::UnsupportedFormat("无法从文件头识别格式".to_string()));
    }

    let (width, height) = reader.into_dimensions().map_err(|e| match e {
        image::ImageError::Unsupported(e) => ImageError::UnsupportedFormat(e.to_string()),
        e => ImageError::Decode(format!("无法读取图片尺寸：{}", e)),
    })?;

    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(ImageDimensions { width, height })
}
