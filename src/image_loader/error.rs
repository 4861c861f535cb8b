//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 图片解析链路中的所有失败统一收敛到 `ImageError`。
//! 组件本身从不向调用方抛错：错误只会被记录到状态里，最终表现为回退图或空渲染。
//! 只有 `ImageFetcher` / `probe` 这类底层接口才以 `Result` 形式暴露错误。

use serde::Serialize;

/// 图片加载统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("图片地址为空")]
    MissingSource,

    #[error("网络错误：{0}")]
    Network(String),

    #[error("HTTP {0}：{msg}", msg = status_message(.0))]
    HttpStatus(u16),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("解码错误：{0}")]
    Decode(String),

    /// 本地无法解析该格式（如 SVG），不代表宿主无法显示。
    #[error("不支持的图片格式：{0}")]
    UnsupportedFormat(String),

    #[error("渲染失败：{0}")]
    Render(String),
}

impl ImageError {
    /// 稳定错误码，供日志与快照使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSource => "missing_source",
            Self::Network(_) => "network",
            Self::HttpStatus(_) => "http_status",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Timeout(_) => "timeout",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Decode(_) => "decode",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Render(_) => "render",
        }
    }

    /// 错误发生的阶段：`resolve` / `fetch` / `render`。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingSource => "resolve",
            Self::Network(_)
            | Self::HttpStatus(_)
            | Self::InvalidFormat(_)
            | Self::Timeout(_)
            | Self::ResourceLimit(_) => "fetch",
            Self::Decode(_) | Self::UnsupportedFormat(_) | Self::Render(_) => "render",
        }
    }
}

impl Serialize for ImageError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// 常见 HTTP 状态码文案。
fn status_message(code: &u16) -> &'static str {
    match *code {
        404 => "未找到",
        401 | 403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_message_is_localized() {
        assert_eq!(ImageError::HttpStatus(404).to_string(), "HTTP 404：未找到");
        assert_eq!(ImageError::HttpStatus(503).to_string(), "HTTP 503：服务器错误");
    }

    #[test]
    fn stage_groups_fetch_errors() {
        assert_eq!(ImageError::Timeout("x".into()).stage(), "fetch");
        assert_eq!(ImageError::Render("x".into()).stage(), "render");
        assert_eq!(ImageError::MissingSource.code(), "missing_source");
        assert_eq!(ImageError::UnsupportedFormat("svg".into()).stage(), "render");
    }
}
