//! # 图片加载模块（image_loader）
//!
//! ## 设计思路
//!
//! 把“来源识别 → 获取字节 → 临时资源 → 状态提交 → 渲染输出”按职责拆分为多个子模块：
//!
//! - `source`：来源分类（空 / 绝对 URL / data·blob / 相对路径）
//! - `fetcher`：`ImageFetcher` trait 与基于 reqwest 的 `HttpFetcher`
//! - `object_url`：临时资源注册表与 RAII 句柄
//! - `probe`：仅读头部的尺寸探测，模拟宿主解码结果
//! - `state`：单实例状态与快照
//! - `render`：渲染树、外层容器策略、HTML 输出
//! - `component`：`OptImage`，编排以上所有环节
//! - `config/error`：配置与错误
//!
//! ## 新同事快速上手
//!
//! ```text
//! 调用方 mount / set_source
//!    ↓
//! component.rs（代号自增 + 状态重置 + 释放旧资源）
//!    ├─ source.rs（决定直连还是获取）
//!    ├─ fetcher.rs（后台获取，失败→回退图或错误态）
//!    ├─ object_url.rs（成功→创建临时资源）
//!    └─ probe.rs（合成 load / error 事件）
//!    ↓
//! render.rs（RenderNode / HTML）
//! ```

mod component;
mod config;
mod error;
mod fetcher;
mod object_url;
mod probe;
mod render;
mod source;
mod state;

pub use component::{
    EventCallback, ImageEvent, ImageEventKind, ImageHooks, LoadTask, LoaderContext, OptImage,
};
pub use config::{DisplayAttributes, ImageProps, LoaderConfig, DEFAULT_PLACEHOLDER};
pub use error::ImageError;
pub use fetcher::{HttpFetcher, ImageFetcher};
pub use object_url::{ObjectUrl, ObjectUrlStore, StoredBlob};
pub use probe::{probe_dimensions, ImageDimensions};
pub use render::{ContainerDelegate, ImageElement, RenderDelegate, RenderNode};
pub use source::{ImageSource, RawImageData};
pub use state::LoadSnapshot;
