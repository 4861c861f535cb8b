//! # opt-image — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │            宿主（页面 / SSR / CLI）                       │
//! │   卡片 · 表格 · 头部 … 传入 src，渲染返回的节点           │
//! └───────┬───────────────────────────────▲──────────────────┘
//!         │ ImageProps / load·error 事件   │ RenderNode / HTML
//! ┌───────▼───────────────────────────────┴──────────────────┐
//! │  image_loader                                            │
//! │  ├─ component   OptImage：代号防竞态 + 卸载释放 (RAII)    │
//! │  ├─ source      来源分类                                 │
//! │  ├─ fetcher     ImageFetcher / HttpFetcher (reqwest)     │
//! │  ├─ object_url  临时资源注册表 + ObjectUrl 句柄           │
//! │  ├─ probe       头部尺寸探测                             │
//! │  └─ render      RenderNode / 外层容器 / HTML             │
//! │                                                          │
//! │  error      AppError（配置与入口层）                      │
//! │  settings   LoaderConfig JSON 读写                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`image_loader`] | 图片来源解析、获取、临时资源生命周期、渲染输出 |
//! | [`settings`] | 加载策略配置的读写 |

pub mod error;
pub mod image_loader;
pub mod settings;
