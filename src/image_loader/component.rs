//! # 图片组件（OptImage）
//!
//! ## 设计思路
//!
//! `OptImage` 是一个无界面的图片加载组件：输入来源字符串，输出可渲染节点，
//! 并保证临时资源不泄漏、失败时平稳降级。解析策略（来源每次变化时按顺序执行）：
//!
//! 1. 与上次来源相同：直接返回，不重置、不请求
//! 2. 重置状态为“加载中 + 占位图”，释放上一个临时资源
//! 3. 来源为空：进入错误态，不做任何 I/O
//! 4. 绝对 URL / data / blob：直接交给宿主渲染
//! 5. 其他（相对路径）：后台获取字节，包装为临时资源；失败则回退或进入错误态
//! 6. 宿主的 load / error 事件随时更新状态，并转发给调用方回调
//!
//! ## 实现思路
//!
//! - 状态放在 `Arc<Shared>` 的互斥锁里，后台任务持有同一个 `Arc`。
//! - 每次接受新来源 `generation` 自增；异步结果在同一把锁内核对“仍挂载 + 代号未变”后才提交，
//!   过期结果直接丢弃，且不会创建临时资源。
//! - 进行中的请求不会被中止，只是结果被忽略。
//! - `OptImage` 被 drop（或 `unmount`）时标记卸载并释放资源，任何退出路径都会执行。
//! - 调用方回调在锁外执行，回调里再次访问组件不会死锁。

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::task::JoinHandle;

use super::fetcher::{redact_url_for_log, HttpFetcher, ImageFetcher};
use super::object_url::ObjectUrlStore;
use super::probe::{probe_dimensions, ImageDimensions};
use super::render::{join_classes, ImageElement, RenderDelegate, RenderNode};
use super::source::{ImageSource, RawImageData};
use super::state::{ImageLoadState, LoadSnapshot};
use super::{ImageError, ImageProps, LoaderConfig};

/// 图片元素事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEventKind {
    Load,
    Error,
}

/// 转发给调用方回调的事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEvent {
    pub kind: ImageEventKind,
    /// 事件发生时正在显示的地址。
    pub src: String,
}

pub type EventCallback = Arc<dyn Fn(&ImageEvent) + Send + Sync>;

/// 组件共享的依赖：获取器、临时资源注册表与加载策略。
#[derive(Clone)]
pub struct LoaderContext {
    pub fetcher: Arc<dyn ImageFetcher>,
    pub store: ObjectUrlStore,
    pub config: Arc<LoaderConfig>,
}

impl LoaderContext {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, store: ObjectUrlStore, config: Arc<LoaderConfig>) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// 使用 reqwest 获取器构建默认上下文。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use opt_image::image_loader::{LoaderConfig, LoaderContext};
    ///
    /// let ctx = LoaderContext::http(LoaderConfig::default())?;
    /// # Ok::<(), opt_image::image_loader::ImageError>(())
    /// ```
    pub fn http(config: LoaderConfig) -> Result<Self, ImageError> {
        let config = Arc::new(config);
        let fetcher = HttpFetcher::new(Arc::clone(&config))?;
        Ok(Self::new(Arc::new(fetcher), ObjectUrlStore::new(), config))
    }
}

/// 调用方挂载的回调与外层容器。
#[derive(Clone, Default)]
pub struct ImageHooks {
    on_load: Option<EventCallback>,
    on_error: Option<EventCallback>,
    container: Option<Arc<dyn RenderDelegate>>,
}

impl ImageHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_load(mut self, callback: impl Fn(&ImageEvent) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ImageEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn container(mut self, delegate: impl RenderDelegate + 'static) -> Self {
        self.container = Some(Arc::new(delegate));
        self
    }
}

/// 后台获取任务。调用方可等待其结束，但无需等待。
pub struct LoadTask {
    handle: JoinHandle<()>,
}

impl LoadTask {
    /// 等待后台获取结束（结果已提交或已被丢弃）。
    pub async fn settled(self) {
        if let Err(err) = self.handle.await {
            log::warn!("⚠️ 图片获取任务异常结束：{}", err);
        }
    }
}

struct Shared {
    state: Mutex<ImageLoadState>,
    props: Mutex<ImageProps>,
    hooks: ImageHooks,
    ctx: LoaderContext,
}

/// 图片加载组件实例。
pub struct OptImage {
    shared: Arc<Shared>,
}

impl OptImage {
    /// 挂载组件并立即解析初始来源。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use opt_image::image_loader::{ImageHooks, ImageProps, LoaderConfig, LoaderContext, OptImage};
    ///
    /// # async fn demo() -> Result<(), opt_image::image_loader::ImageError> {
    /// let ctx = LoaderContext::http(LoaderConfig::default())?;
    /// let (image, task) = OptImage::mount(
    ///     ImageProps::new("https://cdn.example.com/logo.png").alt("Logo"),
    ///     ImageHooks::new(),
    ///     ctx,
    /// );
    /// if let Some(task) = task {
    ///     task.settled().await;
    /// }
    /// println!("{}", image.render().to_html());
    /// # Ok(())
    /// # }
    /// ```
    pub fn mount(props: ImageProps, hooks: ImageHooks, ctx: LoaderContext) -> (Self, Option<LoadTask>) {
        let source = props.source.clone();
        let shared = Arc::new(Shared {
            state: Mutex::new(ImageLoadState::new(&props.placeholder)),
            props: Mutex::new(props),
            hooks,
            ctx,
        });

        let image = Self { shared };
        let task = Shared::apply_source(&image.shared, source.as_deref());
        (image, task)
    }

    /// 切换来源；与当前来源相同时什么也不做。
    pub fn set_source(&self, source: Option<&str>) -> Option<LoadTask> {
        self.shared.lock_props().source = source.map(str::to_string);
        Shared::apply_source(&self.shared, source)
    }

    /// 整体替换输入；只有来源变化才会重新加载。
    pub fn update_props(&self, props: ImageProps) -> Option<LoadTask> {
        let source = props.source.clone();
        *self.shared.lock_props() = props;
        Shared::apply_source(&self.shared, source.as_deref())
    }

    /// 宿主图片元素加载成功。
    pub fn handle_load(&self) {
        self.shared.dispatch(ImageEventKind::Load, None, None, None);
    }

    /// 宿主图片元素加载失败。
    pub fn handle_error(&self) {
        self.shared.dispatch(ImageEventKind::Error, None, None, None);
    }

    pub fn render(&self) -> RenderNode {
        self.shared.render()
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        self.shared.lock_state().snapshot()
    }

    pub fn store(&self) -> &ObjectUrlStore {
        &self.shared.ctx.store
    }

    /// 显式卸载，等价于 drop。
    pub fn unmount(self) {}
}

impl Drop for OptImage {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.mounted = false;
        state.release_resource();
        log::debug!("🧹 图片组件已卸载 - generation={}", state.generation);
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ImageLoadState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️ 图片状态锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        })
    }

    fn lock_props(&self) -> MutexGuard<'_, ImageProps> {
        self.props.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️ 图片属性锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        })
    }

    fn fallback(&self) -> Option<String> {
        self.lock_props().effective_fallback().map(str::to_string)
    }

    fn apply_source(this: &Arc<Self>, source: Option<&str>) -> Option<LoadTask> {
        let (placeholder, fallback) = {
            let props = this.lock_props();
            (props.placeholder.clone(), props.effective_fallback().map(str::to_string))
        };

        let mut state = this.lock_state();
        if !state.mounted {
            return None;
        }
        if state.is_same_request(source) {
            log::debug!("⏭️ 来源未变化，跳过加载");
            return None;
        }

        state.generation += 1;
        let generation = state.generation;
        state.requested_source = source.map(str::to_string);
        state.is_loading = true;
        state.has_error = false;
        state.resolved_source = placeholder;
        state.natural_size = None;
        state.last_error = None;
        state.release_resource();

        match ImageSource::classify(source) {
            ImageSource::Missing => {
                log::debug!("🚫 图片来源为空 - generation={}", generation);
                state.is_loading = false;
                state.has_error = true;
                state.last_error = Some(ImageError::MissingSource);
                if let Some(fallback) = fallback {
                    state.resolved_source = fallback;
                }
                None
            }
            ImageSource::Remote(url) | ImageSource::Inline(url) => {
                log::debug!("🔗 直接渲染 - {}", redact_url_for_log(&url));
                state.resolved_source = url;
                state.is_loading = false;
                None
            }
            ImageSource::Relative(path) => {
                drop(state);
                Self::spawn_fetch(this, path, generation)
            }
        }
    }

    fn spawn_fetch(this: &Arc<Self>, path: String, generation: u64) -> Option<LoadTask> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                this.commit_failure(
                    ImageError::Network(format!("缺少异步运行时：{}", err)),
                    generation,
                    &path,
                );
                return None;
            }
        };

        let shared = Arc::clone(this);
        let handle = runtime.spawn(async move {
            match shared.ctx.fetcher.fetch(&path).await {
                Ok(raw) => shared.commit_resource(raw, generation),
                Err(err) => shared.commit_failure(err, generation, &path),
            }
        });

        Some(LoadTask { handle })
    }

    fn commit_resource(&self, raw: RawImageData, generation: u64) {
        {
            let mut state = self.lock_state();
            if !state.is_current(generation) {
                log::debug!("🗑️ 丢弃过期的获取结果 - generation={}", generation);
                return;
            }

            state.release_resource();
            let handle = self.ctx.store.create(raw.bytes.clone(), &raw.mime);
            state.resolved_source = handle.url().to_string();
            state.owned_resource = Some(handle);
            state.is_loading = false;
        }

        if !self.ctx.config.verify_decoded {
            return;
        }

        match probe_dimensions(&raw.bytes, &self.ctx.config) {
            Ok(dims) => self.dispatch(ImageEventKind::Load, Some(generation), Some(dims), None),
            // 本地读不了不等于宿主显示不了，等待宿主的 load / error 事件
            Err(ImageError::UnsupportedFormat(reason)) => {
                log::debug!("🔍 跳过尺寸探测（{}）：{}", raw.mime, reason);
            }
            Err(err) => self.dispatch(
                ImageEventKind::Error,
                Some(generation),
                None,
                Some(ImageError::Render(err.to_string())),
            ),
        }
    }

    fn commit_failure(&self, err: ImageError, generation: u64, source: &str) {
        log::warn!("⚠️ 图片加载失败：{} - {}", redact_url_for_log(source), err);

        let fallback = self.fallback();
        let mut state = self.lock_state();
        if !state.is_current(generation) {
            return;
        }

        state.last_error = Some(err);
        state.is_loading = false;
        match fallback {
            Some(fallback) => state.resolved_source = fallback,
            None => state.has_error = true,
        }
    }

    /// 处理 load / error 事件。`expected_generation` 为 `Some` 时表示内部合成事件，需要核对代号。
    fn dispatch(
        &self,
        kind: ImageEventKind,
        expected_generation: Option<u64>,
        dims: Option<ImageDimensions>,
        err: Option<ImageError>,
    ) {
        let fallback = self.fallback();
        let event = {
            let mut state = self.lock_state();
            if let Some(generation) = expected_generation {
                if !state.is_current(generation) {
                    return;
                }
            }

            let event = ImageEvent {
                kind,
                src: state.resolved_source.clone(),
            };

            if state.mounted {
                match kind {
                    ImageEventKind::Load => {
                        state.is_loading = false;
                        state.has_error = false;
                        if dims.is_some() {
                            state.natural_size = dims;
                        }
                    }
                    ImageEventKind::Error => {
                        state.has_error = true;
                        state.is_loading = false;
                        state.last_error = Some(err.unwrap_or_else(|| {
                            ImageError::Render(format!(
                                "图片元素无法显示：{}",
                                redact_url_for_log(&event.src)
                            ))
                        }));
                        if let Some(fallback) = fallback {
                            if state.resolved_source != fallback {
                                log::debug!("↩️ 切换到回退图");
                                state.resolved_source = fallback;
                            }
                        }
                    }
                }
            }

            event
        };

        let callback = match kind {
            ImageEventKind::Load => self.hooks.on_load.as_ref(),
            ImageEventKind::Error => self.hooks.on_error.as_ref(),
        };
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    fn render(&self) -> RenderNode {
        let props = self.lock_props().clone();
        let (resolved, is_loading, has_error) = {
            let state = self.lock_state();
            (state.resolved_source.clone(), state.is_loading, state.has_error)
        };

        let reveal = props.reveal_only_when_loaded;
        if reveal && (is_loading || has_error) {
            return RenderNode::Empty;
        }
        if has_error && props.effective_fallback().is_none() {
            return RenderNode::Empty;
        }

        let class_name = props.attributes.class_name.as_deref().unwrap_or("");
        let style = props.attributes.style.as_deref();
        let show_skeleton = is_loading && !reveal;

        let image = RenderNode::Image(ImageElement {
            src: resolved,
            alt: props.alt.clone(),
            class_name: join_classes(&[
                class_name,
                if show_skeleton { "opacity-0" } else { "opacity-100" },
                "transition-opacity duration-300",
            ]),
            attributes: props.attributes.clone(),
        });

        let node = if show_skeleton {
            RenderNode::Fragment {
                children: vec![
                    RenderNode::Skeleton {
                        class_name: join_classes(&[class_name, "absolute inset-0"]),
                        style: style.map(str::to_string),
                    },
                    image,
                ],
            }
        } else {
            image
        };

        match &self.hooks.container {
            Some(container) => container.wrap(node, props.attributes.class_name.as_deref(), style),
            None => node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct FailingFetcher;

    #[async_trait]
    impl ImageFetcher for FailingFetcher {
        async fn fetch(&self, _source: &str) -> Result<RawImageData, ImageError> {
            Err(ImageError::HttpStatus(500))
        }
    }

    struct StaticFetcher(Bytes);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _source: &str) -> Result<RawImageData, ImageError> {
            Ok(RawImageData {
                bytes: self.0.clone(),
                mime: "image/png".to_string(),
            })
        }
    }

    fn ctx(fetcher: impl ImageFetcher + 'static) -> LoaderContext {
        LoaderContext::new(
            Arc::new(fetcher),
            ObjectUrlStore::new(),
            Arc::new(LoaderConfig::default()),
        )
    }

    #[test]
    fn direct_sources_need_no_runtime() {
        let (image, task) = OptImage::mount(
            ImageProps::new("https://cdn.example.com/a.png"),
            ImageHooks::new(),
            ctx(FailingFetcher),
        );

        assert!(task.is_none());
        let snap = image.snapshot();
        assert_eq!(snap.resolved_source, "https://cdn.example.com/a.png");
        assert!(!snap.is_loading);
        assert!(!image.render().has_skeleton());
    }

    #[test]
    fn relative_source_without_runtime_degrades_to_error() {
        let (image, task) = OptImage::mount(
            ImageProps::new("/logos/acme.png"),
            ImageHooks::new(),
            ctx(FailingFetcher),
        );

        assert!(task.is_none());
        let snap = image.snapshot();
        assert!(snap.has_error);
        assert_eq!(snap.error_code, Some("network"));
        assert!(image.render().is_empty());
    }

    #[tokio::test]
    async fn undecodable_resource_dispatches_render_error() {
        // PNG 文件头之后直接截断
        let truncated = Bytes::from_static(b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0d");
        let (image, task) = OptImage::mount(
            ImageProps::new("/broken.png").fallback("/fallback.png"),
            ImageHooks::new(),
            ctx(StaticFetcher(truncated)),
        );
        task.expect("fetch task").settled().await;

        let snap = image.snapshot();
        assert!(snap.has_error);
        assert_eq!(snap.error_code, Some("render"));
        assert_eq!(snap.resolved_source, "/fallback.png");
        // 资源仍由实例持有，直到来源变化或卸载
        assert_eq!(image.store().live_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_format_keeps_committed_resource() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="8" height="8"></svg>"#;
        let (image, task) = OptImage::mount(
            ImageProps::new("/logos/acme.svg"),
            ImageHooks::new(),
            ctx(StaticFetcher(Bytes::from_static(svg))),
        );
        task.expect("fetch task").settled().await;

        let snap = image.snapshot();
        assert!(!snap.has_error);
        assert!(!snap.is_loading);
        assert!(ObjectUrlStore::is_object_url(&snap.resolved_source));
        assert!(snap.natural_size.is_none());
        assert!(!image.render().is_empty());
    }

    #[test]
    fn missing_source_with_fallback_shows_fallback() {
        let (image, _) = OptImage::mount(
            ImageProps::default().fallback("/fallback.png"),
            ImageHooks::new(),
            ctx(FailingFetcher),
        );

        let snap = image.snapshot();
        assert!(snap.has_error);
        assert_eq!(
            image.render().image().map(|img| img.src.clone()),
            Some("/fallback.png".to_string())
        );
    }

    #[test]
    fn loading_render_has_skeleton_and_hidden_image() {
        let (image, _) = OptImage::mount(
            ImageProps::default().class_name("h-6 w-6").style("width:24px"),
            ImageHooks::new(),
            ctx(FailingFetcher),
        );
        // 手动回到加载态以观察骨架
        image.shared.lock_state().is_loading = true;
        image.shared.lock_state().has_error = false;

        let node = image.render();
        assert!(node.has_skeleton());
        assert_eq!(
            node.image().map(|img| img.class_name.as_str()),
            Some("h-6 w-6 opacity-0 transition-opacity duration-300")
        );
        assert!(node.to_html().contains(r#"class="animate-pulse rounded-md bg-muted h-6 w-6 absolute inset-0""#));
    }
}
