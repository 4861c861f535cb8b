//! # opt-image — 命令行入口
//!
//! 解析单个图片来源，等待后台获取结束后输出渲染结果（HTML 或 JSON）。
//! 业务逻辑全部在库中，详见 `lib.rs` 架构文档。

use std::path::PathBuf;

use clap::Parser;
use opt_image::error::AppError;
use opt_image::image_loader::{
    ContainerDelegate, ImageHooks, ImageProps, LoaderConfig, LoaderContext, ObjectUrlStore, OptImage,
    DEFAULT_PLACEHOLDER,
};
use opt_image::settings;

#[derive(Debug, Parser)]
#[command(name = "opt-image", version, about = "解析图片来源并输出渲染结果")]
struct Cli {
    /// 图片来源：绝对 URL、data/blob URL 或相对路径（可为空串）
    source: Option<String>,

    /// 加载失败时使用的回退图
    #[arg(long)]
    fallback: Option<String>,

    /// 加载过程中显示的占位图
    #[arg(long, default_value = DEFAULT_PLACEHOLDER)]
    placeholder: String,

    /// 相对路径的解析基准，覆盖配置文件中的值
    #[arg(long)]
    base_url: Option<String>,

    /// JSON 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    alt: Option<String>,

    #[arg(long = "class")]
    class_name: Option<String>,

    #[arg(long)]
    style: Option<String>,

    /// 加载完成前不渲染任何内容
    #[arg(long)]
    reveal_only_when_loaded: bool,

    /// 用指定标签包裹图片（如 div、figure）
    #[arg(long)]
    container: Option<String>,

    /// 输出 JSON（状态快照 + 渲染树）而不是 HTML
    #[arg(long)]
    json: bool,

    /// 把临时资源地址替换为 base64 data URL
    #[arg(long)]
    inline_blobs: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("执行失败: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = match &cli.config {
        Some(path) => settings::load_config(path)?,
        None => LoaderConfig::default(),
    };
    if cli.base_url.is_some() {
        config.base_url = cli.base_url.clone();
    }
    config.validate()?;

    let ctx = LoaderContext::http(config)?;

    let mut props = ImageProps::default()
        .placeholder(cli.placeholder)
        .reveal_only_when_loaded(cli.reveal_only_when_loaded);
    props.source = cli.source;
    props.alt = cli.alt;
    props.fallback_source = cli.fallback;
    props.attributes.class_name = cli.class_name;
    props.attributes.style = cli.style;

    let mut hooks = ImageHooks::new()
        .on_load(|event| log::info!("✅ 图片已就绪: {}", event.src))
        .on_error(|event| log::warn!("⚠️ 图片无法显示: {}", event.src));
    if let Some(tag) = &cli.container {
        hooks = hooks.container(ContainerDelegate::new(tag));
    }

    let (image, task) = OptImage::mount(props, hooks, ctx);
    if let Some(task) = task {
        task.settled().await;
    }

    let mut node = image.render();
    if cli.inline_blobs {
        let store = image.store();
        node.visit_images_mut(&mut |img| {
            if ObjectUrlStore::is_object_url(&img.src) {
                if let Some(data_url) = store.export_data_url(&img.src) {
                    img.src = data_url;
                }
            }
        });
    }

    if cli.json {
        let output = serde_json::json!({
            "state": image.snapshot(),
            "node": node,
        });
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| AppError::Config(format!("序列化输出失败: {}", e)))?;
        println!("{text}");
    } else {
        println!("{}", node.to_html());
    }

    image.unmount();
    Ok(())
}
