//! # 渲染输出
//!
//! ## 设计思路
//!
//! 组件不直接绑定任何 UI 框架，而是产出一棵小型 `RenderNode` 树：
//! 宿主可以把它映射到自己的元素体系，也可以用 `to_html` 直接得到标记（SSR / CLI）。
//!
//! 外层容器是一个策略点：调用方可传入 `RenderDelegate` 包裹图片节点，不传则原样返回。

use serde::Serialize;

use super::DisplayAttributes;

const SKELETON_BASE_CLASS: &str = "animate-pulse rounded-md bg-muted";

/// 最终交给宿主的图片元素。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageElement {
    pub src: String,
    pub alt: Option<String>,
    pub class_name: String,
    pub attributes: DisplayAttributes,
}

/// 渲染树节点。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderNode {
    /// 不渲染任何内容。
    Empty,
    Fragment { children: Vec<RenderNode> },
    /// 加载中的骨架占位层。
    Skeleton {
        class_name: String,
        style: Option<String>,
    },
    Image(ImageElement),
    Container {
        tag: String,
        class_name: Option<String>,
        style: Option<String>,
        child: Box<RenderNode>,
    },
}

impl RenderNode {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// 深度优先查找第一个图片元素。
    pub fn image(&self) -> Option<&ImageElement> {
        match self {
            Self::Image(img) => Some(img),
            Self::Fragment { children } => children.iter().find_map(RenderNode::image),
            Self::Container { child, .. } => child.image(),
            Self::Empty | Self::Skeleton { .. } => None,
        }
    }

    pub fn has_skeleton(&self) -> bool {
        match self {
            Self::Skeleton { .. } => true,
            Self::Fragment { children } => children.iter().any(RenderNode::has_skeleton),
            Self::Container { child, .. } => child.has_skeleton(),
            Self::Empty | Self::Image(_) => false,
        }
    }

    /// 就地修改树中所有图片元素。
    pub fn visit_images_mut<F: FnMut(&mut ImageElement)>(&mut self, f: &mut F) {
        match self {
            Self::Image(img) => f(img),
            Self::Fragment { children } => {
                for child in children {
                    child.visit_images_mut(f);
                }
            }
            Self::Container { child, .. } => child.visit_images_mut(f),
            Self::Empty | Self::Skeleton { .. } => {}
        }
    }

    /// 序列化为 HTML，所有属性值均已转义。
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Self::Empty => {}
            Self::Fragment { children } => {
                for child in children {
                    child.write_html(out);
                }
            }
            Self::Skeleton { class_name, style } => {
                out.push_str("<div");
                push_attr(out, "class", &join_classes(&[SKELETON_BASE_CLASS, class_name]));
                if let Some(style) = style {
                    push_attr(out, "style", style);
                }
                out.push_str("></div>");
            }
            Self::Image(img) => write_img(img, out),
            Self::Container {
                tag,
                class_name,
                style,
                child,
            } => {
                out.push('<');
                out.push_str(tag);
                if let Some(class_name) = class_name {
                    push_attr(out, "class", class_name);
                }
                if let Some(style) = style {
                    push_attr(out, "style", style);
                }
                out.push('>');
                child.write_html(out);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

fn write_img(img: &ImageElement, out: &mut String) {
    let attrs = &img.attributes;

    out.push_str("<img");
    push_attr(out, "src", &img.src);
    push_attr(out, "alt", img.alt.as_deref().unwrap_or(""));
    push_attr(out, "class", &img.class_name);

    let optional = [
        ("id", attrs.id.as_deref()),
        ("style", attrs.style.as_deref()),
        ("title", attrs.title.as_deref()),
        ("loading", attrs.loading.as_deref()),
        ("decoding", attrs.decoding.as_deref()),
        ("referrerpolicy", attrs.referrer_policy.as_deref()),
        ("crossorigin", attrs.cross_origin.as_deref()),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            push_attr(out, name, value);
        }
    }

    if let Some(width) = attrs.width {
        push_attr(out, "width", &width.to_string());
    }
    if let Some(height) = attrs.height {
        push_attr(out, "height", &height.to_string());
    }
    if let Some(draggable) = attrs.draggable {
        push_attr(out, "draggable", if draggable { "true" } else { "false" });
    }
    for (key, value) in &attrs.data {
        if is_safe_attr_name(key) {
            push_attr(out, &format!("data-{}", key), value);
        }
    }

    out.push('>');
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_into(out, value);
    out.push('"');
}

fn escape_into(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

fn is_safe_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 拼接 class，忽略空片段。
pub(crate) fn join_classes(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 外层容器策略。
pub trait RenderDelegate: Send + Sync {
    /// 包裹图片节点；`class_name` / `style` 为调用方传给图片的同名属性。
    fn wrap(&self, child: RenderNode, class_name: Option<&str>, style: Option<&str>) -> RenderNode;
}

/// 默认容器：用一个普通元素包裹，继承调用方的 class 与 style。
#[derive(Debug, Clone)]
pub struct ContainerDelegate {
    tag: String,
}

impl ContainerDelegate {
    /// 标签名只允许字母数字，否则退回 `div`。
    pub fn new(tag: &str) -> Self {
        let valid = !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric());
        Self {
            tag: if valid { tag.to_ascii_lowercase() } else { "div".to_string() },
        }
    }
}

impl Default for ContainerDelegate {
    fn default() -> Self {
        Self::new("div")
    }
}

impl RenderDelegate for ContainerDelegate {
    fn wrap(&self, child: RenderNode, class_name: Option<&str>, style: Option<&str>) -> RenderNode {
        RenderNode::Container {
            tag: self.tag.clone(),
            class_name: class_name.map(str::to_string),
            style: style.map(str::to_string),
            child: Box::new(child),
        }
    }
}
