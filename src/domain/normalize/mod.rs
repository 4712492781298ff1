//! 文本规整 - 章节 HTML 到 TTS 纯文本的规整管线
//!
//! 管线顺序（每级消费上一级输出）:
//! 1. HTML 剥离（script/style 整体丢弃，块级元素产生换行边界）
//! 2. 脚注清理（可选）
//! 3. 用户正则替换规则（按给定顺序）
//! 4. 换行模式处理（single/double/none + break_string）
//! 5. 空白压缩与修剪
//!
//! 标题启发式（auto/tag_text/first_few）独立于管线，
//! 同时接收原始 HTML 与规整后文本。

mod html;
mod pipeline;
mod title;

use serde::Deserialize;
use thiserror::Error;

pub use html::extract_text;
pub use pipeline::{normalize_chapter, normalize_text};
pub use title::extract_title;

/// 规整错误
///
/// 无效的用户规则是章节级致命错误，中止整次转换
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Invalid search/replace rule '{pattern}': {message}")]
    InvalidRule { pattern: String, message: String },

    #[error("Malformed chapter markup: {0}")]
    MalformedMarkup(String),
}

/// 章节标题提取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleMode {
    /// 先试标签文本，退化为正文开头
    Auto,
    /// 仅取 title/h1/h2/h3 标签文本
    TagText,
    /// 规整后文本的前 60 个字符
    FirstFew,
}

impl Default for TitleMode {
    fn default() -> Self {
        TitleMode::Auto
    }
}

/// 换行处理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewlineMode {
    /// 任意连续换行折叠为 break_string
    Single,
    /// 两个以上换行折叠为 break_string，孤立单换行变为空格
    Double,
    /// 所有换行变为空格
    None,
}

impl Default for NewlineMode {
    fn default() -> Self {
        NewlineMode::Double
    }
}

/// 用户搜索替换规则
///
/// pattern 为正则表达式，编译失败视为 NormalizeError::InvalidRule
#[derive(Debug, Clone, Deserialize)]
pub struct SearchReplaceRule {
    /// 正则模式
    pub pattern: String,
    /// 替换文本（支持 $1 等捕获组引用）
    #[serde(default)]
    pub replacement: String,
    /// 忽略大小写
    #[serde(default)]
    pub case_insensitive: bool,
}

/// 规整配置
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeOptions {
    /// 章节标题提取模式
    #[serde(default)]
    pub title_mode: TitleMode,

    /// 换行处理模式
    #[serde(default)]
    pub newline_mode: NewlineMode,

    /// 换行折叠时插入的分隔串
    #[serde(default = "default_break_string")]
    pub break_string: String,

    /// 是否清理上标脚注与方括号引用
    #[serde(default)]
    pub footnote_cleanup: bool,

    /// 用户搜索替换规则，按序应用
    #[serde(default)]
    pub rules: Vec<SearchReplaceRule>,
}

fn default_break_string() -> String {
    "\n\n".to_string()
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            title_mode: TitleMode::default(),
            newline_mode: NewlineMode::default(),
            break_string: default_break_string(),
            footnote_cleanup: false,
            rules: Vec::new(),
        }
    }
}

/// 标题为空时的占位符
pub const BLANK_TITLE: &str = "<blank>";
