//! Domain Layer - 领域层
//!
//! 包含:
//! - Book Context: 书籍与章节模型
//! - normalize: 章节文本规整管线（HTML 提取、脚注清理、规则替换）
//! - splitter: Token 超限回退所用的文本二分

pub mod book;
pub mod normalize;

// 共享的文本二分器
mod splitter;

pub use splitter::split_text;
