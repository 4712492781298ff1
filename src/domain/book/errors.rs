//! Book Context - Errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("书籍没有任何章节")]
    NoChapters,

    #[error("章节索引不连续: 位置 {position} 处出现索引 {index}")]
    NonContiguousIndex { position: usize, index: usize },

    #[error("无效的章节: {0}")]
    InvalidChapter(&'static str),
}
