//! EPUB Reader - 档案解压、包文档解析、脊柱装配、封面发现
//!
//! 从本地 EPUB 路径产出 Book 聚合或类型化失败:
//! - InvalidArchive: ZIP 结构不可读
//! - MissingContainer: 缺 META-INF/container.xml
//! - MissingOpf: rootfile/full-path 缺失或 OPF 不可读
//! - EmptySpine: 脊柱无可读章节
//!
//! 封面缺失不是失败。

mod archive;
mod package;
mod reader;
mod titles;

use thiserror::Error;

pub use archive::EpubArchive;
pub use package::{ManifestItem, PackageDoc};
pub use reader::EpubReader;

/// EPUB 解析错误
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("missing META-INF/container.xml")]
    MissingContainer,

    #[error("missing OPF package: {0}")]
    MissingOpf(String),

    #[error("spine contains no readable chapters")]
    EmptySpine,

    #[error("missing archive entry: {0}")]
    MissingEntry(String),

    #[error("malformed XML in {path}: {message}")]
    MalformedXml { path: String, message: String },

    #[error("invalid book structure: {0}")]
    InvalidBook(String),
}

impl From<EpubError> for crate::application::ConversionError {
    fn from(err: EpubError) -> Self {
        Self::Parse(err.to_string())
    }
}
