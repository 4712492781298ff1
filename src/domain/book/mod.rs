//! Book Context - 书籍限界上下文
//!
//! 职责:
//! - Book 聚合管理（元数据 + 有序章节）
//! - 章节实体（脊柱顺序、标题、产物路径）
//! - 面向文件名的标题净化

mod aggregate;
mod entities;
mod errors;
mod value_objects;

pub use aggregate::Book;
pub use entities::{Chapter, TitleSource};
pub use errors::BookError;
pub use value_objects::{sanitize_component, CoverImage};
