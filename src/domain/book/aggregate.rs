//! Book Context - Aggregate Root

use super::{BookError, Chapter, CoverImage};

/// Book 聚合根
///
/// 不变量:
/// - 解析完成后不可变
/// - 章节索引构成 0..n-1 的稠密序列，且等于脊柱阅读顺序
/// - title 必有值（缺失时由调用方以文件名主干兜底）
/// - author 必有值（缺失时为 "Unknown"）
#[derive(Debug, Clone)]
pub struct Book {
    title: String,
    author: String,
    cover: Option<CoverImage>,
    chapters: Vec<Chapter>,
}

impl Book {
    /// 创建书籍聚合，校验章节索引稠密有序
    pub fn new(
        title: String,
        author: String,
        cover: Option<CoverImage>,
        chapters: Vec<Chapter>,
    ) -> Result<Self, BookError> {
        if chapters.is_empty() {
            return Err(BookError::NoChapters);
        }
        for (position, chapter) in chapters.iter().enumerate() {
            if chapter.index() != position {
                return Err(BookError::NonContiguousIndex {
                    position,
                    index: chapter.index(),
                });
            }
        }
        Ok(Self {
            title,
            author,
            cover,
            chapters,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn cover(&self) -> Option<&CoverImage> {
        self.cover.as_ref()
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// 装配阶段需要回填 start_time / output_artifact
    pub fn chapters_mut(&mut self) -> &mut [Chapter] {
        &mut self.chapters
    }
}

#[cfg(test)]
mod tests {
    use super::super::TitleSource;
    use super::*;

    fn chapter(index: usize) -> Chapter {
        Chapter::new(
            index,
            format!("Chapter {}", index + 1),
            TitleSource::Fallback,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_book_creation() {
        let book = Book::new(
            "Moby Dick".to_string(),
            "Herman Melville".to_string(),
            None,
            vec![chapter(0), chapter(1)],
        )
        .unwrap();

        assert_eq!(book.title(), "Moby Dick");
        assert_eq!(book.chapter_count(), 2);
        assert!(book.cover().is_none());
    }

    #[test]
    fn test_rejects_empty_chapter_list() {
        let result = Book::new("T".to_string(), "Unknown".to_string(), None, Vec::new());
        assert!(matches!(result, Err(BookError::NoChapters)));
    }

    #[test]
    fn test_rejects_non_contiguous_indices() {
        let result = Book::new(
            "T".to_string(),
            "Unknown".to_string(),
            None,
            vec![chapter(0), chapter(2)],
        );
        assert!(matches!(
            result,
            Err(BookError::NonContiguousIndex {
                position: 1,
                index: 2
            })
        ));
    }

    #[test]
    fn test_chapter_indices_dense_in_order() {
        let book = Book::new(
            "T".to_string(),
            "Unknown".to_string(),
            None,
            (0..5).map(chapter).collect(),
        )
        .unwrap();

        for (i, ch) in book.chapters().iter().enumerate() {
            assert_eq!(ch.index(), i);
        }
    }
}
