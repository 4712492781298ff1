//! EPUB Reader - 从档案到 Book 聚合
//!
//! 解析流程:
//! 1. 打开 ZIP 档案
//! 2. container.xml → OPF 位置
//! 3. OPF → 元数据 / manifest / spine
//! 4. 按脊柱顺序装配章节（跳过非 (X)HTML 条目）
//! 5. nav → ncx → href 的标题发现链
//! 6. 四级封面发现（缺失不是失败）

use std::collections::HashMap;
use std::path::Path;

use crate::domain::book::{sanitize_component, Book, Chapter, CoverImage, TitleSource};

use super::archive::EpubArchive;
use super::package::{self, parent_dir, PackageDoc};
use super::titles::{parse_nav_titles, parse_ncx_titles};
use super::EpubError;

/// EPUB 读取器
pub struct EpubReader;

impl EpubReader {
    /// 读取本地 EPUB，产出 Book 或类型化失败
    pub fn read_book(path: &Path) -> Result<Book, EpubError> {
        let mut archive = EpubArchive::open(path)?;

        let container = archive
            .read("META-INF/container.xml")
            .map_err(|_| EpubError::MissingContainer)?;
        let opf_path = package::parse_container(&container)?;

        let opf_bytes = archive
            .read(&opf_path)
            .map_err(|e| EpubError::MissingOpf(e.to_string()))?;
        let pkg = package::parse_package(&opf_bytes, &opf_path)?;

        // 书名缺失时以文件名主干兜底，作者缺失为 "Unknown"
        let title = pkg
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| file_stem(path));
        let author = pkg
            .creator
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let title_map = discover_titles(&mut archive, &pkg);
        let chapters = assemble_chapters(&mut archive, &pkg, title_map.as_ref())?;
        let cover = discover_cover(&mut archive, &pkg);

        tracing::info!(
            title = %title,
            author = %author,
            chapters = chapters.len(),
            has_cover = cover.is_some(),
            "EPUB parsed"
        );

        Book::new(title, author, cover, chapters)
            .map_err(|e| EpubError::InvalidBook(e.to_string()))
    }
}

/// EPUB 路径的文件名主干
fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// 按脊柱顺序装配章节
fn assemble_chapters(
    archive: &mut EpubArchive,
    pkg: &PackageDoc,
    title_map: Option<&HashMap<String, String>>,
) -> Result<Vec<Chapter>, EpubError> {
    let mut chapters: Vec<Chapter> = Vec::with_capacity(pkg.spine.len());

    for idref in &pkg.spine {
        let Some(item) = pkg.manifest.get(idref) else {
            tracing::warn!(idref = %idref, "Spine itemref not in manifest, skipping");
            continue;
        };
        if !item.is_document() {
            tracing::debug!(href = %item.href, media_type = %item.media_type, "Skipping non-document spine item");
            continue;
        }

        let html = match archive.read(&item.href) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(href = %item.href, error = %e, "Unreadable spine document, skipping");
                continue;
            }
        };

        let index = chapters.len();
        let (chapter_title, source) = match title_map {
            Some(map) => match map.get(&item.href).map(|t| sanitize_component(t)) {
                Some(t) if !t.is_empty() => (t, TitleSource::Toc),
                // 目录存在但未收录该章（或条目为空），待启发式补齐
                _ => (href_title(&item.href, index), TitleSource::Pending),
            },
            None => (href_title(&item.href, index), TitleSource::Fallback),
        };

        let chapter = Chapter::new(index, chapter_title, source, html)
            .map_err(|e| EpubError::InvalidBook(e.to_string()))?;
        chapters.push(chapter);
    }

    if chapters.is_empty() {
        return Err(EpubError::EmptySpine);
    }
    Ok(chapters)
}

/// href 兜底标题：基础文件名去扩展名，连字符换空格，
/// 净化后为空则 "Chapter <index+1>"
fn href_title(href: &str, index: usize) -> String {
    let base = href.rsplit('/').next().unwrap_or(href);
    let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);
    let title = sanitize_component(&stem.replace('-', " "));
    if title.is_empty() {
        format!("Chapter {}", index + 1)
    } else {
        title
    }
}

/// 标题发现链: nav → ncx → 无
fn discover_titles(
    archive: &mut EpubArchive,
    pkg: &PackageDoc,
) -> Option<HashMap<String, String>> {
    // (a) EPUB3 导航文档: properties 含 "nav"
    if let Some((_, item)) = pkg.manifest_in_order().find(|(_, i)| i.has_property("nav")) {
        match archive.read(&item.href) {
            Ok(bytes) => return Some(parse_nav_titles(&bytes, &parent_dir(&item.href))),
            Err(e) => {
                tracing::warn!(href = %item.href, error = %e, "Unreadable nav document");
            }
        }
    }

    // (b) NCX: media type 含 "ncx"
    if let Some((_, item)) = pkg
        .manifest_in_order()
        .find(|(_, i)| i.media_type.contains("ncx"))
    {
        match archive.read(&item.href) {
            Ok(bytes) => return Some(parse_ncx_titles(&bytes, &parent_dir(&item.href))),
            Err(e) => {
                tracing::warn!(href = %item.href, error = %e, "Unreadable NCX document");
            }
        }
    }

    // (c) 无目录文档，章节使用 href 兜底标题
    None
}

/// 四级封面发现
///
/// (a) meta name="cover" 指向的条目
/// (b) 首个 properties 含 "cover-image" 的条目
/// (c) 首个 id 或 href 含 "cover" 的图片条目
/// (d) manifest 中第一张图片
fn discover_cover(archive: &mut EpubArchive, pkg: &PackageDoc) -> Option<CoverImage> {
    let by_meta = pkg
        .cover_meta_id
        .as_ref()
        .and_then(|id| pkg.manifest.get(id));

    let item = by_meta
        .or_else(|| {
            pkg.manifest_in_order()
                .map(|(_, item)| item)
                .find(|item| item.has_property("cover-image"))
        })
        .or_else(|| {
            pkg.manifest_in_order()
                .find(|(id, item)| {
                    item.is_image() && (id.contains("cover") || item.href.contains("cover"))
                })
                .map(|(_, item)| item)
        })
        .or_else(|| {
            pkg.manifest_in_order()
                .map(|(_, item)| item)
                .find(|item| item.is_image())
        })?;

    match archive.read(&item.href) {
        Ok(bytes) => Some(CoverImage::new(bytes, item.media_type.clone())),
        Err(e) => {
            tracing::warn!(href = %item.href, error = %e, "Unreadable cover image");
            None
        }
    }
}
