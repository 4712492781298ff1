//! Package Document - container.xml 与 OPF 解析
//!
//! 单遍 quick-xml 事件流解析，不构建 DOM。
//! manifest 是 id → 条目 的映射，spine 是 idref 的有序列表，
//! 两者不互相链接。

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::EpubError;

/// manifest 条目
#[derive(Debug, Clone)]
pub struct ManifestItem {
    /// 相对 OPF 目录解析后的档案内路径
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    /// properties 中是否含指定 token
    pub fn has_property(&self, token: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_ascii_whitespace().any(|t| t == token))
    }

    /// 是否为章节可用的 (X)HTML 文档
    pub fn is_document(&self) -> bool {
        self.media_type.contains("html")
    }

    /// 是否为图片
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// 解析后的 OPF 包文档
#[derive(Debug)]
pub struct PackageDoc {
    /// 第一个 dc:title
    pub title: Option<String>,
    /// 第一个 dc:creator
    pub creator: Option<String>,
    /// <meta name="cover" content="..."> 指向的 manifest id
    pub cover_meta_id: Option<String>,
    /// manifest: id -> 条目
    pub manifest: HashMap<String, ManifestItem>,
    /// manifest 条目 id 的文档顺序（封面发现需要"第一个"语义）
    pub manifest_order: Vec<String>,
    /// spine: 有序 idref 列表，即规范阅读顺序
    pub spine: Vec<String>,
}

impl PackageDoc {
    /// 按文档顺序迭代 manifest 条目
    pub fn manifest_in_order(&self) -> impl Iterator<Item = (&String, &ManifestItem)> {
        self.manifest_order
            .iter()
            .filter_map(|id| self.manifest.get(id).map(|item| (id, item)))
    }
}

/// 去掉命名空间前缀
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// 解码 href 中的百分号转义
fn percent_decode(href: &str) -> String {
    let bytes = href.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(value) = u8::from_str_radix(&href[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// 将 href 相对 base 目录解析为档案内路径
///
/// 处理 `./`、`../` 段与百分号转义，fragment 在调用前剥离。
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let decoded = percent_decode(href);
    let mut segments: Vec<&str> = Vec::new();
    if !base_dir.is_empty() {
        segments.extend(base_dir.split('/').filter(|s| !s.is_empty()));
    }
    for part in decoded.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// 路径的父目录（档案内语义）
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

/// 解析 container.xml，返回第一个 rootfile 的 full-path
pub fn parse_container(bytes: &[u8]) -> Result<String, EpubError> {
    let content = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        let path = String::from_utf8_lossy(&attr.value).into_owned();
                        if !path.is_empty() {
                            return Ok(path);
                        }
                    }
                }
                // 首个 rootfile 没有 full-path 即失败
                return Err(EpubError::MissingOpf(
                    "rootfile has no full-path attribute".to_string(),
                ));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::MalformedXml {
                    path: "META-INF/container.xml".to_string(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
    }

    Err(EpubError::MissingOpf(
        "no rootfile element in container.xml".to_string(),
    ))
}

/// 解析 OPF 包文档
///
/// manifest href 在此处解析为档案内路径
pub fn parse_package(bytes: &[u8], opf_path: &str) -> Result<PackageDoc, EpubError> {
    let base_dir = parent_dir(opf_path);
    let content = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut title: Option<String> = None;
    let mut creator: Option<String> = None;
    let mut cover_meta_id: Option<String> = None;
    let mut manifest: HashMap<String, ManifestItem> = HashMap::new();
    let mut manifest_order: Vec<String> = Vec::new();
    let mut spine: Vec<String> = Vec::new();

    let mut in_metadata = false;
    // 正在累积文本的元数据元素
    let mut current_element: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"metadata" => in_metadata = true,
                    b"title" if in_metadata && title.is_none() => {
                        current_element = Some("title");
                        buf_text.clear();
                    }
                    b"creator" if in_metadata && creator.is_none() => {
                        current_element = Some("creator");
                        buf_text.clear();
                    }
                    // 个别生成器不自闭合 manifest/spine 条目
                    b"item" => {
                        if let Some((id, item)) = read_manifest_item(&e, &base_dir) {
                            manifest_order.push(id.clone());
                            manifest.insert(id, item);
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                spine.push(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"item" => {
                        if let Some((id, item)) = read_manifest_item(&e, &base_dir) {
                            manifest_order.push(id.clone());
                            manifest.insert(id, item);
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                spine.push(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    b"meta" if in_metadata => {
                        let mut is_cover = false;
                        let mut content_id: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"name" if attr.value.as_ref() == b"cover" => is_cover = true,
                                b"content" => {
                                    content_id =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned())
                                }
                                _ => {}
                            }
                        }
                        if is_cover && cover_meta_id.is_none() {
                            cover_meta_id = content_id.filter(|c| !c.is_empty());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some() {
                    if let Some(resolved) = resolve_meta_entity(&String::from_utf8_lossy(e.as_ref()))
                    {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element.take() {
                    let text = buf_text.trim().to_string();
                    if !text.is_empty() {
                        match elem {
                            "title" => title = Some(text),
                            "creator" => creator = Some(text),
                            _ => {}
                        }
                    }
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::MalformedXml {
                    path: opf_path.to_string(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
    }

    Ok(PackageDoc {
        title,
        creator,
        cover_meta_id,
        manifest,
        manifest_order,
        spine,
    })
}

/// 读取 manifest item 元素的属性
fn read_manifest_item(
    e: &quick_xml::events::BytesStart<'_>,
    base_dir: &str,
) -> Option<(String, ManifestItem)> {
    let mut id = String::new();
    let mut href = String::new();
    let mut media_type = String::new();
    let mut properties: Option<String> = None;

    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"id" => id = value,
            b"href" => href = value,
            b"media-type" => media_type = value,
            b"properties" => properties = Some(value),
            _ => {}
        }
    }

    if id.is_empty() || href.is_empty() {
        return None;
    }

    Some((
        id,
        ManifestItem {
            href: resolve_href(base_dir, &href),
            media_type,
            properties,
        },
    ))
}

/// 元数据文本中的实体（书名里常见 &amp; 等）
fn resolve_meta_entity(name: &str) -> Option<String> {
    match name {
        "amp" => Some("&".to_string()),
        "lt" => Some("<".to_string()),
        "gt" => Some(">".to_string()),
        "quot" => Some("\"".to_string()),
        "apos" => Some("'".to_string()),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = if let Some(hex) = code.strip_prefix('x').or_else(|| code.strip_prefix('X'))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                code.parse::<u32>().ok()?
            };
            char::from_u32(value).map(String::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &[u8] = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="3.0">
  <metadata>
    <dc:title>Moby Dick</dc:title>
    <dc:title>Second Title Ignored</dc:title>
    <dc:creator>Herman Melville</dc:creator>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="images/whale.jpg" media-type="image/jpeg"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
    <itemref idref="css"/>
  </spine>
</package>"#;

    #[test]
    fn test_parse_container() {
        assert_eq!(parse_container(CONTAINER).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_container_without_rootfile() {
        let result = parse_container(b"<container><rootfiles/></container>");
        assert!(matches!(result, Err(EpubError::MissingOpf(_))));
    }

    #[test]
    fn test_parse_package_metadata() {
        let pkg = parse_package(OPF, "OEBPS/content.opf").unwrap();
        assert_eq!(pkg.title.as_deref(), Some("Moby Dick"));
        assert_eq!(pkg.creator.as_deref(), Some("Herman Melville"));
        assert_eq!(pkg.cover_meta_id.as_deref(), Some("cover-img"));
    }

    #[test]
    fn test_manifest_hrefs_resolved() {
        let pkg = parse_package(OPF, "OEBPS/content.opf").unwrap();
        assert_eq!(pkg.manifest["c1"].href, "OEBPS/text/ch1.xhtml");
        assert_eq!(pkg.manifest["cover-img"].href, "OEBPS/images/whale.jpg");
    }

    #[test]
    fn test_spine_order() {
        let pkg = parse_package(OPF, "OEBPS/content.opf").unwrap();
        assert_eq!(pkg.spine, vec!["c1", "c2", "css"]);
    }

    #[test]
    fn test_manifest_document_order() {
        let pkg = parse_package(OPF, "OEBPS/content.opf").unwrap();
        let ids: Vec<&String> = pkg.manifest_in_order().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["nav", "c1", "c2", "cover-img", "css"]);
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text", "../images/a.png"), "OEBPS/images/a.png");
        assert_eq!(resolve_href("", "ch1.xhtml"), "ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "./ch%201.xhtml"), "OEBPS/ch 1.xhtml");
    }

    #[test]
    fn test_has_property() {
        let item = ManifestItem {
            href: "nav.xhtml".to_string(),
            media_type: "application/xhtml+xml".to_string(),
            properties: Some("nav scripted".to_string()),
        };
        assert!(item.has_property("nav"));
        assert!(!item.has_property("cover-image"));
    }
}
