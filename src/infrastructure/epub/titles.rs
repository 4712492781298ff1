//! 章节标题发现 - EPUB3 导航文档与 NCX 目录
//!
//! 两者都产出 档案内路径 → 显示文本 的映射:
//! - nav: 按文档顺序走 <a href> 列表
//! - ncx: navPoint 的 content@src → navLabel/text
//!
//! fragment（# 之后）在建图前剥离，同一路径首见者胜。
//! 目录文档损坏按无目录处理，不中止解析。

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::package::resolve_href;

/// 去掉命名空间前缀
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// 剥离 fragment
fn strip_fragment(href: &str) -> &str {
    match href.find('#') {
        Some(pos) => &href[..pos],
        None => href,
    }
}

/// 从 EPUB3 导航文档建标题映射
///
/// `nav_dir` 是导航文档自身所在目录，相对 href 以它解析。
pub fn parse_nav_titles(bytes: &[u8], nav_dir: &str) -> HashMap<String, String> {
    let content = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().check_end_names = false;

    let mut titles: HashMap<String, String> = HashMap::new();
    // (href, 已累积文本)；嵌套 <a> 不合法，不予考虑
    let mut current_link: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if local_name(e.name().as_ref()) == b"a" {
                    let href = e.attributes().flatten().find_map(|attr| {
                        (attr.key.as_ref() == b"href")
                            .then(|| String::from_utf8_lossy(&attr.value).into_owned())
                    });
                    if let Some(href) = href {
                        let target = strip_fragment(&href);
                        if !target.is_empty() {
                            current_link =
                                Some((resolve_href(nav_dir, target), String::new()));
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == b"a" {
                    if let Some((target, text)) = current_link.take() {
                        let text = text.trim().to_string();
                        if !text.is_empty() {
                            titles.entry(target).or_insert(text);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, text)) = current_link.as_mut() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some((_, text)) = current_link.as_mut() {
                    if &*e == b"amp" {
                        text.push('&');
                    } else {
                        text.push(' ');
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed nav document, title map may be partial");
                break;
            }
            _ => {}
        }
    }

    titles
}

/// 从 NCX 目录建标题映射
pub fn parse_ncx_titles(bytes: &[u8], ncx_dir: &str) -> HashMap<String, String> {
    let content = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().check_end_names = false;

    let mut titles: HashMap<String, String> = HashMap::new();
    // 当前 navPoint 已见的 navLabel 文本
    let mut pending_label: Option<String> = None;
    let mut in_text = false;
    let mut label_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"navPoint" => {
                    pending_label = None;
                }
                b"text" => {
                    in_text = true;
                    label_buf.clear();
                }
                b"content" => {
                    if let Some(src) = content_src(&e) {
                        store_ncx_entry(&mut titles, ncx_dir, &src, pending_label.take());
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == b"content" {
                    if let Some(src) = content_src(&e) {
                        store_ncx_entry(&mut titles, ncx_dir, &src, pending_label.take());
                    }
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == b"text" && in_text {
                    in_text = false;
                    let text = label_buf.trim().to_string();
                    if !text.is_empty() {
                        pending_label = Some(text);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    label_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text {
                    if &*e == b"amp" {
                        label_buf.push('&');
                    } else {
                        label_buf.push(' ');
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed NCX document, title map may be partial");
                break;
            }
            _ => {}
        }
    }

    titles
}

fn content_src(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        (attr.key.as_ref() == b"src")
            .then(|| String::from_utf8_lossy(&attr.value).into_owned())
    })
}

fn store_ncx_entry(
    titles: &mut HashMap<String, String>,
    ncx_dir: &str,
    src: &str,
    label: Option<String>,
) {
    let target = strip_fragment(src);
    if target.is_empty() {
        return;
    }
    if let Some(label) = label {
        titles
            .entry(resolve_href(ncx_dir, target))
            .or_insert(label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAV: &[u8] = br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
<nav epub:type="toc">
  <ol>
    <li><a href="text/ch1.xhtml">Loomings</a></li>
    <li><a href="text/ch2.xhtml#start">The Carpet-Bag</a></li>
  </ol>
</nav>
</body>
</html>"#;

    const NCX: &[u8] = br#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Loomings</text></navLabel>
      <content src="text/ch1.xhtml"/>
    </navPoint>
    <navPoint id="n2" playOrder="2">
      <navLabel><text>The Carpet-Bag</text></navLabel>
      <content src="text/ch2.xhtml#part"/>
    </navPoint>
  </navMap>
</ncx>"#;

    #[test]
    fn test_nav_titles() {
        let titles = parse_nav_titles(NAV, "OEBPS");
        assert_eq!(titles["OEBPS/text/ch1.xhtml"], "Loomings");
        assert_eq!(titles["OEBPS/text/ch2.xhtml"], "The Carpet-Bag");
    }

    #[test]
    fn test_ncx_titles() {
        let titles = parse_ncx_titles(NCX, "OEBPS");
        assert_eq!(titles["OEBPS/text/ch1.xhtml"], "Loomings");
        assert_eq!(titles["OEBPS/text/ch2.xhtml"], "The Carpet-Bag");
    }

    #[test]
    fn test_first_entry_wins() {
        let nav = br#"<body><nav>
            <a href="a.xhtml">First</a>
            <a href="a.xhtml">Second</a>
        </nav></body>"#;
        let titles = parse_nav_titles(nav, "");
        assert_eq!(titles["a.xhtml"], "First");
    }

    #[test]
    fn test_malformed_nav_is_partial_not_fatal() {
        let titles = parse_nav_titles(b"<nav><a href=\"x.xhtml\">T</a>", "");
        // 不要求结果，但绝不 panic
        let _ = titles;
    }
}
