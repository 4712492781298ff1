//! HTML 剥离 - 从章节 XHTML 中提取纯文本
//!
//! 单遍事件流解析，不构建 DOM:
//! - script/style 元素内容整体丢弃
//! - 块级元素在开始与结束处产生换行边界
//! - 实体引用（命名 + 数字）就地解析

use quick_xml::events::Event;
use quick_xml::Reader;

use super::NormalizeError;

/// 产生换行边界的块级元素
fn is_block_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"br"
            | b"li"
            | b"blockquote"
            | b"ul"
            | b"ol"
            | b"tr"
            | b"table"
            | b"section"
            | b"article"
    )
}

/// 内容整体丢弃的元素
fn is_skipped_element(name: &[u8]) -> bool {
    matches!(name, b"script" | b"style")
}

/// 去掉命名空间前缀，返回局部名
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// 解析实体引用（& 与 ; 之间的内容）
///
/// 覆盖 XML 五实体、书籍文本常见的排版实体与数字字符引用。
/// 未知实体返回 None，调用方以空格代替。
fn resolve_entity(name: &str) -> Option<String> {
    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201C}",
        "rdquo" => "\u{201D}",
        "shy" => "",
        _ => {
            // 数字字符引用: &#8217; 或 &#x2019;
            let code = name.strip_prefix('#')?;
            let value = if let Some(hex) = code.strip_prefix('x').or_else(|| code.strip_prefix('X'))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                code.parse::<u32>().ok()?
            };
            return char::from_u32(value).map(String::from);
        }
    };
    Some(resolved.to_string())
}

/// 提取章节纯文本
///
/// 输出保留块级边界产生的换行，空白压缩留给管线后续阶段。
pub fn extract_text(html: &[u8]) -> Result<String, NormalizeError> {
    let content = String::from_utf8_lossy(html);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().check_end_names = false;

    let mut out = String::with_capacity(content.len() / 2);
    // script/style 嵌套深度，> 0 时丢弃所有文本
    let mut skip_depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if is_skipped_element(local) {
                    skip_depth += 1;
                } else if skip_depth == 0 && is_block_element(local) {
                    out.push('\n');
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if is_skipped_element(local) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0 && is_block_element(local) {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if skip_depth == 0 && is_block_element(local) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(e)) => {
                if skip_depth == 0 {
                    out.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::CData(e)) => {
                if skip_depth == 0 {
                    out.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if skip_depth == 0 {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    match resolve_entity(&entity) {
                        Some(resolved) => out.push_str(&resolved),
                        None => out.push(' '),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NormalizeError::MalformedMarkup(e.to_string())),
            _ => {}
        }
    }

    Ok(out)
}
