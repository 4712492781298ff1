//! Archive Reader - ZIP 打包的 EPUB 条目随机读取

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use zip::ZipArchive;

use super::EpubError;

/// EPUB 档案
///
/// 打开时建立规范化条目名索引（反斜杠统一为 `/`），
/// 之后按名随机读取任意条目。
pub struct EpubArchive {
    zip: ZipArchive<BufReader<File>>,
    /// 规范化条目名 -> ZIP 索引
    index: HashMap<String, usize>,
}

/// 规范化档案内路径
fn normalize_name(name: &str) -> String {
    name.replace('\\', "/")
}

impl EpubArchive {
    /// 打开档案并建立条目索引
    pub fn open(path: &Path) -> Result<Self, EpubError> {
        let file = File::open(path)
            .map_err(|e| EpubError::InvalidArchive(format!("{}: {}", path.display(), e)))?;
        let zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| EpubError::InvalidArchive(e.to_string()))?;

        let mut index = HashMap::with_capacity(zip.len());
        for i in 0..zip.len() {
            if let Some(name) = zip.name_for_index(i) {
                index.insert(normalize_name(name), i);
            }
        }

        tracing::debug!(path = %path.display(), entries = index.len(), "EPUB archive opened");
        Ok(Self { zip, index })
    }

    /// 条目是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_name(name))
    }

    /// 读取条目全部字节
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, EpubError> {
        let normalized = normalize_name(name);
        let idx = *self
            .index
            .get(&normalized)
            .ok_or_else(|| EpubError::MissingEntry(normalized.clone()))?;

        let mut entry = self
            .zip
            .by_index(idx)
            .map_err(|e| EpubError::InvalidArchive(e.to_string()))?;

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| EpubError::InvalidArchive(format!("{}: {}", normalized, e)))?;
        Ok(bytes)
    }
}
