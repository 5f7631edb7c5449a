//! 客户端文件名规范化：输出单段、无路径穿越的安全文件名。

use std::fmt;

use crate::storage::StorageError;

const MAX_NAME_BYTES: usize = 255;

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// A file name that passed [`sanitize_name`]. It is always a single path
/// segment, never empty and never starts with `.`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SafeName(String);

impl SafeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 规范化客户端提供的文件名，结果为空时返回 `InvalidName`。
pub fn sanitize_name(raw: &str) -> Result<SafeName, StorageError> {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let mut name = trim_edges(&filtered).to_string();
    // one byte stays free for the device-name prefix
    if name.len() >= MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES - 1;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        name = trim_edges(&name).to_string();
    }
    if is_device_name(&name) {
        name.insert(0, '_');
    }

    if name.is_empty() {
        return Err(StorageError::InvalidName(raw.to_string()));
    }
    Ok(SafeName(name))
}

fn trim_edges(value: &str) -> &str {
    value.trim_matches(['.', '_'])
}

fn is_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
}
