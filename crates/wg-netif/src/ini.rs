//! Minimal INI reader for WireGuard configuration files.
//!
//! Section and key names are case-insensitive. Values are trimmed. A key
//! repeated within one section accumulates, joined by `,`, which is how
//! `AllowedIPs` and `Address` may be split over several lines.

use std::collections::HashMap;

/// Parsed sections, keyed by lowercase section then lowercase key
#[derive(Debug, Default, Clone)]
pub(crate) struct IniFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniFile {
    /// Parse a document; `Err` holds the 1-based number of a malformed line
    pub(crate) fn parse(text: &str) -> Result<Self, usize> {
        let mut ini = IniFile::default();
        let mut section = String::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or(idx + 1)?;
                section = name.trim().to_lowercase();
                continue;
            }

            let (key, value) = line.split_once('=').ok_or(idx + 1)?;
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(idx + 1);
            }

            ini.sections
                .entry(section.clone())
                .or_default()
                .entry(key)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(value.trim());
                })
                .or_insert_with(|| value.trim().to_string());
        }

        Ok(ini)
    }

    /// Look up a value; `section` and `key` must be lowercase
    pub(crate) fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }

    /// Look up a value, falling back when the key is absent
    pub(crate) fn get_or<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key).unwrap_or(default)
    }
}
