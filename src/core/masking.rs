//! 送出給 AI 服務前遮蔽敏感資料（卡號、SSN、密碼）。

use crate::utils::error::{Result, SupportError};
use regex::{Regex, RegexBuilder};

/// 遮蔽標記與原始值的對應，依插入順序保存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskMapping {
    entries: Vec<(String, String)>,
}

impl MaskMapping {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, original)| original.as_str())
    }

    fn insert(&mut self, kind: &str, original: &str) -> String {
        let token = format!("[{}_{}]", kind, self.entries.len());
        self.entries.push((token.clone(), original.to_string()));
        token
    }
}

pub struct SensitiveDataMasker {
    card: Regex,
    ssn: Regex,
    passwords: Vec<Regex>,
}

impl SensitiveDataMasker {
    pub fn new() -> Result<Self> {
        let build = |pattern: &str, case_insensitive: bool| {
            RegexBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| SupportError::ConfigError {
                    message: format!("invalid masking pattern {}: {}", pattern, e),
                })
        };

        Ok(Self {
            card: build(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b", false)?,
            ssn: build(r"\b\d{3}-\d{2}-\d{4}\b", false)?,
            passwords: vec![
                build(r"password[:\s]+(\S+)", true)?,
                build(r"pwd[:\s]+(\S+)", true)?,
                build(r"pass[:\s]+(\S+)", true)?,
            ],
        })
    }

    /// 回傳遮蔽後文字與對應表
    ///
    /// 比對一律在原始文字上進行，再以字串替換套用到遮蔽結果。
    pub fn mask(&self, text: &str) -> (String, MaskMapping) {
        let mut mapping = MaskMapping::default();
        let mut masked = text.to_string();

        for m in self.card.find_iter(text) {
            let token = mapping.insert("CARD", m.as_str());
            masked = masked.replace(m.as_str(), &token);
        }

        for m in self.ssn.find_iter(text) {
            let token = mapping.insert("SSN", m.as_str());
            masked = masked.replace(m.as_str(), &token);
        }

        for pattern in &self.passwords {
            for caps in pattern.captures_iter(text) {
                if let Some(secret) = caps.get(1) {
                    let token = mapping.insert("PASSWORD", secret.as_str());
                    masked = masked.replace(secret.as_str(), &token);
                }
            }
        }

        (masked, mapping)
    }

    pub fn unmask(&self, text: &str, mapping: &MaskMapping) -> String {
        mapping
            .entries
            .iter()
            .fold(text.to_string(), |acc, (token, original)| {
                acc.replace(token, original)
            })
    }
}
