use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// 对象标识符
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Oid(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// 是否位于 `root` 子树之下（不含 root 本身）
    pub fn is_child_of(&self, root: &Oid) -> bool {
        self.0.len() > root.0.len() && self.0.starts_with(&root.0)
    }

    /// 去掉 `root` 前缀后剩余部分，以点号连接
    ///
    /// `.1.3.6.1.2.1.4.20.1.2.10.0.0.1` 相对 `.1.3.6.1.2.1.4.20.1.2` 得到 `10.0.0.1`
    pub fn suffix(&self, root: &Oid) -> Option<String> {
        if !self.is_child_of(root) {
            return None;
        }
        let rest: Vec<String> = self.0[root.0.len()..]
            .iter()
            .map(|arc| arc.to_string())
            .collect();
        Some(rest.join("."))
    }
}

impl FromStr for Oid {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(AppError::Codec(format!("空 OID: '{}'", s)));
        }
        let arcs = trimmed
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| AppError::Codec(format!("无效 OID: '{}'", s)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if arcs.len() < 2 {
            return Err(AppError::Codec(format!("OID 至少需要两段: '{}'", s)));
        }
        Ok(Oid(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for arc in &self.0 {
            write!(f, ".{}", arc)?;
        }
        Ok(())
    }
}
