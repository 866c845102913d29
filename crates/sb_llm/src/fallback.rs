//! 候选 Provider 列表

use sb_core::ProviderKind;

/// 一次调用的有序、去重候选列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList {
    providers: Vec<ProviderKind>,
}

impl CandidateList {
    /// 调用方显式指定 Provider：只尝试这一个
    pub fn explicit(provider: ProviderKind) -> Self {
        Self {
            providers: vec![provider],
        }
    }

    /// 首选 Provider 排在前面，其余按默认顺序；重复项保留第一次出现
    pub fn from_preferences(preferred: Option<ProviderKind>, order: &[ProviderKind]) -> Self {
        let mut providers = Vec::with_capacity(order.len() + 1);
        for kind in preferred.into_iter().chain(order.iter().copied()) {
            if !providers.contains(&kind) {
                providers.push(kind);
            }
        }
        Self { providers }
    }

    pub fn iter(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.providers.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 逗号分隔的 Provider 名称
    pub fn describe(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<ProviderKind> for CandidateList {
    fn from_iter<I: IntoIterator<Item = ProviderKind>>(iter: I) -> Self {
        let order: Vec<_> = iter.into_iter().collect();
        Self::from_preferences(None, &order)
    }
}
