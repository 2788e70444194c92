use crate::models::{AliasEntry, OrgEntity, ReferenceTables, TransactionRow};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// 比较键：去空白、转小写
pub fn normalize_key(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 一个维度的名称 + 别名查找表。先精确匹配规范名，再忽略大小写和空白匹配名称与别名。
#[derive(Debug, Default)]
pub struct AliasIndex {
    exact: HashMap<String, String>,
    loose: HashMap<String, String>,
}

impl AliasIndex {
    pub fn from_entries(entries: &[AliasEntry]) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index.insert(&entry.name, &entry.aliases);
        }
        index
    }

    /// 先插入的优先
    pub fn insert(&mut self, name: &str, aliases: &[String]) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.exact
            .entry(name.to_string())
            .or_insert_with(|| name.to_string());
        for key in std::iter::once(name).chain(aliases.iter().map(String::as_str)) {
            let key = normalize_key(key);
            if !key.is_empty() {
                self.loose.entry(key).or_insert_with(|| name.to_string());
            }
        }
    }

    pub fn lookup(&self, raw: &str) -> Option<&str> {
        self.exact
            .get(raw.trim())
            .or_else(|| self.loose.get(&normalize_key(raw)))
            .map(String::as_str)
    }
}

/// 每次生成报表前建立一次的参考表索引
#[derive(Debug, Default)]
pub struct ResolverIndex {
    pub products: AliasIndex,
    pub banks: AliasIndex,
    pub channels: AliasIndex,
    pub branches: AliasIndex,
    postal_channels: BTreeSet<String>,
}

impl ResolverIndex {
    pub fn build(tables: &ReferenceTables, roster: &[OrgEntity]) -> Self {
        let mut channels = AliasIndex::default();
        for channel in &tables.channels {
            channels.insert(&channel.name, &channel.aliases);
        }
        // 花名册里的渠道可能是参考表中的别名，此时归到参考表的规范名
        for entity in roster {
            if channels.lookup(&entity.channel).is_none() {
                channels.insert(&entity.channel, &[]);
            }
        }

        let mut branches = AliasIndex::default();
        for entity in roster {
            branches.insert(&entity.branch, &[]);
        }
        for entry in &tables.network_aliases {
            branches.insert(&entry.name, &entry.aliases);
        }

        let postal_channels = tables
            .channels
            .iter()
            .filter(|channel| channel.postal)
            .map(|channel| normalize_key(&channel.name))
            .collect();

        Self {
            products: AliasIndex::from_entries(&tables.products),
            banks: AliasIndex::from_entries(&tables.banks),
            channels,
            branches,
            postal_channels,
        }
    }

    /// 渠道是否标记为邮政
    pub fn is_postal(&self, channel: &str) -> bool {
        self.postal_channels.contains(&normalize_key(channel))
    }

    /// 花名册渠道换成规范名，与明细解析后的渠道一致
    pub fn canonical_roster(&self, roster: &[OrgEntity]) -> Vec<OrgEntity> {
        roster
            .iter()
            .map(|entity| OrgEntity {
                channel: self
                    .channels
                    .lookup(&entity.channel)
                    .unwrap_or(&entity.channel)
                    .to_string(),
                ..entity.clone()
            })
            .collect()
    }

    /// 由原始文本重新解析规范值，重复调用结果不变
    pub fn resolve_row(&self, row: &mut TransactionRow) {
        (row.product, row.unresolved.product) = resolve(&self.products, row.product_raw.as_deref());
        (row.bank, row.unresolved.bank) = resolve(&self.banks, row.bank_raw.as_deref());
        (row.channel, row.unresolved.channel) = resolve(&self.channels, row.channel_raw.as_deref());
        (row.branch, row.unresolved.branch) = resolve(&self.branches, row.branch_raw.as_deref());
    }
}

/// 找不到时保留原文并标记未解析；原文为空不算未解析
fn resolve(index: &AliasIndex, raw: Option<&str>) -> (Option<String>, bool) {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return (None, false);
    };
    match index.lookup(raw) {
        Some(name) => (Some(name.to_string()), false),
        None => (Some(raw.to_string()), true),
    }
}

/// 各维度未解析的行数及去重后的原文
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnresolvedSummary {
    pub channel: usize,
    pub bank: usize,
    pub product: usize,
    pub branch: usize,
    pub channel_values: BTreeSet<String>,
    pub bank_values: BTreeSet<String>,
    pub product_values: BTreeSet<String>,
    pub branch_values: BTreeSet<String>,
}

impl UnresolvedSummary {
    pub fn collect(rows: &[TransactionRow]) -> Self {
        let mut summary = Self::default();
        for row in rows {
            let flags = row.unresolved;
            tally(flags.channel, &row.channel, &mut summary.channel, &mut summary.channel_values);
            tally(flags.bank, &row.bank, &mut summary.bank, &mut summary.bank_values);
            tally(flags.product, &row.product, &mut summary.product, &mut summary.product_values);
            tally(flags.branch, &row.branch, &mut summary.branch, &mut summary.branch_values);
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.channel + self.bank + self.product + self.branch
    }
}

fn tally(flag: bool, value: &Option<String>, count: &mut usize, values: &mut BTreeSet<String>) {
    if flag {
        *count += 1;
        if let Some(value) = value {
            values.insert(value.clone());
        }
    }
}
