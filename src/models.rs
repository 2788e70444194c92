use crate::error::{ReportError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 关联不上组织架构时使用的兜底分组
pub const UNASSIGNED: &str = "未分配";

/// 单条保单记录（归一化之后的固定结构）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    /// 保单号
    pub policy_no: Option<String>,
    /// 投保人
    pub policyholder: Option<String>,
    /// 险种（原始文本）
    pub product_raw: Option<String>,
    /// 险种（参考表归一后）
    pub product: Option<String>,
    /// 新约保费（年交）
    pub annual_premium: Decimal,
    /// 趸交保费
    pub lump_premium: Decimal,
    /// 源表中的标准保费，仅作核对
    pub standard_premium: Decimal,
    /// 缴费期间，折标率的期限键
    pub payment_term: Option<String>,
    pub channel_raw: Option<String>,
    pub channel: Option<String>,
    pub bank_raw: Option<String>,
    pub bank: Option<String>,
    /// 网点（原始文本）
    pub branch_raw: Option<String>,
    /// 网点（归一后）
    pub branch: Option<String>,
    /// 签单客户经理
    pub manager: Option<String>,
    /// 保单状态
    pub status: Option<String>,
    pub sign_date: Option<NaiveDate>,
    /// 签单月份 1-12，无法解析时为空
    pub month: Option<u32>,
    #[serde(default)]
    pub unresolved: UnresolvedFlags,
    /// 本行字段解析失败次数
    #[serde(default)]
    pub parse_issues: u32,
    #[serde(default)]
    pub source_file: String,
    /// 源表中的行号（从 1 开始）
    #[serde(default)]
    pub source_row: usize,
}

impl TransactionRow {
    pub fn in_range(&self, range: MonthRange) -> bool {
        self.month.is_some_and(|month| range.contains(month))
    }
}

/// 各维度是否未能在参考表中找到
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedFlags {
    pub channel: bool,
    pub bank: bool,
    pub product: bool,
    pub branch: bool,
}

/// 花名册中的一个网点节点：部门 → 渠道 → 网点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgEntity {
    pub department: String,
    pub channel: String,
    pub branch: String,
    pub manager: Option<String>,
}

/// 带别名的参考项（险种、银行、网点简称）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// 渠道参考项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// 邮政渠道不计入非邮保费
    #[serde(default)]
    pub postal: bool,
}

/// 折标率：险种 + 缴费期间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRate {
    pub product: String,
    #[serde(default)]
    pub term: Option<String>,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscountTable {
    pub rates: Vec<DiscountRate>,
    /// 未配置险种时使用的折标率
    pub default_rate: Decimal,
}

impl Default for DiscountTable {
    fn default() -> Self {
        Self {
            rates: Vec::new(),
            default_rate: Decimal::new(1, 1),
        }
    }
}

/// 部门目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub department: String,
    #[serde(default)]
    pub annual_target: Decimal,
    #[serde(default)]
    pub lump_target: Decimal,
}

/// 组织架构图：部门下辖渠道
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgChartNode {
    pub department: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// 标保、规保的换算系数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionFactors {
    pub annual_weight: Decimal,
    pub regulated_lump_weight: Decimal,
}

impl Default for ConversionFactors {
    fn default() -> Self {
        Self {
            annual_weight: Decimal::ONE,
            regulated_lump_weight: Decimal::new(1, 1),
        }
    }
}

/// 全部可编辑参考表的一份快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceTables {
    /// 每次编辑递增
    pub version: u64,
    pub products: Vec<AliasEntry>,
    pub banks: Vec<AliasEntry>,
    pub channels: Vec<ChannelEntry>,
    pub discounts: DiscountTable,
    /// 核心网点白名单
    pub core_networks: Vec<String>,
    /// 网点简称
    pub network_aliases: Vec<AliasEntry>,
    pub targets: Vec<TargetEntry>,
    pub org_chart: Vec<OrgChartNode>,
    pub conversion: ConversionFactors,
}

/// 闭区间月份范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthRange {
    start: u32,
    end: u32,
}

impl MonthRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start < 1 || end > 12 || start > end {
            return Err(ReportError::InvalidMonthRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn full_year() -> Self {
        Self { start: 1, end: 12 }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, month: u32) -> bool {
        (self.start..=self.end).contains(&month)
    }
}
