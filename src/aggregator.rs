use crate::models::{MonthRange, OrgEntity, ReferenceTables, TransactionRow, UNASSIGNED};
use crate::resolver::{normalize_key, ResolverIndex};
use crate::roster::RosterIndex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, error};

/// 合计行的名称
pub const TOTAL_LABEL: &str = "合计";

/// 年交、趸交、标保与件数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PremiumTotals {
    pub qj: Decimal,
    pub dc: Decimal,
    pub bb: Decimal,
    pub policy_count: usize,
}

impl PremiumTotals {
    fn add(&mut self, posting: &Posting) {
        self.qj += posting.qj;
        self.dc += posting.dc;
        self.bb += posting.bb;
        self.policy_count += 1;
    }

    fn merge(&mut self, other: &PremiumTotals) {
        self.qj += other.qj;
        self.dc += other.dc;
        self.bb += other.bb;
        self.policy_count += other.policy_count;
    }
}

/// 日报当天的数据，不受月份范围影响
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyTotals {
    pub qj: Decimal,
    pub dc: Decimal,
    pub policy_count: usize,
}

impl DailyTotals {
    fn add(&mut self, posting: &Posting) {
        self.qj += posting.qj;
        self.dc += posting.dc;
        self.policy_count += 1;
    }

    fn merge(&mut self, other: &DailyTotals) {
        self.qj += other.qj;
        self.dc += other.dc;
        self.policy_count += other.policy_count;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentRow {
    pub department: String,
    #[serde(flatten)]
    pub totals: PremiumTotals,
    pub annual_target: Decimal,
    pub lump_target: Decimal,
    /// 年交达成率（%），目标为 0 时为空
    pub annual_attainment: Option<Decimal>,
    pub lump_attainment: Option<Decimal>,
    pub daily: DailyTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentView {
    pub rows: Vec<DepartmentRow>,
    pub total: DepartmentRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRow {
    pub channel: String,
    pub department: String,
    #[serde(flatten)]
    pub totals: PremiumTotals,
    /// 花名册中该渠道的网点数
    pub total_branches: usize,
    /// 其中范围内有出单的网点数
    pub active_branches: usize,
    pub daily: DailyTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelView {
    pub rows: Vec<ChannelRow>,
    pub total: ChannelRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRow {
    pub manager: String,
    pub department: String,
    #[serde(flatten)]
    pub totals: PremiumTotals,
}

/// 追踪表的成员指标
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingMetrics {
    pub qj: Decimal,
    /// 非邮渠道年交
    pub feiyou: Decimal,
    /// 规保
    pub guibao: Decimal,
    /// 价值趸
    pub jzdc: Decimal,
    /// 规模趸
    pub gmdc: Decimal,
    pub bb: Decimal,
    pub policy_count: usize,
    pub total_branches: usize,
    pub active_branches: usize,
}

impl TrackingMetrics {
    fn add(&mut self, posting: &Posting) {
        self.qj += posting.qj;
        self.feiyou += posting.feiyou;
        self.guibao += posting.guibao;
        self.jzdc += posting.jzdc;
        self.gmdc += posting.dc;
        self.bb += posting.bb;
        self.policy_count += 1;
    }

    fn merge(&mut self, other: &TrackingMetrics) {
        self.qj += other.qj;
        self.feiyou += other.feiyou;
        self.guibao += other.guibao;
        self.jzdc += other.jzdc;
        self.gmdc += other.gmdc;
        self.bb += other.bb;
        self.policy_count += other.policy_count;
        self.total_branches += other.total_branches;
        self.active_branches += other.active_branches;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingMember {
    pub manager: String,
    #[serde(flatten)]
    pub metrics: TrackingMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingDepartment {
    pub department: String,
    pub members: Vec<TrackingMember>,
    pub subtotal: TrackingMetrics,
}

/// 核心网点逐月年交
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreNetworkRow {
    pub branch: String,
    pub channel: String,
    pub department: String,
    /// 1-12 月，不受月份范围影响
    pub monthly: [Decimal; 12],
    /// 所选月份范围内的年交
    pub range_total: Decimal,
    pub policy_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRow {
    pub product: String,
    #[serde(flatten)]
    pub totals: PremiumTotals,
}

/// 某个视图的合计，用于与明细核对
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewTotal {
    pub view: String,
    pub qj: Decimal,
    pub dc: Decimal,
    pub policy_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationCheck {
    pub raw_qj: Decimal,
    pub raw_dc: Decimal,
    pub raw_count: usize,
    pub views: Vec<ViewTotal>,
    pub balanced: bool,
}

/// 核对允许的误差
pub fn reconciliation_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// 一次汇总的全部结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub departments: DepartmentView,
    pub channels: ChannelView,
    pub people: Vec<PersonRow>,
    pub tracking: Vec<TrackingDepartment>,
    pub core_networks: Vec<CoreNetworkRow>,
    pub products: Vec<ProductRow>,
    pub reconciliation: ReconciliationCheck,
    pub in_range_rows: usize,
    pub undated_rows: usize,
    pub roster_conflicts: usize,
}

/// 一行保单关联组织架构、折算后的记账结果
#[derive(Debug)]
struct Posting<'r> {
    row: &'r TransactionRow,
    department: String,
    channel: String,
    branch: String,
    manager: String,
    product: String,
    qj: Decimal,
    dc: Decimal,
    bb: Decimal,
    jzdc: Decimal,
    guibao: Decimal,
    feiyou: Decimal,
}

/// 折标率索引：(险种, 缴费期间) → 险种 → 默认
struct DiscountIndex {
    by_term: HashMap<(String, String), Decimal>,
    by_product: HashMap<String, Decimal>,
    default_rate: Decimal,
}

impl DiscountIndex {
    fn build(tables: &ReferenceTables, resolver: &ResolverIndex) -> Self {
        let mut by_term = HashMap::new();
        let mut by_product = HashMap::new();
        for entry in &tables.discounts.rates {
            let product = resolver
                .products
                .lookup(&entry.product)
                .unwrap_or(&entry.product);
            let product = normalize_key(product);
            match entry.term.as_deref().map(normalize_key) {
                Some(term) if !term.is_empty() => {
                    by_term.entry((product, term)).or_insert(entry.rate);
                }
                _ => {
                    by_product.entry(product).or_insert(entry.rate);
                }
            }
        }
        Self {
            by_term,
            by_product,
            default_rate: tables.discounts.default_rate,
        }
    }

    fn rate(&self, product: Option<&str>, term: Option<&str>) -> Decimal {
        let Some(product) = product.map(normalize_key) else {
            return self.default_rate;
        };
        term.map(normalize_key)
            .and_then(|term| self.by_term.get(&(product.clone(), term)))
            .or_else(|| self.by_product.get(&product))
            .copied()
            .unwrap_or(self.default_rate)
    }
}

struct Engine<'a> {
    roster: RosterIndex<'a>,
    resolver: &'a ResolverIndex,
    discounts: DiscountIndex,
    tables: &'a ReferenceTables,
}

impl<'a> Engine<'a> {
    /// 网点 → 花名册 → 渠道、部门；关联不上的层级落到“未分配”
    fn post<'r>(&self, row: &'r TransactionRow) -> Posting<'r> {
        let entity = row.branch.as_deref().and_then(|b| self.roster.branch(b));

        let branch = entity
            .map(|e| e.branch.clone())
            .or_else(|| row.branch.clone())
            .unwrap_or_else(|| UNASSIGNED.to_string());
        let channel = entity
            .map(|e| e.channel.clone())
            .or_else(|| row.channel.clone())
            .unwrap_or_else(|| UNASSIGNED.to_string());
        let department = entity
            .map(|e| e.department.clone())
            .or_else(|| self.roster.channel_department(&channel).map(str::to_string))
            .unwrap_or_else(|| UNASSIGNED.to_string());
        let manager = row
            .manager
            .clone()
            .or_else(|| entity.and_then(|e| e.manager.clone()))
            .unwrap_or_else(|| UNASSIGNED.to_string());

        let factors = &self.tables.conversion;
        let qj = row.annual_premium;
        let dc = row.lump_premium;
        let rate = self
            .discounts
            .rate(row.product.as_deref(), row.payment_term.as_deref());
        let jzdc = dc * rate;
        let canonical_channel = self.resolver.channels.lookup(&channel).unwrap_or(&channel);
        let feiyou = if self.resolver.is_postal(canonical_channel) {
            Decimal::ZERO
        } else {
            qj
        };

        Posting {
            row,
            department,
            channel,
            branch,
            manager,
            product: row.product.clone().unwrap_or_else(|| UNASSIGNED.to_string()),
            qj,
            dc,
            bb: qj * factors.annual_weight + jzdc,
            jzdc,
            guibao: qj + dc * factors.regulated_lump_weight,
            feiyou,
        }
    }
}

/// 按月份范围汇总所有视图；相同输入必得相同输出
pub fn aggregate(
    rows: &[TransactionRow],
    roster: &[OrgEntity],
    tables: &ReferenceTables,
    resolver: &ResolverIndex,
    daily: Option<&[TransactionRow]>,
    range: MonthRange,
) -> Aggregation {
    let roster = resolver.canonical_roster(roster);
    let engine = Engine {
        roster: RosterIndex::build(&roster),
        resolver,
        discounts: DiscountIndex::build(tables, resolver),
        tables,
    };

    let postings: Vec<Posting> = rows.iter().map(|row| engine.post(row)).collect();
    let in_range: Vec<&Posting> = postings.iter().filter(|p| p.row.in_range(range)).collect();
    let daily_postings: Vec<Posting> = daily
        .unwrap_or_default()
        .iter()
        .map(|row| engine.post(row))
        .collect();
    let undated_rows = rows.iter().filter(|row| row.month.is_none()).count();

    let active: HashSet<String> = in_range.iter().map(|p| normalize_key(&p.branch)).collect();
    let count_active = |branches: &BTreeSet<String>| {
        branches
            .iter()
            .filter(|b| active.contains(&normalize_key(b)))
            .count()
    };

    let departments = department_view(&engine, &in_range, &daily_postings);
    let channels = channel_view(&engine, &in_range, &daily_postings, &count_active);
    let people = person_view(&engine, &in_range);
    let tracking = tracking_view(&engine, &in_range, &count_active);
    let core_networks = core_network_view(&engine, &postings, range);
    let products = product_view(&in_range);

    let reconciliation = reconcile(&in_range, &departments, &channels, &people, &tracking, &products);
    if !reconciliation.balanced {
        error!(?reconciliation, "报表各视图合计与明细不一致");
    }
    debug!(
        rows = rows.len(),
        in_range = in_range.len(),
        undated_rows,
        start = range.start(),
        end = range.end(),
        "汇总完成"
    );

    Aggregation {
        departments,
        channels,
        people,
        tracking,
        core_networks,
        products,
        reconciliation,
        in_range_rows: in_range.len(),
        undated_rows,
        roster_conflicts: engine.roster.conflicts(),
    }
}

/// 达成率（%），目标不为正时无意义
pub fn attainment(value: Decimal, target: Decimal) -> Option<Decimal> {
    if target <= Decimal::ZERO {
        return None;
    }
    value
        .checked_div(target)
        .map(|ratio| (ratio * Decimal::ONE_HUNDRED).round_dp(2))
}

/// BTreeMap 顺序输出，“未分配”排最后
fn unassigned_last<T>(map: BTreeMap<String, T>) -> Vec<(String, T)> {
    let (mut named, unassigned): (Vec<_>, Vec<_>) =
        map.into_iter().partition(|(key, _)| key != UNASSIGNED);
    named.extend(unassigned);
    named
}

#[derive(Default)]
struct DepartmentAcc {
    totals: PremiumTotals,
    daily: DailyTotals,
}

fn department_view(engine: &Engine, in_range: &[&Posting], daily: &[Posting]) -> DepartmentView {
    let targets: HashMap<String, (Decimal, Decimal)> = engine
        .tables
        .targets
        .iter()
        .map(|t| (normalize_key(&t.department), (t.annual_target, t.lump_target)))
        .collect();

    // 目标表中的部门名按比较键并入花名册的写法
    let mut seeded: HashMap<String, String> = HashMap::new();
    for department in engine.roster.departments() {
        seeded
            .entry(normalize_key(department))
            .or_insert_with(|| department.clone());
    }
    for target in &engine.tables.targets {
        seeded
            .entry(normalize_key(&target.department))
            .or_insert_with(|| target.department.trim().to_string());
    }
    let mut groups: BTreeMap<String, DepartmentAcc> = seeded
        .into_values()
        .map(|department| (department, DepartmentAcc::default()))
        .collect();

    let mut grand = DepartmentAcc::default();
    for posting in in_range {
        groups
            .entry(posting.department.clone())
            .or_default()
            .totals
            .add(posting);
        grand.totals.add(posting);
    }
    for posting in daily {
        groups
            .entry(posting.department.clone())
            .or_default()
            .daily
            .add(posting);
        grand.daily.add(posting);
    }

    let build = |department: String, acc: DepartmentAcc, target: (Decimal, Decimal)| DepartmentRow {
        annual_attainment: attainment(acc.totals.qj, target.0),
        lump_attainment: attainment(acc.totals.dc, target.1),
        department,
        totals: acc.totals,
        annual_target: target.0,
        lump_target: target.1,
        daily: acc.daily,
    };

    let mut target_sum = (Decimal::ZERO, Decimal::ZERO);
    let rows: Vec<DepartmentRow> = unassigned_last(groups)
        .into_iter()
        .map(|(department, acc)| {
            let target = targets
                .get(&normalize_key(&department))
                .copied()
                .unwrap_or_default();
            target_sum.0 += target.0;
            target_sum.1 += target.1;
            build(department, acc, target)
        })
        .collect();

    DepartmentView {
        total: build(TOTAL_LABEL.to_string(), grand, target_sum),
        rows,
    }
}

#[derive(Default)]
struct ChannelAcc {
    department: Option<String>,
    totals: PremiumTotals,
    daily: DailyTotals,
}

fn channel_view(
    engine: &Engine,
    in_range: &[&Posting],
    daily: &[Posting],
    count_active: &dyn Fn(&BTreeSet<String>) -> usize,
) -> ChannelView {
    let mut groups: BTreeMap<String, ChannelAcc> = BTreeMap::new();
    for channel in engine.roster.channels() {
        groups.entry(channel.clone()).or_default();
    }
    for posting in in_range {
        let acc = groups.entry(posting.channel.clone()).or_default();
        acc.department.get_or_insert_with(|| posting.department.clone());
        acc.totals.add(posting);
    }
    for posting in daily {
        let acc = groups.entry(posting.channel.clone()).or_default();
        acc.department.get_or_insert_with(|| posting.department.clone());
        acc.daily.add(posting);
    }

    let mut total = ChannelRow {
        channel: TOTAL_LABEL.to_string(),
        department: String::new(),
        totals: PremiumTotals::default(),
        total_branches: 0,
        active_branches: 0,
        daily: DailyTotals::default(),
    };
    let rows: Vec<ChannelRow> = unassigned_last(groups)
        .into_iter()
        .map(|(channel, acc)| {
            let branches = engine.roster.branches_of_channel(&channel);
            let department = engine
                .roster
                .channel_department(&channel)
                .map(str::to_string)
                .or(acc.department)
                .unwrap_or_else(|| UNASSIGNED.to_string());
            let row = ChannelRow {
                total_branches: branches.map_or(0, |b| b.len()),
                active_branches: branches.map_or(0, count_active),
                channel,
                department,
                totals: acc.totals,
                daily: acc.daily,
            };
            total.totals.merge(&row.totals);
            total.daily.merge(&row.daily);
            total.total_branches += row.total_branches;
            total.active_branches += row.active_branches;
            row
        })
        .collect();

    ChannelView { rows, total }
}

fn person_view(engine: &Engine, in_range: &[&Posting]) -> Vec<PersonRow> {
    let mut groups: BTreeMap<String, (String, PremiumTotals)> = BTreeMap::new();
    for manager in engine.roster.managers() {
        let department = engine
            .roster
            .manager_department(manager)
            .unwrap_or(UNASSIGNED)
            .to_string();
        groups.insert(manager.clone(), (department, PremiumTotals::default()));
    }
    for posting in in_range {
        groups
            .entry(posting.manager.clone())
            .or_insert_with(|| (posting.department.clone(), PremiumTotals::default()))
            .1
            .add(posting);
    }

    unassigned_last(groups)
        .into_iter()
        .map(|(manager, (department, totals))| PersonRow {
            manager,
            department,
            totals,
        })
        .collect()
}

fn tracking_view(
    engine: &Engine,
    in_range: &[&Posting],
    count_active: &dyn Fn(&BTreeSet<String>) -> usize,
) -> Vec<TrackingDepartment> {
    let mut groups: BTreeMap<String, BTreeMap<String, TrackingMetrics>> = BTreeMap::new();
    for (department, manager) in engine.roster.members() {
        groups
            .entry(department.clone())
            .or_default()
            .entry(manager.clone())
            .or_default();
    }
    for posting in in_range {
        groups
            .entry(posting.department.clone())
            .or_default()
            .entry(posting.manager.clone())
            .or_default()
            .add(posting);
    }

    unassigned_last(groups)
        .into_iter()
        .map(|(department, members)| {
            let mut subtotal = TrackingMetrics::default();
            let members: Vec<TrackingMember> = unassigned_last(members)
                .into_iter()
                .map(|(manager, mut metrics)| {
                    if let Some(branches) = engine.roster.branches_of_member(&department, &manager) {
                        metrics.total_branches = branches.len();
                        metrics.active_branches = count_active(branches);
                    }
                    subtotal.merge(&metrics);
                    TrackingMember { manager, metrics }
                })
                .collect();
            TrackingDepartment {
                department,
                members,
                subtotal,
            }
        })
        .collect()
}

fn core_network_view(engine: &Engine, postings: &[Posting], range: MonthRange) -> Vec<CoreNetworkRow> {
    let mut rows: Vec<CoreNetworkRow> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();
    for name in &engine.tables.core_networks {
        let canonical = engine.resolver.branches.lookup(name).unwrap_or(name.trim());
        if canonical.is_empty() {
            continue;
        }
        let key = normalize_key(canonical);
        if position.contains_key(&key) {
            continue;
        }
        let entity = engine.roster.branch(canonical);
        position.insert(key, rows.len());
        rows.push(CoreNetworkRow {
            branch: canonical.to_string(),
            channel: entity.map_or_else(|| UNASSIGNED.to_string(), |e| e.channel.clone()),
            department: entity.map_or_else(|| UNASSIGNED.to_string(), |e| e.department.clone()),
            monthly: [Decimal::ZERO; 12],
            range_total: Decimal::ZERO,
            policy_count: 0,
        });
    }

    for posting in postings {
        let Some(&idx) = position.get(&normalize_key(&posting.branch)) else {
            continue;
        };
        let Some(month) = posting.row.month.filter(|m| (1..=12).contains(m)) else {
            continue;
        };
        let row = &mut rows[idx];
        row.monthly[(month - 1) as usize] += posting.qj;
        if range.contains(month) {
            row.range_total += posting.qj;
            row.policy_count += 1;
        }
    }
    rows
}

fn product_view(in_range: &[&Posting]) -> Vec<ProductRow> {
    let mut groups: BTreeMap<String, PremiumTotals> = BTreeMap::new();
    for posting in in_range {
        groups.entry(posting.product.clone()).or_default().add(posting);
    }
    unassigned_last(groups)
        .into_iter()
        .map(|(product, totals)| ProductRow { product, totals })
        .collect()
}

fn reconcile(
    in_range: &[&Posting],
    departments: &DepartmentView,
    channels: &ChannelView,
    people: &[PersonRow],
    tracking: &[TrackingDepartment],
    products: &[ProductRow],
) -> ReconciliationCheck {
    let mut raw = PremiumTotals::default();
    for posting in in_range {
        raw.add(posting);
    }

    let sum = |view: &str, totals: &mut dyn Iterator<Item = (Decimal, Decimal, usize)>| {
        let mut total = ViewTotal {
            view: view.to_string(),
            qj: Decimal::ZERO,
            dc: Decimal::ZERO,
            policy_count: 0,
        };
        for (qj, dc, count) in totals {
            total.qj += qj;
            total.dc += dc;
            total.policy_count += count;
        }
        total
    };
    let triple = |t: &PremiumTotals| (t.qj, t.dc, t.policy_count);

    let views = vec![
        sum("部门", &mut departments.rows.iter().map(|r| triple(&r.totals))),
        sum("部门合计", &mut std::iter::once(triple(&departments.total.totals))),
        sum("渠道", &mut channels.rows.iter().map(|r| triple(&r.totals))),
        sum("人力", &mut people.iter().map(|r| triple(&r.totals))),
        sum(
            "追踪",
            &mut tracking
                .iter()
                .flat_map(|d| d.members.iter())
                .map(|m| (m.metrics.qj, m.metrics.gmdc, m.metrics.policy_count)),
        ),
        sum("险种", &mut products.iter().map(|r| triple(&r.totals))),
    ];

    let tolerance = reconciliation_tolerance();
    let balanced = views.iter().all(|view| {
        (view.qj - raw.qj).abs() <= tolerance
            && (view.dc - raw.dc).abs() <= tolerance
            && view.policy_count == raw.policy_count
    });

    ReconciliationCheck {
        raw_qj: raw.qj,
        raw_dc: raw.dc,
        raw_count: raw.policy_count,
        views,
        balanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AliasEntry, ChannelEntry, DiscountRate, DiscountTable, TargetEntry};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    struct Fixture {
        roster: Vec<OrgEntity>,
        tables: ReferenceTables,
        rows: Vec<TransactionRow>,
    }

    fn entity(department: &str, channel: &str, branch: &str, manager: &str) -> OrgEntity {
        OrgEntity {
            department: department.to_string(),
            channel: channel.to_string(),
            branch: branch.to_string(),
            manager: Some(manager.to_string()),
        }
    }

    fn row(branch: &str, product: &str, month: Option<u32>, qj: Decimal, dc: Decimal) -> TransactionRow {
        TransactionRow {
            branch_raw: Some(branch.to_string()),
            product_raw: Some(product.to_string()),
            annual_premium: qj,
            lump_premium: dc,
            sign_date: month.and_then(|m| NaiveDate::from_ymd_opt(2024, m, 1)),
            month,
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        let roster = vec![
            entity("银保一部", "工行渠道", "城东支行", "张三"),
            entity("银保一部", "工行渠道", "城西支行", "张三"),
            entity("银保二部", "邮储渠道", "邮储中心", "李四"),
        ];
        let tables = ReferenceTables {
            products: vec![AliasEntry {
                name: "鑫享年金".to_string(),
                aliases: vec!["鑫享".to_string()],
            }],
            channels: vec![ChannelEntry {
                name: "邮储渠道".to_string(),
                aliases: vec!["邮政".to_string()],
                postal: true,
            }],
            discounts: DiscountTable {
                rates: vec![
                    DiscountRate {
                        product: "鑫享年金".to_string(),
                        term: Some("趸交".to_string()),
                        rate: dec!(0.5),
                    },
                    DiscountRate {
                        product: "鑫享".to_string(),
                        term: None,
                        rate: dec!(0.3),
                    },
                ],
                ..Default::default()
            },
            targets: vec![TargetEntry {
                department: "银保一部".to_string(),
                annual_target: dec!(10000),
                lump_target: dec!(0),
            }],
            core_networks: vec![
                "城东支行".to_string(),
                " 城东支行 ".to_string(),
                "不存在网点".to_string(),
            ],
            ..Default::default()
        };

        let mut lump = row("城西支行", "鑫享年金", Some(3), dec!(0), dec!(2000));
        lump.payment_term = Some("趸交".to_string());
        let stray = row("未知网点", "其他险种", Some(6), dec!(300), dec!(0));
        let mut east = row("城东支行", "鑫享", Some(1), dec!(1000), dec!(0));
        east.manager = Some("张三".to_string());

        let rows = vec![
            east,
            lump,
            row("邮储中心", "其他险种", Some(3), dec!(500), dec!(0)),
            stray,
            row("城东支行", "鑫享", None, dec!(999), dec!(0)),
            row("城东支行", "鑫享", Some(12), dec!(100), dec!(0)),
        ];
        Fixture { roster, tables, rows }
    }

    impl Fixture {
        fn resolved(&self, rows: &[TransactionRow]) -> (ResolverIndex, Vec<TransactionRow>) {
            let resolver = ResolverIndex::build(&self.tables, &self.roster);
            let rows = rows
                .iter()
                .cloned()
                .map(|mut row| {
                    resolver.resolve_row(&mut row);
                    row
                })
                .collect();
            (resolver, rows)
        }

        fn run(&self, start: u32, end: u32) -> Aggregation {
            let (resolver, rows) = self.resolved(&self.rows);
            aggregate(
                &rows,
                &self.roster,
                &self.tables,
                &resolver,
                None,
                MonthRange::new(start, end).unwrap(),
            )
        }
    }

    #[test]
    fn every_range_reconciles_with_raw_rows() {
        let fixture = fixture();
        for start in 1..=12 {
            for end in start..=12 {
                let range = MonthRange::new(start, end).unwrap();
                let expected: Decimal = fixture
                    .rows
                    .iter()
                    .filter(|row| row.in_range(range))
                    .map(|row| row.annual_premium)
                    .sum();
                let expected_count = fixture.rows.iter().filter(|row| row.in_range(range)).count();

                let agg = fixture.run(start, end);
                let dept_qj: Decimal = agg.departments.rows.iter().map(|r| r.totals.qj).sum();
                let dept_count: usize = agg.departments.rows.iter().map(|r| r.totals.policy_count).sum();
                assert_eq!(dept_qj, expected, "range {start}-{end}");
                assert_eq!(dept_count, expected_count, "range {start}-{end}");
                assert_eq!(agg.departments.total.totals.qj, expected);
                assert_eq!(agg.in_range_rows, expected_count);
                assert!(agg.reconciliation.balanced, "range {start}-{end}");
            }
        }
    }

    #[test]
    fn unmatched_rows_land_in_trailing_unassigned_bucket() {
        let agg = fixture().run(1, 12);
        let names: Vec<&str> = agg
            .departments
            .rows
            .iter()
            .map(|r| r.department.as_str())
            .collect();
        assert_eq!(names, vec!["银保一部", "银保二部", UNASSIGNED]);
        let unassigned = agg.departments.rows.last().unwrap();
        assert_eq!(unassigned.totals.qj, dec!(300));
        assert_eq!(unassigned.totals.policy_count, 1);

        let channels: Vec<&str> = agg.channels.rows.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(channels, vec!["工行渠道", "邮储渠道", UNASSIGNED]);
        assert_eq!(agg.people.last().unwrap().manager, UNASSIGNED);
        assert_eq!(agg.undated_rows, 1);
    }

    #[test]
    fn attainment_needs_a_positive_target() {
        let agg = fixture().run(1, 12);
        let first = &agg.departments.rows[0];
        assert_eq!(first.annual_target, dec!(10000));
        assert_eq!(first.annual_attainment, Some(dec!(11)));
        assert_eq!(first.lump_attainment, None);
        assert_eq!(agg.departments.rows[1].annual_attainment, None);

        assert_eq!(attainment(dec!(50), dec!(0)), None);
        assert_eq!(attainment(dec!(50), dec!(-1)), None);
        assert_eq!(attainment(dec!(1), dec!(3)), Some(dec!(33.33)));
    }

    #[test]
    fn postal_channel_is_excluded_from_feiyou() {
        let agg = fixture().run(1, 12);
        let member = |department: &str, manager: &str| -> TrackingMetrics {
            agg.tracking
                .iter()
                .find(|d| d.department == department)
                .and_then(|d| d.members.iter().find(|m| m.manager == manager))
                .map(|m| m.metrics.clone())
                .unwrap()
        };
        let postal = member("银保二部", "李四");
        assert_eq!(postal.qj, dec!(500));
        assert_eq!(postal.feiyou, dec!(0));

        let regular = member("银保一部", "张三");
        assert_eq!(regular.qj, dec!(1100));
        assert_eq!(regular.feiyou, dec!(1100));
    }

    #[test]
    fn channel_alias_drives_department_and_postal_flag() {
        let mut fixture = fixture();
        let mut via_alias = row("新开网点", "其他险种", Some(2), dec!(80), dec!(0));
        via_alias.channel_raw = Some("邮政".to_string());
        fixture.rows = vec![via_alias];

        let agg = fixture.run(2, 2);
        let tracking = agg
            .tracking
            .iter()
            .find(|d| d.department == "银保二部")
            .unwrap();
        assert_eq!(tracking.subtotal.qj, dec!(80));
        assert_eq!(tracking.subtotal.feiyou, dec!(0));
    }

    #[test]
    fn roster_channel_written_as_alias_is_still_postal() {
        let mut fixture = fixture();
        fixture.roster[2].channel = "邮政".to_string();
        fixture.rows = vec![row("邮储中心", "其他险种", Some(4), dec!(500), dec!(0))];

        let agg = fixture.run(4, 4);
        let postal = agg
            .tracking
            .iter()
            .find(|d| d.department == "银保二部")
            .unwrap();
        assert_eq!(postal.subtotal.qj, dec!(500));
        assert_eq!(postal.subtotal.feiyou, dec!(0));

        let channels: Vec<&str> = agg.channels.rows.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(channels, vec!["工行渠道", "邮储渠道"]);
        assert_eq!(agg.channels.rows[1].department, "银保二部");
        assert_eq!(agg.channels.rows[1].total_branches, 1);
    }

    #[test]
    fn target_department_spelling_merges_with_roster() {
        let mut fixture = fixture();
        fixture.tables.targets[0].department = "银保 一部".to_string();

        let agg = fixture.run(1, 12);
        let names: Vec<&str> = agg
            .departments
            .rows
            .iter()
            .map(|r| r.department.as_str())
            .collect();
        assert_eq!(names, vec!["银保一部", "银保二部", UNASSIGNED]);
        assert_eq!(agg.departments.rows[0].annual_target, dec!(10000));
        assert_eq!(agg.departments.rows[0].annual_attainment, Some(dec!(11)));
        assert_eq!(agg.departments.total.annual_target, dec!(10000));
    }

    #[test]
    fn lump_metrics_use_discount_lookup_order() {
        let agg = fixture().run(3, 3);
        let zhang = agg
            .tracking
            .iter()
            .flat_map(|d| d.members.iter())
            .find(|m| m.manager == "张三")
            .unwrap();
        // 鑫享年金 + 趸交 命中期限折标率 0.5
        assert_eq!(zhang.metrics.jzdc, dec!(1000));
        assert_eq!(zhang.metrics.gmdc, dec!(2000));
        assert_eq!(zhang.metrics.guibao, dec!(200));
        assert_eq!(zhang.metrics.bb, dec!(1000));

        let fixture = fixture();
        let (resolver, _) = fixture.resolved(&[]);
        let discounts = DiscountIndex::build(&fixture.tables, &resolver);
        assert_eq!(discounts.rate(Some("鑫享年金"), Some("趸交")), dec!(0.5));
        assert_eq!(discounts.rate(Some("鑫享年金"), Some("10年")), dec!(0.3));
        assert_eq!(discounts.rate(Some("其他险种"), None), dec!(0.1));
        assert_eq!(discounts.rate(None, Some("趸交")), dec!(0.1));
    }

    #[test]
    fn core_networks_follow_whitelist_with_twelve_months() {
        let agg = fixture().run(1, 3);
        assert_eq!(agg.core_networks.len(), 2);

        let east = &agg.core_networks[0];
        assert_eq!(east.branch, "城东支行");
        assert_eq!(east.channel, "工行渠道");
        assert_eq!(east.department, "银保一部");
        assert_eq!(east.monthly[0], dec!(1000));
        assert_eq!(east.monthly[11], dec!(100));
        assert_eq!(east.range_total, dec!(1000));
        assert_eq!(east.policy_count, 1);

        let missing = &agg.core_networks[1];
        assert_eq!(missing.branch, "不存在网点");
        assert_eq!(missing.department, UNASSIGNED);
        assert!(missing.monthly.iter().all(|v| v.is_zero()));
    }

    #[test]
    fn branch_activity_counts_roster_branches_with_sales() {
        let fixture = fixture();
        let january = fixture.run(1, 1);
        let icbc = &january.channels.rows[0];
        assert_eq!(icbc.total_branches, 2);
        assert_eq!(icbc.active_branches, 1);

        let quarter = fixture.run(1, 3);
        assert_eq!(quarter.channels.rows[0].active_branches, 2);
        let zhang = quarter
            .tracking
            .iter()
            .flat_map(|d| d.members.iter())
            .find(|m| m.manager == "张三")
            .unwrap();
        assert_eq!(zhang.metrics.total_branches, 2);
        assert_eq!(zhang.metrics.active_branches, 2);
    }

    #[test]
    fn daily_rows_fill_daily_columns_only() {
        let fixture = fixture();
        let daily = vec![row("城东支行", "鑫享", Some(12), dec!(70), dec!(30))];
        let (resolver, rows) = fixture.resolved(&fixture.rows);
        let (_, daily) = fixture.resolved(&daily);
        let agg = aggregate(
            &rows,
            &fixture.roster,
            &fixture.tables,
            &resolver,
            Some(daily.as_slice()),
            MonthRange::new(1, 1).unwrap(),
        );

        let first = &agg.departments.rows[0];
        assert_eq!(first.totals.qj, dec!(1000));
        assert_eq!(first.daily.qj, dec!(70));
        assert_eq!(first.daily.dc, dec!(30));
        assert_eq!(agg.departments.total.daily.policy_count, 1);
        assert_eq!(agg.channels.rows[0].daily.qj, dec!(70));
        assert!(agg.reconciliation.balanced);
    }
}
