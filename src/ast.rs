//! 过滤树的数据模型
//!
//! UI 层以 JSON 形式产出过滤树, 这里的类型与其一一对应, 字段名使用 camelCase。

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 查询结果中的一条记录 (pull 出来的实体投影)
pub type ResultRecord = serde_json::Map<String, serde_json::Value>;

/// 过滤树的节点: 分组或单个过滤条件
///
/// `"type": "group"` 或带有 `children` 字段的对象被视为分组, 其余对象按 `kind`
/// 解析为过滤条件。无法解析的过滤条件变为 [`FilterNode::Unknown`], 只有 JSON
/// 语法错误才会让整棵树解析失败。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Group(GroupNode),
    Filter(FilterNode),
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_group = value.get("type").and_then(Value::as_str) == Some("group")
            || value.get("children").is_some();

        if is_group {
            let group = serde_json::from_value(value).unwrap_or_default();
            return Ok(Node::Group(group));
        }
        Ok(Node::Filter(
            serde_json::from_value(value).unwrap_or(FilterNode::Unknown),
        ))
    }
}

/// 过滤树的内部节点, 以 AND / OR / NOT 组合其子节点
///
/// 缺少 `children` 视为空分组; 无法识别的 `matchMode` 按 AND 处理。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNode {
    #[serde(default, deserialize_with = "or_default")]
    pub match_mode: MatchMode,
    #[serde(default, deserialize_with = "or_default")]
    pub children: Vec<Node>,
}

/// 宽松解析: 字段为 null 或类型不符时取默认值
fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// 运算符字段为 null、未知字符串或类型不符时的取值
trait Unrecognized {
    fn unrecognized() -> Self;
}

/// 宽松解析运算符: 无法识别时取 `Unrecognized`, 该过滤条件随后不生成子句
fn or_unrecognized<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Unrecognized,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| T::unrecognized()))
}

impl GroupNode {
    pub fn new(match_mode: MatchMode, children: Vec<Node>) -> Self {
        Self { match_mode, children }
    }
}

/// 分组的组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// 逻辑与运算 (AND)
    #[default]
    All,
    /// 逻辑或运算 (OR)
    Any,
    /// 逻辑非运算 (NOT)
    None,
}

/// 单个过滤条件, 这是过滤树的叶子节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterNode {
    Page(PageFilter),
    Tags(TagFilter),
    FullText(FullTextFilter),
    Property(PropertyFilter),
    PageReference(PageReferenceFilter),
    Task(TaskFilter),
    Priority(PriorityFilter),
    Between(BetweenFilter),
    /// 无法识别的 kind, 永远无效
    #[serde(other)]
    Unknown,
}

/// 过滤条件的种类, 不携带字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Page,
    Tags,
    FullText,
    Property,
    PageReference,
    Task,
    Priority,
    Between,
    Unknown,
}

impl FilterNode {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterNode::Page(_) => FilterKind::Page,
            FilterNode::Tags(_) => FilterKind::Tags,
            FilterNode::FullText(_) => FilterKind::FullText,
            FilterNode::Property(_) => FilterKind::Property,
            FilterNode::PageReference(_) => FilterKind::PageReference,
            FilterNode::Task(_) => FilterKind::Task,
            FilterNode::Priority(_) => FilterKind::Priority,
            FilterNode::Between(_) => FilterKind::Between,
            FilterNode::Unknown => FilterKind::Unknown,
        }
    }
}

/// 过滤值: 单个字符串, 或多选时的字符串数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Single(String::new())
    }
}

impl FilterValue {
    /// 单值时返回该字符串, 数组时返回 None
    pub fn as_single(&self) -> Option<&str> {
        match self {
            FilterValue::Single(s) => Some(s),
            FilterValue::Multiple(_) => None,
        }
    }

    /// 单值去除空白后非空
    pub fn is_present_single(&self) -> bool {
        self.as_single().is_some_and(|s| !s.trim().is_empty())
    }

    /// 单值去除空白后非空, 或数组非空
    pub fn is_present(&self) -> bool {
        match self {
            FilterValue::Single(s) => !s.trim().is_empty(),
            FilterValue::Multiple(values) => !values.is_empty(),
        }
    }

    /// 以列表形式返回所有值, 单值视为只有一个元素的列表
    pub fn values(&self) -> Vec<&str> {
        match self {
            FilterValue::Single(s) => vec![s.as_str()],
            FilterValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        FilterValue::Multiple(values.into_iter().map(str::to_string).collect())
    }
}

/// 页面名称过滤, 例如: `page contains "meeting"`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFilter {
    #[serde(default, deserialize_with = "or_unrecognized")]
    pub operator: PageOperator,
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageOperator {
    Is,
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Unrecognized,
}

impl Unrecognized for PageOperator {
    fn unrecognized() -> Self {
        PageOperator::Unrecognized
    }
}

/// 标签过滤; `include_extensions` 为真时, 继承自该标签的子标签同样匹配
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
    #[serde(default, deserialize_with = "or_default")]
    pub include_extensions: bool,
}

/// 全文搜索 (大小写不敏感)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullTextFilter {
    #[serde(default, deserialize_with = "or_unrecognized")]
    pub operator: FullTextOperator,
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FullTextOperator {
    #[default]
    Contains,
    Equals,
    Unrecognized,
}

impl Unrecognized for FullTextOperator {
    fn unrecognized() -> Self {
        FullTextOperator::Unrecognized
    }
}

/// 属性过滤; 有 schema 时按值类型生成查询, 否则按属性名探测两个命名空间
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub property_name: String,
    #[serde(default, deserialize_with = "or_default")]
    pub property_ident: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub property_schema: Option<PropertySchema>,
    #[serde(default, deserialize_with = "or_unrecognized")]
    pub operator: PropertyOperator,
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
}

/// 属性比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyOperator {
    #[default]
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "unrecognized")]
    Unrecognized,
}

impl Unrecognized for PropertyOperator {
    fn unrecognized() -> Self {
        PropertyOperator::Unrecognized
    }
}

impl PropertyOperator {
    /// 数值/日期比较时使用的谓词符号; `is` 等同于 `=`, `contains` 和无法识别的运算符没有对应的比较符号
    pub fn comparison_symbol(&self) -> Option<&'static str> {
        match self {
            PropertyOperator::Is | PropertyOperator::Eq => Some("="),
            PropertyOperator::Lt => Some("<"),
            PropertyOperator::Gt => Some(">"),
            PropertyOperator::Lte => Some("<="),
            PropertyOperator::Gte => Some(">="),
            PropertyOperator::Contains | PropertyOperator::Unrecognized => None,
        }
    }
}

/// 页面引用过滤
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReferenceFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
}

/// 任务状态过滤, 值可以是多选的状态列表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
    #[serde(default, deserialize_with = "or_default")]
    pub include_extensions: bool,
    #[serde(default, deserialize_with = "or_default")]
    pub include_all_status_properties: bool,
}

/// 优先级过滤, 值可以是多选的优先级列表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub value: FilterValue,
}

/// 日期区间过滤, 两端均包含
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetweenFilter {
    #[serde(default, deserialize_with = "or_default")]
    pub start_date: String,
    #[serde(default, deserialize_with = "or_default")]
    pub end_date: String,
    #[serde(default, deserialize_with = "or_default")]
    pub date_property: DateProperty,
}

/// 日期区间过滤可选的日期属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateProperty {
    #[default]
    CreatedAt,
    UpdatedAt,
    JournalDay,
}

impl DateProperty {
    /// 对应的属性关键字, 例如 `:block/created-at`
    pub fn attribute(&self) -> &'static str {
        match self {
            DateProperty::CreatedAt => ":block/created-at",
            DateProperty::UpdatedAt => ":block/updated-at",
            DateProperty::JournalDay => ":block/journal-day",
        }
    }
}

/// 属性的 schema, 由外部的 schema 查询提供, 编译器只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    pub ident: String,
    pub value_type: ValueType,
    #[serde(default, deserialize_with = "or_default")]
    pub cardinality: Cardinality,
}

impl PropertySchema {
    /// 查询中使用的属性关键字, 保证以 `:` 开头
    pub fn keyword(&self) -> String {
        if self.ident.starts_with(':') {
            self.ident.clone()
        } else {
            format!(":{}", self.ident)
        }
    }
}

/// 属性值类型; 同时接受宿主应用的关键字写法, 例如 `:db.type/ref`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "boolean", alias = ":db.type/boolean")]
    Boolean,
    #[serde(rename = "ref", alias = ":db.type/ref")]
    Ref,
    #[serde(rename = "number", alias = ":db.type/number")]
    Number,
    #[serde(rename = "instant", alias = ":db.type/instant")]
    Instant,
    #[serde(rename = "text", alias = ":db.type/string")]
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cardinality {
    #[default]
    #[serde(rename = "one", alias = ":db.cardinality/one")]
    One,
    #[serde(rename = "many", alias = ":db.cardinality/many")]
    Many,
}
