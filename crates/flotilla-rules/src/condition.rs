//! Recursive boolean condition trees and their compiled form.
//!
//! Trees arrive as JSON, are validated and compiled once at rule save
//! (regexes included), and are then evaluated per torrent with no further
//! allocation or compilation.

use flotilla_core::TorrentView;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RuleError, RuleResult};
use crate::grouping::GroupIndex;

/// Combinator for an internal tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// Every child must match.
    And,
    /// Any child may match.
    Or,
    /// Inverts its (single) subtree; extra children are conjoined first.
    Not,
}

/// Comparison operator for a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Equality; case-insensitive for strings.
    #[serde(rename = "==")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Strictly less than.
    #[serde(rename = "<")]
    Lt,
    /// At most.
    #[serde(rename = "<=")]
    Le,
    /// Strictly greater than.
    #[serde(rename = ">")]
    Gt,
    /// At least.
    #[serde(rename = ">=")]
    Ge,
    /// Substring or set membership.
    #[serde(rename = "contains")]
    Contains,
    /// String prefix.
    #[serde(rename = "startsWith")]
    StartsWith,
    /// String suffix.
    #[serde(rename = "endsWith")]
    EndsWith,
    /// Regex match (RE2 syntax, compiled at save).
    #[serde(rename = "matches")]
    Matches,
    /// Membership in a value list.
    #[serde(rename = "in")]
    In,
}

/// Field a leaf node reads from the torrent or its evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Selected payload size in bytes.
    Size,
    /// Share ratio.
    Ratio,
    /// Accumulated seeding time in seconds.
    SeedingTime,
    /// Seconds since the torrent was added.
    Age,
    /// Completion fraction in `[0, 1]`.
    Progress,
    /// Upload speed in bytes per second.
    Upspeed,
    /// Download speed in bytes per second.
    Downspeed,
    /// Free space from the rule's free-space source, in bytes.
    FreeSpace,
    /// Display name.
    Name,
    /// Category name.
    Category,
    /// Tracker registrable domain.
    TrackerDomain,
    /// Save path.
    SavePath,
    /// Content path.
    ContentPath,
    /// Tag set.
    Tags,
    /// Private-tracker flag.
    IsPrivate,
    /// Upstream reports data files missing.
    HasMissingFiles,
    /// Size of the torrent's group under the leaf's `group_id`.
    GroupSize,
    /// Whether the torrent shares its group with at least one other.
    IsGrouped,
}

impl Field {
    /// Whether this field compares numerically.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Size
                | Self::Ratio
                | Self::SeedingTime
                | Self::Age
                | Self::Progress
                | Self::Upspeed
                | Self::Downspeed
                | Self::FreeSpace
                | Self::GroupSize
        )
    }

    /// Whether this field requires filesystem access on the instance.
    #[must_use]
    pub const fn needs_local_fs(self) -> bool {
        matches!(self, Self::HasMissingFiles)
    }

    /// Whether this field reads a grouping partition.
    #[must_use]
    pub const fn is_grouped(self) -> bool {
        matches!(self, Self::GroupSize | Self::IsGrouped)
    }
}

/// One node of a rule condition tree, as serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleCondition {
    /// Internal node combining children.
    Group {
        /// Combinator applied to the children.
        combinator: Combinator,
        /// Child nodes.
        children: Vec<RuleCondition>,
    },
    /// Leaf comparison.
    Leaf {
        /// Field to read.
        field: Field,
        /// Operator to apply.
        op: Operator,
        /// Comparison value; numbers may carry unit suffixes.
        #[serde(default)]
        value: serde_json::Value,
        /// Grouping partition for `group_size` / `is_grouped` leaves.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
}

/// Compiled comparison value.
#[derive(Debug, Clone)]
enum LeafValue {
    Number(f64),
    Text(String),
    TextList(Vec<String>),
    Bool(bool),
    Absent,
}

#[derive(Debug)]
enum CompiledNode {
    And(Vec<CompiledNode>),
    Or(Vec<CompiledNode>),
    Not(Box<CompiledNode>),
    Leaf {
        field: Field,
        op: Operator,
        value: LeafValue,
        regex: Option<Regex>,
        group_id: Option<String>,
    },
}

/// A condition tree compiled for repeated evaluation.
#[derive(Debug)]
pub struct CompiledCondition {
    node: CompiledNode,
}

/// Everything a leaf may read besides the torrent itself.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Unix timestamp used for age arithmetic; fixed per tick.
    pub now: i64,
    /// Free space from the rule's source, cached per tick.
    pub free_space: Option<i64>,
    /// Grouping partitions precomputed per rule.
    pub groups: &'a GroupIndex,
}

impl CompiledCondition {
    /// Compile a tree, validating operators, values, and regexes.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending leaf.
    pub fn compile(tree: &RuleCondition) -> RuleResult<Self> {
        Ok(Self {
            node: compile_node(tree)?,
        })
    }

    /// Evaluate against one torrent.
    #[must_use]
    pub fn matches(&self, view: &TorrentView, ctx: &EvalContext<'_>) -> bool {
        eval(&self.node, view, ctx)
    }
}

fn compile_node(tree: &RuleCondition) -> RuleResult<CompiledNode> {
    match tree {
        RuleCondition::Group {
            combinator,
            children,
        } => {
            if children.is_empty() {
                return Err(RuleError::invalid("condition group has no children"));
            }
            let mut compiled: Vec<CompiledNode> =
                children.iter().map(compile_node).collect::<RuleResult<_>>()?;
            Ok(match combinator {
                Combinator::And => CompiledNode::And(compiled),
                Combinator::Or => CompiledNode::Or(compiled),
                Combinator::Not => {
                    // A multi-child NOT negates the conjunction.
                    let inner = if compiled.len() == 1 {
                        compiled.remove(0)
                    } else {
                        CompiledNode::And(compiled)
                    };
                    CompiledNode::Not(Box::new(inner))
                }
            })
        }
        RuleCondition::Leaf {
            field,
            op,
            value,
            group_id,
        } => compile_leaf(*field, *op, value, group_id.clone()),
    }
}

fn compile_leaf(
    field: Field,
    op: Operator,
    raw: &serde_json::Value,
    group_id: Option<String>,
) -> RuleResult<CompiledNode> {
    if field.is_grouped() && group_id.is_none() {
        return Err(RuleError::invalid(format!(
            "field {field:?} requires a group_id"
        )));
    }

    let mut regex = None;
    let value = if field.is_numeric() {
        match op {
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt
            | Operator::Ge => {}
            other => {
                return Err(RuleError::invalid(format!(
                    "operator {other:?} does not apply to numeric field {field:?}"
                )));
            }
        }
        LeafValue::Number(parse_numeric(field, raw)?)
    } else {
        match field {
            Field::IsPrivate | Field::HasMissingFiles | Field::IsGrouped => {
                let flag = raw.as_bool().ok_or_else(|| {
                    RuleError::invalid(format!("field {field:?} expects a boolean value"))
                })?;
                LeafValue::Bool(flag)
            }
            _ => match op {
                Operator::Matches => {
                    let pattern = raw.as_str().ok_or_else(|| {
                        RuleError::invalid("matches operator expects a string pattern")
                    })?;
                    regex = Some(
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|err| RuleError::InvalidRegex {
                                pattern: pattern.to_string(),
                                reason: err.to_string(),
                            })?,
                    );
                    LeafValue::Absent
                }
                Operator::In => {
                    let list = raw.as_array().ok_or_else(|| {
                        RuleError::invalid("in operator expects an array of strings")
                    })?;
                    let items = list
                        .iter()
                        .map(|item| {
                            item.as_str().map(str::to_lowercase).ok_or_else(|| {
                                RuleError::invalid("in operator expects an array of strings")
                            })
                        })
                        .collect::<RuleResult<Vec<String>>>()?;
                    LeafValue::TextList(items)
                }
                _ => {
                    let text = raw.as_str().ok_or_else(|| {
                        RuleError::invalid(format!("field {field:?} expects a string value"))
                    })?;
                    LeafValue::Text(text.to_lowercase())
                }
            },
        }
    };

    Ok(CompiledNode::Leaf {
        field,
        op,
        value,
        regex,
        group_id,
    })
}

fn eval(node: &CompiledNode, view: &TorrentView, ctx: &EvalContext<'_>) -> bool {
    match node {
        CompiledNode::And(children) => children.iter().all(|child| eval(child, view, ctx)),
        CompiledNode::Or(children) => children.iter().any(|child| eval(child, view, ctx)),
        CompiledNode::Not(child) => !eval(child, view, ctx),
        CompiledNode::Leaf {
            field,
            op,
            value,
            regex,
            group_id,
        } => eval_leaf(*field, *op, value, regex.as_ref(), group_id.as_deref(), view, ctx),
    }
}

#[allow(clippy::too_many_lines)]
fn eval_leaf(
    field: Field,
    op: Operator,
    value: &LeafValue,
    regex: Option<&Regex>,
    group_id: Option<&str>,
    view: &TorrentView,
    ctx: &EvalContext<'_>,
) -> bool {
    if field.is_numeric() {
        let Some(actual) = numeric_field(field, group_id, view, ctx) else {
            return false;
        };
        let LeafValue::Number(expected) = value else {
            return false;
        };
        return compare_numbers(op, actual, *expected);
    }

    match field {
        Field::IsPrivate | Field::HasMissingFiles | Field::IsGrouped => {
            let actual = match field {
                Field::IsPrivate => view.is_private,
                Field::HasMissingFiles => view.has_missing_files(),
                Field::IsGrouped => group_id
                    .is_some_and(|id| ctx.groups.group_size(id, &view.hash) >= 2),
                _ => return false,
            };
            let LeafValue::Bool(expected) = value else {
                return false;
            };
            match op {
                Operator::Ne => actual != *expected,
                _ => actual == *expected,
            }
        }
        Field::Tags => eval_tags(op, value, regex, view),
        _ => {
            let actual = match field {
                Field::Name => view.name.to_lowercase(),
                Field::Category => view.category.to_lowercase(),
                Field::TrackerDomain => view.tracker_domain.to_lowercase(),
                Field::SavePath => view.save_path.to_lowercase(),
                Field::ContentPath => view.content_path.to_lowercase(),
                _ => return false,
            };
            eval_text(op, &actual, value, regex)
        }
    }
}

fn eval_tags(op: Operator, value: &LeafValue, regex: Option<&Regex>, view: &TorrentView) -> bool {
    match op {
        Operator::Matches => regex.is_some_and(|re| view.tags.iter().any(|tag| re.is_match(tag))),
        Operator::In => {
            let LeafValue::TextList(list) = value else {
                return false;
            };
            view.tags
                .iter()
                .any(|tag| list.iter().any(|item| item == &tag.to_lowercase()))
        }
        Operator::Eq | Operator::Contains => {
            let LeafValue::Text(expected) = value else {
                return false;
            };
            if expected.is_empty() {
                return view.tags.is_empty();
            }
            view.tags.iter().any(|tag| tag.to_lowercase() == *expected)
        }
        Operator::Ne => {
            let LeafValue::Text(expected) = value else {
                return false;
            };
            !view.tags.iter().any(|tag| tag.to_lowercase() == *expected)
        }
        _ => false,
    }
}

fn eval_text(op: Operator, actual: &str, value: &LeafValue, regex: Option<&Regex>) -> bool {
    match op {
        Operator::Matches => regex.is_some_and(|re| re.is_match(actual)),
        Operator::In => {
            let LeafValue::TextList(list) = value else {
                return false;
            };
            list.iter().any(|item| item == actual)
        }
        _ => {
            let LeafValue::Text(expected) = value else {
                return false;
            };
            match op {
                Operator::Eq => actual == expected,
                Operator::Ne => actual != expected,
                Operator::Contains => actual.contains(expected.as_str()),
                Operator::StartsWith => actual.starts_with(expected.as_str()),
                Operator::EndsWith => actual.ends_with(expected.as_str()),
                _ => false,
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn numeric_field(
    field: Field,
    group_id: Option<&str>,
    view: &TorrentView,
    ctx: &EvalContext<'_>,
) -> Option<f64> {
    Some(match field {
        Field::Size => view.size as f64,
        Field::Ratio => view.ratio,
        Field::SeedingTime => view.seeding_time as f64,
        Field::Age => view.age_seconds(ctx.now) as f64,
        Field::Progress => view.progress,
        Field::Upspeed => view.upspeed as f64,
        Field::Downspeed => view.dlspeed as f64,
        Field::FreeSpace => ctx.free_space? as f64,
        Field::GroupSize => {
            let id = group_id?;
            ctx.groups.group_size(id, &view.hash) as f64
        }
        _ => return None,
    })
}

fn compare_numbers(op: Operator, actual: f64, expected: f64) -> bool {
    match op {
        Operator::Eq => (actual - expected).abs() < f64::EPSILON,
        Operator::Ne => (actual - expected).abs() >= f64::EPSILON,
        Operator::Lt => actual < expected,
        Operator::Le => actual <= expected,
        Operator::Gt => actual > expected,
        Operator::Ge => actual >= expected,
        _ => false,
    }
}

fn parse_numeric(field: Field, raw: &serde_json::Value) -> RuleResult<f64> {
    if let Some(number) = raw.as_f64() {
        return Ok(number);
    }
    let Some(text) = raw.as_str() else {
        return Err(RuleError::invalid(format!(
            "field {field:?} expects a number"
        )));
    };
    let text = text.trim();
    if let Ok(number) = text.parse::<f64>() {
        return Ok(number);
    }
    match field {
        Field::Size | Field::FreeSpace => parse_byte_size(text).map(|bytes| {
            #[allow(clippy::cast_precision_loss)]
            {
                bytes as f64
            }
        }),
        Field::SeedingTime | Field::Age => parse_duration_secs(text).map(|secs| {
            #[allow(clippy::cast_precision_loss)]
            {
                secs as f64
            }
        }),
        _ => Err(RuleError::invalid(format!(
            "field {field:?} does not accept the value {text:?}"
        ))),
    }
}

/// Parse a byte quantity with an optional binary-unit suffix
/// (`KiB`/`MiB`/`GiB`/`TiB`, or bare `K`/`M`/`G`/`T`).
///
/// # Errors
///
/// Returns a validation error for unrecognized input.
pub fn parse_byte_size(text: &str) -> RuleResult<u64> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let base: f64 = number
        .parse()
        .map_err(|_| RuleError::invalid(format!("unparseable size {text:?}")))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "t" | "tib" => 1 << 40,
        other => {
            return Err(RuleError::invalid(format!(
                "unrecognized size unit {other:?} in {text:?}"
            )));
        }
    };
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((base * multiplier as f64) as u64)
}

/// Parse a duration with an optional suffix (`s`, `m`, `h`, `d`, `w`).
///
/// # Errors
///
/// Returns a validation error for unrecognized input.
pub fn parse_duration_secs(text: &str) -> RuleResult<u64> {
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let base: f64 = number
        .parse()
        .map_err(|_| RuleError::invalid(format!("unparseable duration {text:?}")))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        other => {
            return Err(RuleError::invalid(format!(
                "unrecognized duration unit {other:?} in {text:?}"
            )));
        }
    };
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((base * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GroupIndex;
    use flotilla_test_support::TorrentFixture;

    fn view() -> TorrentView {
        TorrentFixture::new("aabb")
            .name("Linux ISO 2024")
            .category("linux")
            .tags(&["freeleech", "keep"])
            .tracker("https://tracker.example.org/announce")
            .size(2 << 30)
            .ratio(1.5)
            .seeding_time(7_200)
            .added_on(1_000)
            .paths("/data/torrents", "/data/torrents/linux-iso-2024")
            .private(true)
            .speeds(0, 1_024)
            .build()
    }

    fn ctx(groups: &GroupIndex) -> EvalContext<'_> {
        EvalContext {
            now: 100_000,
            free_space: Some(50 << 30),
            groups,
        }
    }

    fn compile(json: serde_json::Value) -> CompiledCondition {
        let tree: RuleCondition = serde_json::from_value(json).expect("tree");
        CompiledCondition::compile(&tree).expect("compile")
    }

    #[test]
    fn and_or_short_circuit_semantics() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "combinator": "and",
            "children": [
                { "field": "tags", "op": "contains", "value": "freeleech" },
                { "field": "ratio", "op": ">=", "value": 1.0 }
            ]
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));

        let condition = compile(serde_json::json!({
            "combinator": "or",
            "children": [
                { "field": "category", "op": "==", "value": "movies" },
                { "field": "category", "op": "==", "value": "LINUX" }
            ]
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn not_inverts_subtree() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "combinator": "not",
            "children": [
                { "field": "tags", "op": "contains", "value": "freeleech" }
            ]
        }));
        assert!(!condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn numeric_values_accept_unit_suffixes() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "field": "size", "op": ">=", "value": "1GiB"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));

        let condition = compile(serde_json::json!({
            "field": "seeding_time", "op": ">=", "value": "1h"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));

        let condition = compile(serde_json::json!({
            "field": "age", "op": ">", "value": "1d"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn string_comparisons_are_case_insensitive() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "field": "name", "op": "contains", "value": "LINUX"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn regex_compiles_once_and_matches() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "field": "name", "op": "matches", "value": "linux.*2024"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn lookaround_patterns_are_rejected() {
        let tree: RuleCondition = serde_json::from_value(serde_json::json!({
            "field": "name", "op": "matches", "value": "(?=linux)"
        }))
        .expect("tree");
        let err = CompiledCondition::compile(&tree).expect_err("must reject");
        assert!(matches!(err, RuleError::InvalidRegex { .. }));
    }

    #[test]
    fn empty_tag_value_matches_untagged() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "field": "tags", "op": "==", "value": ""
        }));
        let mut untagged = view();
        untagged.tags.clear();
        assert!(condition.matches(&untagged, &ctx(&groups)));
        assert!(!condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn free_space_reads_from_context() {
        let groups = GroupIndex::default();
        let condition = compile(serde_json::json!({
            "field": "free_space", "op": "<", "value": "10GiB"
        }));
        assert!(!condition.matches(&view(), &ctx(&groups)));

        let low = EvalContext {
            now: 100_000,
            free_space: Some(1 << 30),
            groups: &groups,
        };
        assert!(condition.matches(&view(), &low));
    }

    #[test]
    fn group_size_reads_partitions() {
        let mut groups = GroupIndex::default();
        groups.insert_member("cross_seed.content_path", "bucket-1", "aabb");
        groups.insert_member("cross_seed.content_path", "bucket-1", "ccdd");

        let condition = compile(serde_json::json!({
            "field": "group_size", "op": ">=", "value": 2,
            "group_id": "cross_seed.content_path"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));

        let condition = compile(serde_json::json!({
            "field": "is_grouped", "op": "==", "value": true,
            "group_id": "cross_seed.content_path"
        }));
        assert!(condition.matches(&view(), &ctx(&groups)));
    }

    #[test]
    fn grouped_fields_without_group_id_fail_compile() {
        let tree: RuleCondition = serde_json::from_value(serde_json::json!({
            "field": "group_size", "op": ">=", "value": 2
        }))
        .expect("tree");
        assert!(CompiledCondition::compile(&tree).is_err());
    }

    #[test]
    fn empty_groups_fail_compile() {
        let tree: RuleCondition = serde_json::from_value(serde_json::json!({
            "combinator": "and", "children": []
        }))
        .expect("tree");
        assert!(CompiledCondition::compile(&tree).is_err());
    }

    #[test]
    fn byte_and_duration_parsers_cover_suffixes() {
        assert_eq!(parse_byte_size("10").expect("parse"), 10);
        assert_eq!(parse_byte_size("1KiB").expect("parse"), 1024);
        assert_eq!(parse_byte_size("2G").expect("parse"), 2 << 30);
        assert!(parse_byte_size("10 parsecs").is_err());

        assert_eq!(parse_duration_secs("90").expect("parse"), 90);
        assert_eq!(parse_duration_secs("2m").expect("parse"), 120);
        assert_eq!(parse_duration_secs("1w").expect("parse"), 604_800);
        assert!(parse_duration_secs("1 fortnight").is_err());
    }
}
