//! Roster filtering.
//!
//! Conditions are folded left to right: each condition's combinator joins it to the
//! accumulated result of every condition before it, starting from "match everything".
//! `[a AND, b OR, c AND]` therefore evaluates as `((true && a) || b) && c`, which is not
//! the same as the usual `a || (b && c)` precedence. Callers that need grouping must order
//! their conditions accordingly.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::domain::{ApplicantRecord, RosterKey};

/// Roster field a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Id,
    ExternalId,
    Program,
    SnapshotDate,
    Consent,
    Priority,
    PhysicsScore,
    RussianScore,
    MathScore,
    AchievementsScore,
    TotalScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Integer,
    Text,
    Flag,
}

impl FilterField {
    pub fn name(self) -> &'static str {
        match self {
            FilterField::Id => "id",
            FilterField::ExternalId => "external_id",
            FilterField::Program => "program",
            FilterField::SnapshotDate => "snapshot_date",
            FilterField::Consent => "consent",
            FilterField::Priority => "priority",
            FilterField::PhysicsScore => "physics_score",
            FilterField::RussianScore => "russian_score",
            FilterField::MathScore => "math_score",
            FilterField::AchievementsScore => "achievements_score",
            FilterField::TotalScore => "total_score",
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            FilterField::Program | FilterField::SnapshotDate => FieldKind::Text,
            FilterField::Consent => FieldKind::Flag,
            _ => FieldKind::Integer,
        }
    }

    fn value_of(self, record: &ApplicantRecord) -> Scalar {
        match self {
            FilterField::Id => Scalar::Integer(record.id.0 as i64),
            FilterField::ExternalId => Scalar::Integer(i64::from(record.external_id.0)),
            FilterField::Program => Scalar::Text(record.program.0.clone()),
            FilterField::SnapshotDate => Scalar::Text(record.snapshot_date.0.clone()),
            FilterField::Consent => Scalar::Flag(record.consent),
            FilterField::Priority => Scalar::Integer(i64::from(record.priority.value())),
            FilterField::PhysicsScore => Scalar::Integer(i64::from(record.scores.physics)),
            FilterField::RussianScore => Scalar::Integer(i64::from(record.scores.russian)),
            FilterField::MathScore => Scalar::Integer(i64::from(record.scores.math)),
            FilterField::AchievementsScore => {
                Scalar::Integer(i64::from(record.scores.achievements))
            }
            FilterField::TotalScore => Scalar::Integer(i64::from(record.total_score)),
        }
    }
}

impl FromStr for FilterField {
    type Err = ConditionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let field = match value.trim().to_ascii_lowercase().as_str() {
            "id" => FilterField::Id,
            "external_id" => FilterField::ExternalId,
            "program" => FilterField::Program,
            "snapshot_date" | "list_date" | "date" => FilterField::SnapshotDate,
            "consent" => FilterField::Consent,
            "priority" => FilterField::Priority,
            "physics_score" => FilterField::PhysicsScore,
            "russian_score" => FilterField::RussianScore,
            "math_score" => FilterField::MathScore,
            "achievements_score" => FilterField::AchievementsScore,
            "total_score" => FilterField::TotalScore,
            _ => return Err(ConditionError::UnknownField(value.to_string())),
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
}

impl ComparisonOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "!=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::In => "in",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOperator::Eq => ordering == Ordering::Equal,
            ComparisonOperator::Ne => ordering != Ordering::Equal,
            ComparisonOperator::Gt => ordering == Ordering::Greater,
            ComparisonOperator::Lt => ordering == Ordering::Less,
            ComparisonOperator::Ge => ordering != Ordering::Less,
            ComparisonOperator::Le => ordering != Ordering::Greater,
            ComparisonOperator::In => false,
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = ConditionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let operator = match value.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => ComparisonOperator::Eq,
            "!=" | "<>" | "ne" => ComparisonOperator::Ne,
            ">" | "gt" => ComparisonOperator::Gt,
            "<" | "lt" => ComparisonOperator::Lt,
            ">=" | "ge" => ComparisonOperator::Ge,
            "<=" | "le" => ComparisonOperator::Le,
            "in" => ComparisonOperator::In,
            _ => return Err(ConditionError::UnknownOperator(value.to_string())),
        };
        Ok(operator)
    }
}

/// How a condition joins the accumulated result of the conditions before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// Typed comparison value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Integer(i64),
    Text(String),
    Flag(bool),
}

impl Scalar {
    fn kind(&self) -> FieldKind {
        match self {
            Scalar::Integer(_) => FieldKind::Integer,
            Scalar::Text(_) => FieldKind::Text,
            Scalar::Flag(_) => FieldKind::Flag,
        }
    }

    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Integer(left), Scalar::Integer(right)) => Some(left.cmp(right)),
            (Scalar::Text(left), Scalar::Text(right)) => Some(left.cmp(right)),
            (Scalar::Flag(left), Scalar::Flag(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Integer(i64::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Flag(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Scalar(Scalar),
    Set(Vec<Scalar>),
}

/// Condition as received from a caller, before coercion to the field's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCondition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub combinator: Combinator,
}

impl RawCondition {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: Value,
        combinator: Combinator,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
            combinator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown filter field '{0}'")]
    UnknownField(String),
    #[error("unknown comparison operator '{0}'")]
    UnknownOperator(String),
    #[error("value {value} cannot be compared with field {field}")]
    InvalidValue { field: &'static str, value: String },
    #[error("operator 'in' on field {0} needs a non-empty list of values")]
    EmptySet(&'static str),
    #[error("operator 'in' on field {0} needs a list of values")]
    ExpectedSet(&'static str),
    #[error("operator {operator} on field {field} needs a single value")]
    UnexpectedSet {
        field: &'static str,
        operator: &'static str,
    },
}

/// A condition that was left out of the filter, with the reason it could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedCondition {
    pub index: usize,
    pub reason: String,
    #[serde(skip)]
    pub error: ConditionError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    field: FilterField,
    operator: ComparisonOperator,
    operand: Operand,
    combinator: Combinator,
}

impl FilterCondition {
    pub fn new(
        field: FilterField,
        operator: ComparisonOperator,
        operand: Operand,
        combinator: Combinator,
    ) -> Result<Self, ConditionError> {
        let expected = field.kind();
        match (&operand, operator) {
            (Operand::Set(values), ComparisonOperator::In) => {
                if values.is_empty() {
                    return Err(ConditionError::EmptySet(field.name()));
                }
                if let Some(value) = values.iter().find(|value| value.kind() != expected) {
                    return Err(ConditionError::InvalidValue {
                        field: field.name(),
                        value: format!("{value:?}"),
                    });
                }
            }
            (Operand::Scalar(_), ComparisonOperator::In) => {
                return Err(ConditionError::ExpectedSet(field.name()));
            }
            (Operand::Set(_), _) => {
                return Err(ConditionError::UnexpectedSet {
                    field: field.name(),
                    operator: operator.symbol(),
                });
            }
            (Operand::Scalar(value), _) => {
                if value.kind() != expected {
                    return Err(ConditionError::InvalidValue {
                        field: field.name(),
                        value: format!("{value:?}"),
                    });
                }
            }
        }

        Ok(Self {
            field,
            operator,
            operand,
            combinator,
        })
    }

    /// Shorthand for a single-value comparison.
    pub fn compare(
        field: FilterField,
        operator: ComparisonOperator,
        value: impl Into<Scalar>,
        combinator: Combinator,
    ) -> Result<Self, ConditionError> {
        Self::new(field, operator, Operand::Scalar(value.into()), combinator)
    }

    pub fn parse(raw: &RawCondition) -> Result<Self, ConditionError> {
        let field: FilterField = raw.field.parse()?;
        let operator: ComparisonOperator = raw.operator.parse()?;

        let operand = match (operator, &raw.value) {
            (ComparisonOperator::In, Value::Array(items)) => Operand::Set(
                items
                    .iter()
                    .map(|item| coerce(field, item))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (ComparisonOperator::In, _) => {
                return Err(ConditionError::ExpectedSet(field.name()));
            }
            (_, Value::Array(_)) => {
                return Err(ConditionError::UnexpectedSet {
                    field: field.name(),
                    operator: operator.symbol(),
                });
            }
            (_, value) => Operand::Scalar(coerce(field, value)?),
        };

        Self::new(field, operator, operand, raw.combinator)
    }

    fn text_equals(field: FilterField, value: &str) -> Self {
        Self {
            field,
            operator: ComparisonOperator::Eq,
            operand: Operand::Scalar(Scalar::Text(value.to_string())),
            combinator: Combinator::And,
        }
    }

    pub fn field(&self) -> FilterField {
        self.field
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn matches(&self, record: &ApplicantRecord) -> bool {
        let actual = self.field.value_of(record);
        match (&self.operand, self.operator) {
            (Operand::Set(values), ComparisonOperator::In) => values.contains(&actual),
            (Operand::Scalar(expected), operator) => actual
                .compare(expected)
                .map(|ordering| operator.accepts(ordering))
                .unwrap_or(false),
            (Operand::Set(_), _) => false,
        }
    }
}

fn coerce(field: FilterField, value: &Value) -> Result<Scalar, ConditionError> {
    let coerced = match field.kind() {
        FieldKind::Integer => match value {
            Value::Number(number) => number.as_i64().map(Scalar::Integer),
            Value::String(text) => text.trim().parse::<i64>().ok().map(Scalar::Integer),
            _ => None,
        },
        FieldKind::Text => match value {
            Value::String(text) => Some(Scalar::Text(text.clone())),
            Value::Number(number) => Some(Scalar::Text(number.to_string())),
            _ => None,
        },
        FieldKind::Flag => match value {
            Value::Bool(flag) => Some(Scalar::Flag(*flag)),
            Value::Number(number) => match number.as_i64() {
                Some(0) => Some(Scalar::Flag(false)),
                Some(1) => Some(Scalar::Flag(true)),
                _ => None,
            },
            Value::String(text) => parse_flag(text).map(Scalar::Flag),
            _ => None,
        },
    };

    coerced.ok_or_else(|| ConditionError::InvalidValue {
        field: field.name(),
        value: value.to_string(),
    })
}

/// Lenient boolean parsing shared by filters and roster imports.
pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Ordered list of conditions folded left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    conditions: Vec<FilterCondition>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn push(&mut self, condition: FilterCondition) {
        self.conditions.push(condition);
    }

    /// Build a filter from caller input, leaving out conditions that cannot be coerced.
    pub fn parse(raw: &[RawCondition]) -> (Self, Vec<DroppedCondition>) {
        let mut set = Self::new();
        let mut dropped = Vec::new();

        for (index, condition) in raw.iter().enumerate() {
            match FilterCondition::parse(condition) {
                Ok(parsed) => set.push(parsed),
                Err(error) => {
                    debug!(index, %error, "dropping filter condition");
                    dropped.push(DroppedCondition {
                        index,
                        reason: error.to_string(),
                        error,
                    });
                }
            }
        }

        (set, dropped)
    }

    /// Every record of one program on one snapshot date.
    pub fn partition(key: &RosterKey) -> Self {
        Self::new()
            .with(FilterCondition::text_equals(
                FilterField::Program,
                key.program.as_str(),
            ))
            .with(FilterCondition::text_equals(
                FilterField::SnapshotDate,
                key.snapshot_date.as_str(),
            ))
    }

    /// Consenting records of one partition; the ranking engine's candidate pool.
    pub fn consenting(key: &RosterKey) -> Self {
        Self::partition(key).with(FilterCondition {
            field: FilterField::Consent,
            operator: ComparisonOperator::Eq,
            operand: Operand::Scalar(Scalar::Flag(true)),
            combinator: Combinator::And,
        })
    }

    pub fn conditions(&self) -> &[FilterCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &ApplicantRecord) -> bool {
        self.conditions
            .iter()
            .fold(true, |accumulated, condition| match condition.combinator {
                Combinator::And => accumulated && condition.matches(record),
                Combinator::Or => accumulated || condition.matches(record),
            })
    }

    /// Matching records in listing order.
    pub fn apply<'a, I>(&self, records: I) -> Vec<&'a ApplicantRecord>
    where
        I: IntoIterator<Item = &'a ApplicantRecord>,
    {
        let mut matched: Vec<&ApplicantRecord> = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect();
        matched.sort_by(|left, right| listing_order(left, right));
        matched
    }
}

/// Total score descending, then external id, then internal id.
pub fn listing_order(left: &ApplicantRecord, right: &ApplicantRecord) -> Ordering {
    right
        .total_score
        .cmp(&left.total_score)
        .then_with(|| left.external_id.cmp(&right.external_id))
        .then_with(|| left.id.cmp(&right.id))
}
