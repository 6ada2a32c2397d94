//! # Table Query Builder
//!
//! A small builder for the filter/order/range operators exposed by the hosted
//! table API. A `Query` renders to PostgREST query-string pairs for the REST
//! provider, and can also be evaluated against in-memory JSON rows, which is
//! what the test backend and the realtime re-filtering rely on.

use crate::{errors::StoryTrackError, types::Page};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operators understood by the table API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive pattern match with `%` and `_` wildcards.
    ILike,
    /// Column value is one of the listed values.
    In,
    /// Array column contains every listed value.
    Contains,
}

impl FilterOp {
    fn keyword(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::ILike => "ilike",
            FilterOp::In => "in",
            FilterOp::Contains => "cs",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op,
            value: value.into(),
        }
    }

    /// Renders the right-hand side of a PostgREST filter, e.g. `eq.42`.
    pub fn to_param_value(&self) -> String {
        let rendered = match self.op {
            FilterOp::In => {
                let items = list_items(&self.value)
                    .iter()
                    .map(|v| quote_if_needed(&scalar_text(v), &[',', '(', ')', '"']))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("({items})")
            }
            FilterOp::Contains => {
                let items = list_items(&self.value)
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
                        other => scalar_text(other),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{{{items}}}")
            }
            _ => scalar_text(&self.value),
        };
        format!("{}.{}", self.op.keyword(), rendered)
    }

    /// Renders the predicate used to scope a realtime subscription,
    /// e.g. `book_id=eq.42`.
    pub fn to_realtime(&self) -> Result<String, StoryTrackError> {
        match self.op {
            FilterOp::ILike | FilterOp::Contains => Err(StoryTrackError::UnsupportedFilter(
                format!("'{}' cannot scope a realtime channel", self.op.keyword()),
            )),
            _ => Ok(format!("{}={}", self.column, self.to_param_value())),
        }
    }

    /// Evaluates the filter against one JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(&self.column).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => values_equal(cell, &self.value),
            FilterOp::Neq => !cell.is_null() && !values_equal(cell, &self.value),
            FilterOp::Gt => compare_values(cell, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(cell, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare_values(cell, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(cell, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::ILike => match (cell, &self.value) {
                (Value::String(text), Value::String(pattern)) => ilike(text, pattern),
                _ => false,
            },
            FilterOp::In => list_items(&self.value)
                .iter()
                .any(|candidate| values_equal(cell, candidate)),
            FilterOp::Contains => match cell {
                Value::Array(items) => list_items(&self.value)
                    .iter()
                    .all(|wanted| items.iter().any(|have| values_equal(have, wanted))),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A filter/order/range request against one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub select: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderBy>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    /// Ask the backend for the exact number of matching rows.
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Eq, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Neq, value))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Gt, value))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Gte, value))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Lt, value))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(column, FilterOp::Lte, value))
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(Filter::new(column, FilterOp::ILike, pattern))
    }

    pub fn in_list<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(Filter::new(column, FilterOp::In, Value::Array(values)))
    }

    pub fn contains<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(Filter::new(column, FilterOp::Contains, Value::Array(values)))
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Inclusive row range, matching the backend's `Range` semantics.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.offset = Some(from);
        self.limit = Some(to.saturating_sub(from) + 1);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Renders the query as PostgREST query-string pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "select".to_string(),
            self.select.clone().unwrap_or_else(|| "*".to_string()),
        )];
        for filter in &self.filters {
            params.push((filter.column.clone(), filter.to_param_value()));
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{}.{}",
                        o.column,
                        if o.ascending { "asc" } else { "desc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Whether a row satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluates the query over in-memory rows: filter, sort, then window.
    pub fn apply(&self, rows: &[Value]) -> Page<Value> {
        let mut selected: Vec<Value> = rows.iter().filter(|r| self.matches(r)).cloned().collect();

        if !self.order.is_empty() {
            selected.sort_by(|a, b| {
                for order in &self.order {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ordering = order_with_nulls(left, right, order.ascending);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let total = selected.len();
        let offset = self.offset.unwrap_or(0);
        let windowed: Vec<Value> = match self.limit {
            Some(limit) => selected.into_iter().skip(offset).take(limit).collect(),
            None => selected.into_iter().skip(offset).collect(),
        };

        Page::new(windowed, self.count.then_some(total))
    }
}

// --- Helper Functions ---

fn list_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quote_if_needed(text: &str, specials: &[char]) -> String {
    if text.contains(specials) {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        text.to_string()
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // Backends hand numeric ids back as strings in some columns.
        (Value::Number(x), Value::String(y)) | (Value::String(y), Value::Number(x)) => {
            x.to_string() == *y
        }
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Ascending puts nulls last, descending puts them first, as Postgres does.
fn order_with_nulls(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    };
    if ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

fn ilike(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // Classic wildcard DP; `matched[j]` = pattern[..i] matches text[..j].
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= matched[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}
