//! Maps an arbitrary result row-set onto the fixed channel set.
//!
//! Long form (a `channel` column on every row) wins over wide form (channel
//! names as columns of the first row). Anything else resolves to an empty map,
//! which callers show as "no spatial view" rather than filling with zeros.

use crate::models::Row;
use crate::montage::Channel;
use crate::store::MAX_EXACT_INTEGER;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Decimal digits an `f64` always reproduces.
const MAX_EXACT_DECIMAL_DIGITS: usize = 15;
const IDENTIFIER_COLUMNS: [&str; 3] = ["channel", "subject", "window_idx"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelValue {
    pub raw: f64,
    pub normalized: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultShape {
    Long,
    Wide,
    Unmapped,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChannelMap {
    values: BTreeMap<Channel, ChannelValue>,
    /// Column the values were read from in long form.
    pub source_column: Option<String>,
}

impl ChannelMap {
    /// Min-max normalizes `raw` across the supplied channels. A flat map
    /// normalizes every channel to 0.5.
    pub fn from_raw(raw: BTreeMap<Channel, f64>) -> Self {
        let finite = raw
            .into_iter()
            .filter(|(_, value)| value.is_finite())
            .collect::<BTreeMap<_, _>>();
        let min = finite.values().copied().fold(f64::INFINITY, f64::min);
        let max = finite.values().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;

        let values = finite
            .into_iter()
            .map(|(channel, raw)| {
                let normalized = if span > f64::EPSILON * max.abs().max(1.0) {
                    (raw - min) / span
                } else {
                    0.5
                };
                (channel, ChannelValue { raw, normalized })
            })
            .collect();
        Self {
            values,
            source_column: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, channel: Channel) -> Option<&ChannelValue> {
        self.values.get(&channel)
    }

    pub fn raw(&self, channel: Channel) -> Option<f64> {
        self.values.get(&channel).map(|value| value.raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelValue)> {
        self.values.iter().map(|(channel, value)| (*channel, value))
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.values.keys().copied()
    }

    /// Observed raw `(min, max)`, or `None` when empty.
    pub fn range(&self) -> Option<(f64, f64)> {
        if self.values.is_empty() {
            return None;
        }
        let min = self.values.values().map(|value| value.raw).fold(f64::INFINITY, f64::min);
        let max = self
            .values
            .values()
            .map(|value| value.raw)
            .fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

pub fn detect_shape(rows: &[Row]) -> ResultShape {
    if rows.is_empty() {
        return ResultShape::Unmapped;
    }
    if is_long_form(rows) {
        return ResultShape::Long;
    }
    let first = &rows[0];
    if Channel::all().any(|channel| first.get(channel.as_str()).and_then(numeric).is_some()) {
        return ResultShape::Wide;
    }
    ResultShape::Unmapped
}

pub fn resolve(rows: &[Row]) -> ChannelMap {
    match detect_shape(rows) {
        ResultShape::Long => resolve_long(rows),
        ResultShape::Wide => resolve_wide(&rows[0]),
        ResultShape::Unmapped => ChannelMap::default(),
    }
}

/// With a selected row the map is pinned to that single observation.
pub fn resolve_for_view(rows: &[Row], selected_row: Option<usize>) -> ChannelMap {
    match selected_row.and_then(|index| rows.get(index)) {
        Some(row) => resolve(std::slice::from_ref(row)),
        None => resolve(rows),
    }
}

fn is_long_form(rows: &[Row]) -> bool {
    rows.iter().all(|row| {
        row.get("channel")
            .and_then(Value::as_str)
            .and_then(Channel::from_name)
            .is_some()
    })
}

fn resolve_long(rows: &[Row]) -> ChannelMap {
    let Some(column) = value_column(rows) else {
        return ChannelMap::default();
    };

    let mut raw = BTreeMap::new();
    for row in rows {
        let channel = row
            .get("channel")
            .and_then(Value::as_str)
            .and_then(Channel::from_name);
        let value = row.get(&column).and_then(numeric);
        if let (Some(channel), Some(value)) = (channel, value) {
            raw.insert(channel, value);
        }
    }

    let mut map = ChannelMap::from_raw(raw);
    map.source_column = Some(column);
    map
}

/// First column, in row order, holding a number on some row.
fn value_column(rows: &[Row]) -> Option<String> {
    let first = rows.first()?;
    first
        .keys()
        .filter(|name| !IDENTIFIER_COLUMNS.contains(&name.as_str()))
        .find(|name| rows.iter().any(|row| row.get(name.as_str()).and_then(numeric).is_some()))
        .cloned()
}

fn resolve_wide(row: &Row) -> ChannelMap {
    let raw = Channel::all()
        .filter_map(|channel| {
            row.get(channel.as_str())
                .and_then(numeric)
                .map(|value| (channel, value))
        })
        .collect();
    ChannelMap::from_raw(raw)
}

/// Numbers, plus decimal strings produced when wide integers were kept as text.
/// Anything an `f64` cannot hold exactly is not numeric.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                return exact_integer(i128::from(integer));
            }
            if let Some(integer) = number.as_u64() {
                return exact_integer(i128::from(integer));
            }
            number.as_f64().filter(|value| value.is_finite())
        }
        Value::String(text) => numeric_text(text.trim()),
        _ => None,
    }
}

fn exact_integer(value: i128) -> Option<f64> {
    (value.unsigned_abs() <= MAX_EXACT_INTEGER as u128).then_some(value as f64)
}

fn numeric_text(text: &str) -> Option<f64> {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    if digits.chars().all(|c| c.is_ascii_digit()) {
        return text.parse::<i128>().ok().and_then(exact_integer);
    }
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
    {
        return None;
    }
    let mantissa = digits.split(['e', 'E']).next().unwrap_or_default();
    let significant = mantissa
        .chars()
        .filter(char::is_ascii_digit)
        .skip_while(|c| *c == '0')
        .count();
    if significant > MAX_EXACT_DECIMAL_DIGITS {
        return None;
    }
    text.parse::<f64>().ok().filter(|value| value.is_finite())
}
