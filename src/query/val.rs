//! Typed values flowing through a result store.

use std::{cmp, fmt};
use std::cmp::Ordering;
use chrono::DateTime;
use serde::{Deserialize, Serialize};


//------------ Val -----------------------------------------------------------

/// A single typed value of a row or an aggregate cell.
///
/// All integral widths are carried as [`Val::Long`]. Dates and durations
/// are milliseconds, since the epoch and absolute respectively.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Val {
    #[default]
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Date(i64),
    Duration(i64),
    Err(String),
}

impl Val {
    pub fn string(s: impl Into<String>) -> Self {
        Val::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Val::Err(_))
    }

    /// Returns the value as a double if it has a numeric interpretation.
    ///
    /// Strings are parsed, so that text extracted from events can still be
    /// summed up.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Null | Val::Err(_) => None,
            Val::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Val::Long(n) | Val::Date(n) | Val::Duration(n) => Some(*n as f64),
            Val::Double(d) => Some(*d),
            Val::String(s) => s.trim().parse().ok(),
        }
    }

    /// Returns the value as a long if it has an integral interpretation.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Long(n) | Val::Date(n) | Val::Duration(n) => Some(*n),
            Val::Bool(b) => Some(i64::from(*b)),
            Val::Double(d) if d.fract() == 0.0 && d.is_finite() => {
                Some(*d as i64)
            }
            Val::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts a JSON value as found in extracted event data.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Val::Null,
            serde_json::Value::Bool(b) => Val::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(n) => Val::Long(n),
                None => n.as_f64().map(Val::Double).unwrap_or(Val::Null),
            },
            serde_json::Value::String(s) => Val::String(s.clone()),
            other => Val::String(other.to_string()),
        }
    }

    /// A rough estimate of the heap and inline size of the value.
    pub fn approx_size(&self) -> usize {
        let inline = std::mem::size_of::<Val>();
        match self {
            Val::String(s) | Val::Err(s) => inline + s.len(),
            _ => inline,
        }
    }

    /// The rank of the type in the total ordering of values.
    fn rank(&self) -> u8 {
        match self {
            Val::Null => 0,
            Val::Bool(_) => 1,
            Val::Long(_) | Val::Double(_) | Val::Date(_) | Val::Duration(_) => 2,
            Val::String(_) => 3,
            Val::Err(_) => 4,
        }
    }
}


//--- Encoding

/// Type tags of the canonical encoding.
const TAG_NULL: u8 = 0x01;
const TAG_BOOL: u8 = 0x02;
const TAG_LONG: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_DATE: u8 = 0x06;
const TAG_DURATION: u8 = 0x07;
const TAG_ERR: u8 = 0x08;

impl Val {
    /// Appends the canonical encoding of the value to `target`.
    ///
    /// The encoding is self-delimiting, so a sequence of values can be
    /// encoded by concatenation. Two values have the same encoding exactly
    /// when they are equal. Integral doubles are therefore encoded as longs.
    pub fn encode_into(&self, target: &mut Vec<u8>) {
        match self {
            Val::Null => target.push(TAG_NULL),
            Val::Bool(b) => {
                target.push(TAG_BOOL);
                target.push(u8::from(*b));
            }
            Val::Long(n) => {
                target.push(TAG_LONG);
                target.extend_from_slice(&ordered_i64(*n));
            }
            Val::Double(d) => match integral(*d) {
                Some(n) => {
                    target.push(TAG_LONG);
                    target.extend_from_slice(&ordered_i64(n));
                }
                None => {
                    target.push(TAG_DOUBLE);
                    target.extend_from_slice(&ordered_f64(*d));
                }
            },
            Val::String(s) => {
                target.push(TAG_STRING);
                escape_bytes(s.as_bytes(), target);
            }
            Val::Date(n) => {
                target.push(TAG_DATE);
                target.extend_from_slice(&ordered_i64(*n));
            }
            Val::Duration(n) => {
                target.push(TAG_DURATION);
                target.extend_from_slice(&ordered_i64(*n));
            }
            Val::Err(s) => {
                target.push(TAG_ERR);
                escape_bytes(s.as_bytes(), target);
            }
        }
    }

    /// Returns the canonical encoding of a sequence of values.
    pub fn encode_all<'a>(vals: impl IntoIterator<Item = &'a Val>) -> Vec<u8> {
        let mut res = Vec::new();
        for val in vals {
            val.encode_into(&mut res);
        }
        res
    }
}

/// Returns the double as a long if it is a whole number in range.
fn integral(d: f64) -> Option<i64> {
    // 2^63 is exact as a double while i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if d.fract() == 0.0 && (-LIMIT..LIMIT).contains(&d) {
        Some(d as i64)
    }
    else {
        None
    }
}

fn ordered_i64(n: i64) -> [u8; 8] {
    ((n as u64) ^ (1 << 63)).to_be_bytes()
}

fn ordered_f64(d: f64) -> [u8; 8] {
    let bits = d.to_bits();
    let bits = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
    bits.to_be_bytes()
}

/// Writes bytes with zero escaped as `00 ff` and a `00 00` terminator.
fn escape_bytes(bytes: &[u8], target: &mut Vec<u8>) {
    for &byte in bytes {
        target.push(byte);
        if byte == 0 {
            target.push(0xff);
        }
    }
    target.extend_from_slice(&[0, 0]);
}


//--- PartialEq, Eq, PartialOrd, Ord

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Val { }

impl PartialOrd for Val {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Val {
    /// Compares values.
    ///
    /// Null sorts before everything else. Numbers, dates and durations
    /// compare exactly by their numeric value with each other, strings by
    /// their bytes. A long and a double of the same value are equal. Dates
    /// and durations of the same value as a number sort after it.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Val::Null, Val::Null) => Ordering::Equal,
            (Val::Bool(left), Val::Bool(right)) => left.cmp(right),
            (Val::String(left), Val::String(right)) => {
                left.as_bytes().cmp(right.as_bytes())
            }
            (Val::Err(left), Val::Err(right)) => left.cmp(right),
            (left, right) if left.rank() == 2 && right.rank() == 2 => {
                cmp_numbers(left, right).then_with(|| {
                    left.numeric_kind().cmp(&right.numeric_kind())
                })
            }
            (left, right) => left.rank().cmp(&right.rank()),
        }
    }
}

impl Val {
    /// Distinguishes numeric variants of equal value.
    fn numeric_kind(&self) -> u8 {
        match self {
            Val::Date(_) => 1,
            Val::Duration(_) => 2,
            _ => 0,
        }
    }
}

/// Compares the numeric values of two numeric variants exactly.
fn cmp_numbers(left: &Val, right: &Val) -> Ordering {
    match (left, right) {
        (Val::Double(left), Val::Double(right)) => cmp_doubles(*left, *right),
        (Val::Double(left), right) => {
            cmp_long_double(right.as_i64().unwrap_or_default(), *left)
                .reverse()
        }
        (left, Val::Double(right)) => {
            cmp_long_double(left.as_i64().unwrap_or_default(), *right)
        }
        (left, right) => {
            left.as_i64().unwrap_or_default().cmp(
                &right.as_i64().unwrap_or_default()
            )
        }
    }
}

/// Compares doubles with both zeros equal and NaN outside all numbers.
fn cmp_doubles(left: f64, right: f64) -> Ordering {
    if left == right {
        Ordering::Equal
    }
    else {
        left.total_cmp(&right)
    }
}

/// Compares a long with a double without rounding the long.
fn cmp_long_double(left: i64, right: f64) -> Ordering {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if right.is_nan() {
        // Matches the position total_cmp gives NaNs.
        return if right.is_sign_negative() {
            Ordering::Greater
        }
        else {
            Ordering::Less
        }
    }
    if right >= LIMIT {
        return Ordering::Less
    }
    if right < -LIMIT {
        return Ordering::Greater
    }
    let whole = right.trunc();
    left.cmp(&(whole as i64)).then_with(|| {
        0.0.partial_cmp(&(right - whole)).unwrap_or(Ordering::Equal)
    })
}

/// Returns the larger of two optional values, ignoring nulls.
pub(crate) fn max_of(left: Option<Val>, right: Val) -> Option<Val> {
    match left {
        None => Some(right),
        Some(left) => Some(cmp::max(left, right)),
    }
}

/// Returns the smaller of two optional values, ignoring nulls.
pub(crate) fn min_of(left: Option<Val>, right: Val) -> Option<Val> {
    match left {
        None => Some(right),
        Some(left) => Some(cmp::min(left, right)),
    }
}


//--- From

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::String(s.into())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::String(s)
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Long(n)
    }
}

impl From<i32> for Val {
    fn from(n: i32) -> Self {
        Val::Long(n.into())
    }
}

impl From<f64> for Val {
    fn from(d: f64) -> Self {
        Val::Double(d)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl<T: Into<Val>> From<Option<T>> for Val {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Val::Null)
    }
}


//--- Display

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Val::Null => Ok(()),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Long(n) => write!(f, "{n}"),
            Val::Double(d) => write!(f, "{d}"),
            Val::String(s) => f.write_str(s),
            Val::Date(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(date) => {
                    write!(f, "{}", date.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
                }
                None => write!(f, "{ms}"),
            },
            Val::Duration(ms) => fmt_duration(*ms, f),
            Val::Err(s) => write!(f, "Err: {s}"),
        }
    }
}

fn fmt_duration(ms: i64, f: &mut fmt::Formatter) -> fmt::Result {
    if ms < 0 {
        f.write_str("-")?;
    }
    let ms = ms.unsigned_abs();
    let (days, rem) = (ms / 86_400_000, ms % 86_400_000);
    let (hours, rem) = (rem / 3_600_000, rem % 3_600_000);
    let (mins, rem) = (rem / 60_000, rem % 60_000);
    let (secs, millis) = (rem / 1000, rem % 1000);

    let mut first = true;
    for (amount, unit) in [(days, "d"), (hours, "h"), (mins, "m")] {
        if amount > 0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{amount}{unit}")?;
            first = false;
        }
    }
    if secs > 0 || millis > 0 || first {
        if !first {
            f.write_str(" ")?;
        }
        if millis > 0 {
            write!(f, "{secs}.{millis:03}s")?;
        }
        else {
            write!(f, "{secs}s")?;
        }
    }
    Ok(())
}


//============ Tests =========================================================
