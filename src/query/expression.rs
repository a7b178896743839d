//! Column expressions and the aggregate cells they produce.
//!
//! An expression is compiled once against the field index of a query. For
//! each row it is evaluated into a [`Generator`], the aggregate state of one
//! cell holding just that row. Generators of the same column merge into
//! each other; every merge is associative and commutative for the numeric
//! functions, so the order rows arrive in does not matter.

use std::{error, fmt};
use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use super::field_index::FieldIndex;
use super::val::{self, Val};


//------------ Expression ----------------------------------------------------

/// A compiled column expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expression {
    /// The null value for columns without an expression.
    Null,

    /// A field value or literal passed through unaggregated.
    Value(Param),

    Count,
    Sum(Param),
    Min(Param),
    Max(Param),
    Average(Param),
    First(Param),
    Last(Param),
    CountUnique(Param),
}

/// The argument of an expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Param {
    Field(usize),
    Literal(Val),
}

impl Param {
    fn value(&self, row: &[Val]) -> Val {
        match self {
            Param::Field(pos) => row.get(*pos).cloned().unwrap_or_default(),
            Param::Literal(val) => val.clone(),
        }
    }
}

impl Expression {
    /// Compiles an expression, adding referenced fields to the index.
    pub fn compile(
        text: &str, field_index: &FieldIndex
    ) -> Result<Self, ParseError> {
        let mut parser = Parser { text, pos: 0, field_index };
        let res = parser.expression()?;
        parser.skip_whitespace();
        if parser.pos < text.len() {
            return Err(parser.error("unexpected trailing input"))
        }
        Ok(res)
    }

    /// Returns whether the expression aggregates over rows.
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Expression::Null | Expression::Value(_))
    }

    /// Evaluates the expression for a single row.
    pub fn evaluate(&self, row: &[Val]) -> Result<Generator, EvalError> {
        Ok(match self {
            Expression::Null => Generator::Value(None),
            Expression::Value(param) => {
                Generator::Value(Some(param.value(row)))
            }
            Expression::Count => Generator::Count(1),
            Expression::Sum(param) => {
                Generator::Sum(numeric(param.value(row), "sum")?)
            }
            Expression::Min(param) => Generator::Min(non_null(param.value(row))),
            Expression::Max(param) => Generator::Max(non_null(param.value(row))),
            Expression::Average(param) => {
                match numeric(param.value(row), "average")? {
                    Some(val) => Generator::Average {
                        sum: val.as_f64().unwrap_or_default(),
                        count: 1,
                    },
                    None => Generator::Average { sum: 0., count: 0 }
                }
            }
            Expression::First(param) => {
                Generator::First(non_null(param.value(row)))
            }
            Expression::Last(param) => {
                Generator::Last(non_null(param.value(row)))
            }
            Expression::CountUnique(param) => {
                let mut set = BTreeSet::new();
                if let Some(val) = non_null(param.value(row)) {
                    set.insert(hex::encode(Val::encode_all([&val])));
                }
                Generator::CountUnique(set)
            }
        })
    }
}

fn non_null(val: Val) -> Option<Val> {
    (!val.is_null()).then_some(val)
}

/// Checks that a value can be used in arithmetic.
///
/// Nulls are skipped. Strings holding numbers are converted.
fn numeric(val: Val, function: &str) -> Result<Option<Val>, EvalError> {
    match val {
        Val::Null => Ok(None),
        Val::Long(_) | Val::Double(_) | Val::Date(_) | Val::Duration(_) => {
            Ok(Some(val))
        }
        Val::Bool(b) => Ok(Some(Val::Long(b.into()))),
        Val::String(ref s) => {
            if let Ok(n) = s.trim().parse::<i64>() {
                Ok(Some(Val::Long(n)))
            }
            else if let Some(d) = val.as_f64() {
                Ok(Some(Val::Double(d)))
            }
            else {
                Err(EvalError::new(format!(
                    "unable to {function} non-numeric value '{s}'"
                )))
            }
        }
        Val::Err(msg) => Err(EvalError::new(msg)),
    }
}


//------------ Generator -----------------------------------------------------

/// The aggregate state of one cell.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    Value(Option<Val>),
    Count(u64),
    Sum(Option<Val>),
    Min(Option<Val>),
    Max(Option<Val>),
    Average { sum: f64, count: u64 },
    First(Option<Val>),
    Last(Option<Val>),
    CountUnique(BTreeSet<String>),
}

impl Generator {
    /// Merges the state of another generator of the same column into this.
    pub fn merge(&mut self, other: Generator) {
        match (self, other) {
            (Generator::Value(left), Generator::Value(right)) => {
                if left.is_none() {
                    *left = right
                }
            }
            (Generator::Count(left), Generator::Count(right)) => {
                *left += right
            }
            (Generator::Sum(left), Generator::Sum(right)) => {
                if let Some(right) = right {
                    *left = Some(match left.take() {
                        Some(left) => add(&left, &right),
                        None => right,
                    })
                }
            }
            (Generator::Min(left), Generator::Min(right)) => {
                if let Some(right) = right {
                    *left = val::min_of(left.take(), right)
                }
            }
            (Generator::Max(left), Generator::Max(right)) => {
                if let Some(right) = right {
                    *left = val::max_of(left.take(), right)
                }
            }
            (
                Generator::Average { sum, count },
                Generator::Average { sum: other_sum, count: other_count }
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (Generator::First(left), Generator::First(right)) => {
                if left.is_none() {
                    *left = right
                }
            }
            (Generator::Last(left), Generator::Last(right)) => {
                if right.is_some() {
                    *left = right
                }
            }
            (Generator::CountUnique(left), Generator::CountUnique(right)) => {
                left.extend(right)
            }
            (left, right) => {
                // Generators of one column always have the same kind.
                log::error!(
                    "Ignoring merge of mismatched cells {left:?} and {right:?}"
                );
            }
        }
    }

    /// Returns the current value of the cell.
    pub fn value(&self) -> Val {
        match self {
            Generator::Value(val)
            | Generator::Sum(val)
            | Generator::Min(val)
            | Generator::Max(val)
            | Generator::First(val)
            | Generator::Last(val) => val.clone().unwrap_or_default(),
            Generator::Count(count) => {
                Val::Long(i64::try_from(*count).unwrap_or(i64::MAX))
            }
            Generator::Average { sum, count } => {
                if *count == 0 {
                    Val::Null
                }
                else {
                    Val::Double(sum / *count as f64)
                }
            }
            Generator::CountUnique(set) => {
                Val::Long(i64::try_from(set.len()).unwrap_or(i64::MAX))
            }
        }
    }

    /// A rough estimate of the size of the generator in memory.
    pub fn approx_size(&self) -> usize {
        let inline = std::mem::size_of::<Generator>();
        match self {
            Generator::Value(Some(val))
            | Generator::Sum(Some(val))
            | Generator::Min(Some(val))
            | Generator::Max(Some(val))
            | Generator::First(Some(val))
            | Generator::Last(Some(val)) => inline + val.approx_size(),
            Generator::CountUnique(set) => {
                inline + set.iter().map(|item| item.len() + 24).sum::<usize>()
            }
            _ => inline,
        }
    }
}

/// Adds two numeric values.
///
/// Longs stay longs unless they overflow.
fn add(left: &Val, right: &Val) -> Val {
    if let (Val::Long(left), Val::Long(right)) = (left, right) {
        if let Some(sum) = left.checked_add(*right) {
            return Val::Long(sum)
        }
    }
    Val::Double(
        left.as_f64().unwrap_or_default() + right.as_f64().unwrap_or_default()
    )
}


//------------ Parser --------------------------------------------------------

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    field_index: &'a FieldIndex,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.into(),
            pos: self.pos,
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        }
        else {
            false
        }
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.skip_whitespace();
        if self.rest().is_empty() {
            return Ok(Expression::Null)
        }
        let start = self.pos;
        let ident_len = self.rest().find(|ch: char| {
            !ch.is_ascii_alphanumeric() && ch != '_'
        }).unwrap_or(self.rest().len());
        let starts_alpha = self.rest().starts_with(|ch: char| {
            ch.is_ascii_alphabetic()
        });
        if starts_alpha && ident_len > 0 {
            let text = self.text;
            let name = &text[start..start + ident_len];
            self.pos += ident_len;
            if !self.eat("(") {
                self.pos = start;
                return Err(self.error("expected function call"))
            }
            return self.function(name, start)
        }
        self.param().map(Expression::Value)
    }

    fn function(
        &mut self, name: &str, start: usize
    ) -> Result<Expression, ParseError> {
        let name = name.to_ascii_lowercase();
        if name == "count" {
            if !self.eat(")") {
                return Err(self.error("count() takes no arguments"))
            }
            return Ok(Expression::Count)
        }
        let param = self.param()?;
        if !self.eat(")") {
            return Err(self.error("expected ')'"))
        }
        Ok(match name.as_str() {
            "sum" => Expression::Sum(param),
            "min" => Expression::Min(param),
            "max" => Expression::Max(param),
            "average" | "mean" => Expression::Average(param),
            "first" => Expression::First(param),
            "last" => Expression::Last(param),
            "countunique" => Expression::CountUnique(param),
            _ => {
                return Err(ParseError {
                    message: format!("unknown function '{name}'"),
                    pos: start,
                })
            }
        })
    }

    fn param(&mut self) -> Result<Param, ParseError> {
        self.skip_whitespace();
        if self.eat("${") {
            let Some(end) = self.rest().find('}') else {
                return Err(self.error("unterminated field reference"))
            };
            let field = self.rest()[..end].trim().to_string();
            if field.is_empty() {
                return Err(self.error("empty field reference"))
            }
            self.pos += end + 1;
            return Ok(Param::Field(self.field_index.create(field)))
        }
        if let Some(quote) = self.rest().chars().next().filter(|ch| {
            *ch == '\'' || *ch == '"'
        }) {
            self.pos += 1;
            let Some(end) = self.rest().find(quote) else {
                return Err(self.error("unterminated string literal"))
            };
            let literal = self.rest()[..end].to_string();
            self.pos += end + 1;
            return Ok(Param::Literal(Val::String(literal)))
        }
        let len = self.rest().find(|ch: char| {
            !(ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E'))
        }).unwrap_or(self.rest().len());
        let number = &self.rest()[..len];
        if number.is_empty() {
            return Err(self.error("expected field, literal or function"))
        }
        let literal = if let Ok(n) = number.parse::<i64>() {
            Val::Long(n)
        }
        else if let Ok(d) = number.parse::<f64>() {
            Val::Double(d)
        }
        else {
            return Err(self.error("invalid number"))
        };
        self.pos += len;
        Ok(Param::Literal(literal))
    }
}


//------------ ParseError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    message: String,
    pos: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.pos)
    }
}

impl error::Error for ParseError { }


//------------ EvalError -----------------------------------------------------

/// Evaluating an expression for a row failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvalError {
    message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        EvalError { message: message.into() }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl error::Error for EvalError { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> (Expression, FieldIndex) {
        let index = FieldIndex::new();
        let expr = Expression::compile(text, &index).unwrap();
        (expr, index)
    }

    fn aggregate(text: &str, rows: &[Val]) -> Val {
        let (expr, _) = compile(text);
        let mut res: Option<Generator> = None;
        for val in rows {
            let cell = expr.evaluate(std::slice::from_ref(val)).unwrap();
            match res.as_mut() {
                Some(res) => res.merge(cell),
                None => res = Some(cell),
            }
        }
        res.map(|cell| cell.value()).unwrap_or_default()
    }

    #[test]
    fn parse_forms() {
        let (expr, index) = compile("sum(${count})");
        assert_eq!(expr, Expression::Sum(Param::Field(0)));
        assert_eq!(index.pos("count"), Some(0));

        assert_eq!(compile("${ Feed }").0, Expression::Value(Param::Field(0)));
        assert_eq!(compile(" count( ) ").0, Expression::Count);
        assert_eq!(
            compile("'abc'").0,
            Expression::Value(Param::Literal(Val::string("abc")))
        );
        assert_eq!(
            compile("-1.5").0, Expression::Value(Param::Literal(Val::Double(-1.5)))
        );
        assert_eq!(compile("mean(3)").0, Expression::Average(
            Param::Literal(Val::Long(3))
        ));
        assert_eq!(compile("countUnique(${a})").0, Expression::CountUnique(
            Param::Field(0)
        ));
        assert_eq!(compile("").0, Expression::Null);
    }

    #[test]
    fn parse_errors() {
        let index = FieldIndex::new();
        for text in [
            "sum(", "median(${a})", "count(1)", "${a", "sum(${a}) x", "abc",
            "'open",
        ] {
            assert!(Expression::compile(text, &index).is_err(), "{text}");
        }
    }

    #[test]
    fn aggregates() {
        let rows = [Val::Long(3), Val::Null, Val::Long(1), Val::string("5")];
        assert_eq!(aggregate("sum(${x})", &rows), Val::Long(9));
        assert_eq!(aggregate("count()", &rows), Val::Long(4));
        assert_eq!(aggregate("min(${x})", &rows), Val::Long(1));
        assert_eq!(aggregate("max(${x})", &rows[..3]), Val::Long(3));
        assert_eq!(aggregate("average(${x})", &rows), Val::Double(3.0));
        assert_eq!(aggregate("first(${x})", &rows), Val::Long(3));
        assert_eq!(aggregate("last(${x})", &rows), Val::string("5"));
        assert_eq!(aggregate("${x}", &rows), Val::Long(3));
        assert_eq!(
            aggregate("countUnique(${x})", &[
                Val::Long(1), Val::Long(1), Val::string("1"), Val::Null
            ]),
            Val::Long(2)
        );
    }

    #[test]
    fn sum_of_doubles_and_overflow() {
        assert_eq!(
            aggregate("sum(${x})", &[Val::Long(1), Val::Double(0.5)]),
            Val::Double(1.5)
        );
        assert_eq!(
            aggregate("sum(${x})", &[Val::Long(i64::MAX), Val::Long(1)]),
            Val::Double(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn non_numeric_sum_fails() {
        let (expr, _) = compile("sum(${x})");
        assert!(expr.evaluate(&[Val::string("abc")]).is_err());
        assert!(expr.evaluate(&[Val::Err("broken".into())]).is_err());
        assert!(expr.evaluate(&[]).is_ok());
    }

    #[test]
    fn generators_serialize() {
        let (expr, _) = compile("countUnique(${x})");
        let cell = expr.evaluate(&[Val::string("a")]).unwrap();
        let json = serde_json::to_vec(&cell).unwrap();
        let back: Generator = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.value(), Val::Long(1));
    }
}
