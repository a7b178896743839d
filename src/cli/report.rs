//! Formatting results for the terminal.

use std::{error, fmt};
use std::fmt::Write;
use std::str::FromStr;
use crate::query::TableSettings;
use crate::store::Page;


//------------ ReportFormat --------------------------------------------------

/// The format to print results in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReportFormat {
    Json,
    #[default]
    Text,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ReportFormat::Json),
            "text" => Ok(ReportFormat::Text),
            _ => Err(ReportError::UnrecognisedFormat(s.to_string())),
        }
    }
}


//------------ Report --------------------------------------------------------

/// A page of results together with the table it belongs to.
pub struct Report<'a> {
    pub table: &'a TableSettings,
    pub page: &'a Page,
}

impl Report<'_> {
    pub fn format(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => {
                serde_json::to_string_pretty(self.page).map_err(|err| {
                    ReportError::Json(err.to_string())
                })
            }
            ReportFormat::Text => Ok(self.text()),
        }
    }

    fn text(&self) -> String {
        let mut res = String::new();
        let header: Vec<_> = self.table.columns.iter().map(|column| {
            if column.name.is_empty() { column.id.as_str() }
            else { column.name.as_str() }
        }).collect();
        let _ = writeln!(res, "{}", header.join(" | "));

        for row in &self.page.rows {
            let indent = "  ".repeat(row.depth.saturating_sub(1));
            let values: Vec<_> = row.values.iter().map(|value| {
                value.to_string()
            }).collect();
            if row.has_children {
                let _ = writeln!(
                    res, "{}{}  [{}]", indent, values.join(" | "), row.group_key
                );
            }
            else {
                let _ = writeln!(res, "{}{}", indent, values.join(" | "));
            }
        }

        let totals: Vec<_> = self.page.totals.iter().map(|value| {
            value.to_string()
        }).collect();
        let _ = writeln!(res, "Totals: {}", totals.join(" | "));
        let _ = writeln!(
            res, "Rows {} to {} of {}{}{}",
            self.page.offset.min(self.page.total),
            self.page.offset + self.page.rows.len(),
            self.page.total,
            if self.page.complete { "" } else { " (still running)" },
            if self.page.truncated { " (truncated)" } else { "" },
        );
        for msg in &self.page.errors {
            let _ = writeln!(res, "{msg}");
        }
        res
    }
}


//------------ ReportError ---------------------------------------------------

#[derive(Debug)]
pub enum ReportError {
    UnrecognisedFormat(String),
    Json(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognisedFormat(s) => {
                write!(f, "This report format is not recognised: {s}")
            }
            ReportError::Json(s) => {
                write!(f, "Cannot format results as JSON: {s}")
            }
        }
    }
}

impl error::Error for ReportError { }


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Column, Val};
    use crate::store::{GroupKey, Row};
    use crate::store::key::ItemKey;

    #[test]
    fn text_report() {
        let table = TableSettings::new(vec![
            Column::new("feed", "${feed}").with_group(0),
            Column::new("count", "sum(${count})"),
        ]);
        let page = Page {
            rows: vec![Row {
                group_key: GroupKey::from(&ItemKey::root().child(0)),
                depth: 1,
                values: vec![Val::string("A"), Val::Long(3)],
                has_children: false,
                latest_event: None,
            }],
            total: 1,
            offset: 0,
            complete: true,
            truncated: false,
            totals: vec![Val::Null, Val::Long(3)],
            errors: Vec::new(),
        };
        let text = Report { table: &table, page: &page }.format(
            ReportFormat::Text
        ).unwrap();
        assert_eq!(
            text,
            "feed | count\nA | 3\nTotals:  | 3\nRows 0 to 1 of 1\n"
        );
        assert!(ReportFormat::from_str("xml").is_err());
    }
}
