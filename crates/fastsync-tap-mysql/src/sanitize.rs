//! Column sanitization for text export
//!
//! Every exported column is wrapped in a SQL expression that renders it as
//! text the target can load. Rules are checked in order and the first match
//! wins, so the order below is significant: a `tinyint(1)` column must be
//! seen before the integer family and `raw_data_hash` before the catch-all.
//!
//! The `'\n'`, `'\r'` and `'\0'` literals in the generated SQL are MySQL
//! escape sequences for the control characters themselves.

use fastsync_core::{FastSyncError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::naming::escape_identifier;

const ZERO_DATETIME: &str = "STR_TO_DATE('0000-00-00 00:00:00', '%Y-%m-%d %T')";

/// Upper bound on the magnitude of exported floating/fixed point values.
///
/// Holds the literal as written (`99999.999`) so it can be spliced into SQL,
/// and its number of decimals, which becomes the rounding scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericBound {
    literal: String,
    decimals: usize,
}

impl NumericBound {
    pub fn parse(literal: &str) -> Result<Self> {
        let literal = literal.trim();
        let (int_part, frac_part) = match literal.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (literal, None),
        };

        let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        let valid = !int_part.is_empty()
            && digits(int_part)
            && frac_part.is_none_or(|f| !f.is_empty() && digits(f));
        if !valid {
            return Err(FastSyncError::Configuration(format!(
                "max_num must be a positive decimal literal, got {:?}",
                literal
            )));
        }

        Ok(Self {
            literal: literal.to_string(),
            decimals: frac_part.map_or(0, str::len),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.literal
    }

    pub fn decimals(&self) -> usize {
        self.decimals
    }
}

impl FromStr for NumericBound {
    type Err = FastSyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for NumericBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.literal)
    }
}

/// SQL type DATE columns are cast to on export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRenderType {
    #[default]
    Date,
    DateTime,
}

impl DateRenderType {
    pub fn as_sql(self) -> &'static str {
        match self {
            DateRenderType::Date => "date",
            DateRenderType::DateTime => "datetime",
        }
    }
}

impl FromStr for DateRenderType {
    type Err = FastSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "date" => Ok(DateRenderType::Date),
            "datetime" => Ok(DateRenderType::DateTime),
            other => Err(FastSyncError::Configuration(format!(
                "date_type must be date or datetime, got {:?}",
                other
            ))),
        }
    }
}

/// Options that change how columns are rendered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizeOptions {
    pub max_num: Option<NumericBound>,
    pub date_type: DateRenderType,
}

impl SanitizeOptions {
    pub fn with_max_num(mut self, bound: NumericBound) -> Self {
        self.max_num = Some(bound);
        self
    }

    pub fn with_date_type(mut self, date_type: DateRenderType) -> Self {
        self.date_type = date_type;
        self
    }
}

/// Catalog facts a rule can look at, with types lower-cased
struct ColumnFacts {
    name: String,
    data_type: String,
    column_type: String,
}

impl ColumnFacts {
    fn quoted(&self) -> String {
        escape_identifier(&self.name)
    }

    fn data_type_in(&self, types: &[&str]) -> bool {
        types.contains(&self.data_type.as_str())
    }
}

struct SanitizeRule {
    matches: fn(&ColumnFacts) -> bool,
    render: fn(&ColumnFacts, &SanitizeOptions) -> String,
}

const BLOB_TYPES: &[&str] = &["blob", "tinyblob", "mediumblob", "longblob"];
const BINARY_TYPES: &[&str] = &["binary", "varbinary"];
const GEOMETRY_TYPES: &[&str] = &[
    "geometry",
    "point",
    "linestring",
    "polygon",
    "multipoint",
    "multilinestring",
    "multipolygon",
    "geometrycollection",
];
const DECIMAL_TYPES: &[&str] = &["double", "numeric", "float", "decimal", "real"];
const INTEGER_TYPES: &[&str] = &["smallint", "integer", "bigint", "mediumint", "int"];

const RAW_HASH_COLUMN: &str = "raw_data_hash";

const RULES: &[SanitizeRule] = &[
    // blob family
    SanitizeRule {
        matches: |c| c.data_type_in(BLOB_TYPES),
        render: |c, _| format!("REPLACE(hex({}), '\\n', ' ')", c.quoted()),
    },
    // binary / varbinary
    SanitizeRule {
        matches: |c| c.data_type_in(BINARY_TYPES),
        render: |c, _| {
            format!(
                "REPLACE(REPLACE(hex(trim(trailing CHAR(0x00) from {})), '\\n', ' '), '\\r', '')",
                c.quoted()
            )
        },
    },
    SanitizeRule {
        matches: |c| c.data_type == "bit",
        render: |c, _| format!("cast({} AS unsigned)", c.quoted()),
    },
    SanitizeRule {
        matches: |c| c.data_type == "date",
        render: |c, opts| {
            format!(
                "nullif(CAST({} AS {}),{})",
                c.quoted(),
                opts.date_type.as_sql(),
                ZERO_DATETIME
            )
        },
    },
    SanitizeRule {
        matches: |c| c.data_type_in(&["datetime", "timestamp"]),
        render: |c, _| format!("nullif({},{})", c.quoted(), ZERO_DATETIME),
    },
    // boolean stored as tinyint(1)
    SanitizeRule {
        matches: |c| c.column_type == "tinyint(1)",
        render: |c, _| {
            let q = c.quoted();
            format!("CASE WHEN {q} is null THEN null WHEN {q} = 0 THEN 0 ELSE 1 END")
        },
    },
    SanitizeRule {
        matches: |c| {
            c.data_type_in(GEOMETRY_TYPES) || GEOMETRY_TYPES.contains(&c.column_type.as_str())
        },
        render: |c, _| format!("ST_AsGeoJSON({})", c.quoted()),
    },
    SanitizeRule {
        matches: |c| c.name == RAW_HASH_COLUMN,
        render: |c, _| {
            format!(
                "REPLACE(REPLACE(hex({}), '\\n', ' '), '\\r', '')",
                c.quoted()
            )
        },
    },
    SanitizeRule {
        matches: |c| c.data_type_in(DECIMAL_TYPES),
        render: |c, opts| match &opts.max_num {
            Some(bound) => format!(
                "GREATEST(LEAST({max}, ROUND({col}, {decimals})), -{max})",
                max = bound.as_str(),
                col = c.quoted(),
                decimals = bound.decimals()
            ),
            None => c.quoted(),
        },
    },
    // integers are never clamped
    SanitizeRule {
        matches: |c| c.data_type_in(INTEGER_TYPES),
        render: |c, _| c.quoted(),
    },
];

fn render_as_text(column: &ColumnFacts) -> String {
    format!(
        "REPLACE(REPLACE(REPLACE(cast({} AS char CHARACTER SET utf8), '\\n', ' '), '\\r', ''), '\\0', '')",
        column.quoted()
    )
}

/// SQL expression that renders one column safely for text export
pub fn safe_sql_value(
    column_name: &str,
    data_type: &str,
    column_type: &str,
    options: &SanitizeOptions,
) -> String {
    let facts = ColumnFacts {
        name: column_name.to_string(),
        data_type: data_type.trim().to_ascii_lowercase(),
        column_type: column_type.trim().to_ascii_lowercase(),
    };

    RULES
        .iter()
        .find(|rule| (rule.matches)(&facts))
        .map(|rule| (rule.render)(&facts, options))
        .unwrap_or_else(|| render_as_text(&facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn plain(name: &str, data_type: &str, column_type: &str) -> String {
        safe_sql_value(name, data_type, column_type, &SanitizeOptions::default())
    }

    #[rstest]
    #[case("payload", "longblob", "longblob", "REPLACE(hex(`payload`), '\\n', ' ')")]
    #[case(
        "digest",
        "varbinary",
        "varbinary(32)",
        "REPLACE(REPLACE(hex(trim(trailing CHAR(0x00) from `digest`)), '\\n', ' '), '\\r', '')"
    )]
    #[case("flags", "bit", "bit(8)", "cast(`flags` AS unsigned)")]
    #[case(
        "created_at",
        "timestamp",
        "timestamp",
        "nullif(`created_at`,STR_TO_DATE('0000-00-00 00:00:00', '%Y-%m-%d %T'))"
    )]
    #[case(
        "is_active",
        "tinyint",
        "tinyint(1)",
        "CASE WHEN `is_active` is null THEN null WHEN `is_active` = 0 THEN 0 ELSE 1 END"
    )]
    #[case("location", "point", "point", "ST_AsGeoJSON(`location`)")]
    #[case(
        "raw_data_hash",
        "char",
        "char(64)",
        "REPLACE(REPLACE(hex(`raw_data_hash`), '\\n', ' '), '\\r', '')"
    )]
    #[case("amount", "decimal", "decimal(10,2)", "`amount`")]
    #[case("id", "bigint", "bigint(20) unsigned", "`id`")]
    #[case(
        "note",
        "text",
        "text",
        "REPLACE(REPLACE(REPLACE(cast(`note` AS char CHARACTER SET utf8), '\\n', ' '), '\\r', ''), '\\0', '')"
    )]
    fn test_rule_table(
        #[case] name: &str,
        #[case] data_type: &str,
        #[case] column_type: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(plain(name, data_type, column_type), expected);
    }

    #[test]
    fn test_plain_tinyint_is_rendered_as_text() {
        assert!(plain("level", "tinyint", "tinyint(4)").starts_with("REPLACE(REPLACE(REPLACE(cast(`level`"));
    }

    #[test]
    fn test_date_uses_render_type() {
        let options = SanitizeOptions::default().with_date_type(DateRenderType::DateTime);
        assert_eq!(
            safe_sql_value("shipped_on", "date", "date", &options),
            "nullif(CAST(`shipped_on` AS datetime),STR_TO_DATE('0000-00-00 00:00:00', '%Y-%m-%d %T'))"
        );
        assert!(plain("shipped_on", "date", "date").contains("AS date)"));
    }

    #[test]
    fn test_bound_clamps_decimals_but_not_integers() {
        let options =
            SanitizeOptions::default().with_max_num(NumericBound::parse("99999.999").unwrap());
        assert_eq!(
            safe_sql_value("amount", "double", "double", &options),
            "GREATEST(LEAST(99999.999, ROUND(`amount`, 3)), -99999.999)"
        );
        assert_eq!(safe_sql_value("id", "int", "int(11)", &options), "`id`");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // tinyint(1) named like the hash column still renders as a boolean
        assert!(plain("raw_data_hash", "tinyint", "tinyint(1)").starts_with("CASE WHEN"));
        // geometry detected through the column type alone
        assert_eq!(plain("shape", "GEOMETRY", "geometry"), "ST_AsGeoJSON(`shape`)");
    }

    #[test]
    fn test_numeric_bound_parsing() {
        let bound = NumericBound::parse("1000").unwrap();
        assert_eq!(bound.decimals(), 0);
        assert_eq!(bound.to_string(), "1000");
        assert_eq!(NumericBound::parse(" 12.50 ").unwrap().decimals(), 2);

        for bad in ["", "-5", "1e10", "1.", ".5", "1.2.3", "1; DROP TABLE x"] {
            assert!(NumericBound::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_date_render_type_parsing() {
        assert_eq!("DATETIME".parse::<DateRenderType>().unwrap(), DateRenderType::DateTime);
        assert_eq!("date".parse::<DateRenderType>().unwrap(), DateRenderType::Date);
        assert!("timestamp".parse::<DateRenderType>().is_err());
    }
}
