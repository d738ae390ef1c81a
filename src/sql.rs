use chrono::{DateTime, NaiveDateTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

const TABLE: &str = "reservations";

/// Column order when an INSERT names no columns.
const INSERT_COLUMNS: [&str; 5] = ["resource_id", "customer_name", "customer_email", "start", "end"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Bounds stay optional here; a missing one is a booking validation error.
    InsertReservation {
        resource_id: Ulid,
        customer_name: String,
        customer_email: String,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectReservations {
        resource_id: Option<Ulid>,
    },
    DeleteReservation {
        id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    let rows = extract_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(TABLE, columns.len(), values.len()));
    }

    let (mut resource_id, mut name, mut email, mut start, mut end) = (None, None, None, None, None);
    for (col, value) in columns.iter().zip(values) {
        match col.as_str() {
            "resource_id" => resource_id = Some(parse_ulid_expr(value)?),
            "customer_name" => name = Some(parse_string_expr(value)?),
            "customer_email" => email = Some(parse_string_expr(value)?),
            "start" => start = parse_timestamp_or_null(value)?,
            "end" => end = parse_timestamp_or_null(value)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertReservation {
        resource_id: resource_id.ok_or(SqlError::MissingColumn("resource_id"))?,
        customer_name: name.unwrap_or_default(),
        customer_email: email.unwrap_or_default(),
        start,
        end,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteReservation { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    if table != TABLE {
        return Err(SqlError::UnknownTable(table));
    }

    let Some(selection) = &select.selection else {
        return Ok(Command::SelectReservations { resource_id: None });
    };
    match where_eq(selection) {
        Some(("id", value)) => Ok(Command::SelectReservation {
            id: parse_ulid_expr(value)?,
        }),
        Some(("resource_id", value)) => Ok(Command::SelectReservations {
            resource_id: Some(parse_ulid_expr(value)?),
        }),
        _ => Err(SqlError::Unsupported(format!("WHERE {selection}"))),
    }
}

/// `column = value` with a known column, else `None`.
fn where_eq(expr: &Expr) -> Option<(&'static str, &Expr)> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => Some(("id", right)),
            Some("resource_id") => Some(("resource_id", right)),
            _ => None,
        },
        Expr::Nested(inner) => where_eq(inner),
        _ => None,
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match where_eq(sel) {
        Some(("id", value)) => parse_ulid_expr(value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Accepts a ULID or a hyphenated UUID, since catalog ids are UUIDs.
pub fn parse_id(s: &str) -> Result<Ulid, SqlError> {
    if let Ok(id) = Ulid::from_string(s) {
        return Ok(id);
    }
    uuid::Uuid::parse_str(s)
        .map(Ulid::from)
        .map_err(|_| SqlError::Parse(format!("bad id: {s}")))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => parse_id(s),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Unix milliseconds, or a quoted timestamp. Timestamps without an offset are UTC.
fn parse_timestamp_or_null(expr: &Expr) -> Result<Option<Ms>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => parse_timestamp(s).map(Some),
        _ => parse_i64_expr(expr).map(Some),
    }
}

pub fn parse_timestamp(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(SqlError::Parse(format!("bad timestamp: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const RID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_with_millis() {
        let sql = format!(
            r#"INSERT INTO reservations (resource_id, customer_name, customer_email, start, "end") VALUES ('{RID}', 'Ada', 'ada@example.com', 1000, 2000)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertReservation {
                resource_id: Ulid::from_string(RID).unwrap(),
                customer_name: "Ada".into(),
                customer_email: "ada@example.com".into(),
                start: Some(1000),
                end: Some(2000),
            }
        );
    }

    #[test]
    fn parse_insert_with_iso_timestamps() {
        let sql = format!(
            r#"INSERT INTO reservations (resource_id, customer_name, customer_email, start, "end") VALUES ('{RID}', 'Ada', 'ada@example.com', '2025-06-01T10:00:00Z', '2025-06-01 11:00:00')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { start, end, .. } => {
                assert_eq!(start, Some(1_748_772_000_000));
                assert_eq!(end, Some(1_748_775_600_000));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_positional() {
        let sql = format!(
            "INSERT INTO reservations VALUES ('{RID}', 'Ada', 'ada@example.com', 1000, 2000)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation { start: Some(1000), end: Some(2000), .. }
        ));
    }

    #[test]
    fn parse_insert_reordered_columns_and_null_bound() {
        let sql = format!(
            r#"INSERT INTO reservations ("end", start, resource_id, customer_email, customer_name) VALUES (NULL, 1000, '{RID}', 'e@x', 'n')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { start, end, customer_name, .. } => {
                assert_eq!(start, Some(1000));
                assert_eq!(end, None);
                assert_eq!(customer_name, "n");
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_omitted_bound_is_none() {
        let sql = format!(
            "INSERT INTO reservations (resource_id, customer_name, customer_email, start) VALUES ('{RID}', 'n', 'e@x', 1000)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation { end: None, .. }
        ));
    }

    #[test]
    fn parse_insert_accepts_uuid_resource() {
        let sql = "INSERT INTO reservations (resource_id, customer_name, customer_email, start, \"end\") \
                   VALUES ('6f1c2e6a-8d0b-4b7e-9a52-3f4c1d2e5a60', 'n', 'e@x', 1000, 2000)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { resource_id, .. } => {
                let uuid = uuid::Uuid::from(resource_id);
                assert_eq!(uuid.to_string(), "6f1c2e6a-8d0b-4b7e-9a52-3f4c1d2e5a60");
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_errors() {
        let unknown_col = format!(
            "INSERT INTO reservations (resource_id, colour) VALUES ('{RID}', 'red')"
        );
        assert!(matches!(parse_sql(&unknown_col), Err(SqlError::UnknownColumn(_))));

        let arity = format!("INSERT INTO reservations VALUES ('{RID}', 'n')");
        assert!(matches!(parse_sql(&arity), Err(SqlError::WrongArity(_, 5, 2))));

        let no_resource = "INSERT INTO reservations (customer_name) VALUES ('n')";
        assert!(matches!(
            parse_sql(no_resource),
            Err(SqlError::MissingColumn("resource_id"))
        ));

        let bad_ts = format!(
            "INSERT INTO reservations VALUES ('{RID}', 'n', 'e', 'next tuesday', 2000)"
        );
        assert!(matches!(parse_sql(&bad_ts), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_by_id() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{RID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservation { id: Ulid::from_string(RID).unwrap() }
        );
    }

    #[test]
    fn parse_select_by_resource_and_all() {
        let sql = format!("SELECT * FROM reservations WHERE resource_id = '{RID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservations { resource_id: Some(Ulid::from_string(RID).unwrap()) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { resource_id: None }
        );
    }

    #[test]
    fn parse_select_unsupported_filter() {
        let sql = "SELECT * FROM reservations WHERE start > 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete() {
        let sql = format!("DELETE FROM reservations WHERE id = '{RID}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteReservation { id: Ulid::from_string(RID).unwrap() }
        );
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "SELECT * FROM bookings";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn timestamp_formats() {
        assert_eq!(parse_timestamp("1748772000000").unwrap(), 1_748_772_000_000);
        assert_eq!(parse_timestamp("2025-06-01T12:00:00+02:00").unwrap(), 1_748_772_000_000);
        assert_eq!(parse_timestamp("2025-06-01T10:00").unwrap(), 1_748_772_000_000);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
