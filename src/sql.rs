use chrono::{Datelike, NaiveDateTime, Timelike};
use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::{DEFAULT_APPOINTMENT_MINUTES, MAX_VALID_YEAR, MIN_VALID_YEAR};
use crate::model::Minutes;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCustomer {
        id: Ulid,
        name: String,
        phone: String,
    },
    UpdateCustomer {
        id: Ulid,
        name: Option<String>,
        phone: Option<String>,
    },
    DeleteCustomer {
        id: Ulid,
    },
    SelectCustomers,
    InsertServiceAppointment {
        customer_id: Ulid,
        service_code: String,
        start: NaiveDateTime,
    },
    InsertDirectAppointment {
        customer_id: Ulid,
        start: NaiveDateTime,
        duration_minutes: Minutes,
    },
    UpdateAppointment {
        id: Ulid,
        start: Option<NaiveDateTime>,
        duration_minutes: Option<Minutes>,
    },
    DeleteAppointment {
        id: Ulid,
    },
    SelectAppointments {
        group_id: Option<Ulid>,
        customer_id: Option<Ulid>,
    },
    SelectServices,
    SelectAvailability {
        start: NaiveDateTime,
        service_code: Option<String>,
    },
}

/// Wall-clock instant at minute resolution: `YYYY-MM-DDTHH:MM`, a space in
/// place of `T`, and a trailing `:00` are all accepted. Years outside the
/// bookable range are rejected here so nothing downstream can overflow.
pub fn parse_instant(s: &str) -> Result<NaiveDateTime, SqlError> {
    const FORMATS: [&str; 4] = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    let s = s.trim();
    let parsed = FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| SqlError::InvalidInstant(s.to_string()))?;
    if parsed.second() != 0 || !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&parsed.year()) {
        return Err(SqlError::InvalidInstant(s.to_string()));
    }
    Ok(parsed)
}

pub fn format_instant(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M").to_string()
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from. Unbound `$N` placeholders are fine here.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();

    match table.as_str() {
        "customers" => {
            let row = Row::new(&columns, values, &["id", "name", "phone"])?;
            Ok(Command::InsertCustomer {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_string_expr(row.require("name")?)?,
                phone: parse_string_expr(row.require("phone")?)?,
            })
        }
        "appointments" => {
            if columns.is_empty() {
                return Err(SqlError::Parse("appointments INSERT needs a column list".into()));
            }
            let row = Row::new(&columns, values, &[])?;
            row.reject_unknown(&["customer_id", "service_code", "start", "duration_minutes"])?;
            let customer_id = parse_ulid_expr(row.require("customer_id")?)?;
            let start = parse_instant_expr(row.require("start")?)?;

            match (row.get("service_code"), row.get("duration_minutes")) {
                (Some(_), Some(_)) => Err(SqlError::Parse(
                    "service_code and duration_minutes are mutually exclusive".into(),
                )),
                (Some(code), None) => Ok(Command::InsertServiceAppointment {
                    customer_id,
                    service_code: parse_string_expr(code)?,
                    start,
                }),
                (None, duration) => Ok(Command::InsertDirectAppointment {
                    customer_id,
                    start,
                    duration_minutes: match duration {
                        Some(d) => parse_u32_expr(d)?,
                        None => DEFAULT_APPOINTMENT_MINUTES,
                    },
                }),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &a.value));
    }

    match table.as_str() {
        "customers" => {
            let (mut name, mut phone) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string_expr(value)?),
                    "phone" => phone = Some(parse_string_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateCustomer { id, name, phone })
        }
        "appointments" => {
            let (mut start, mut duration_minutes) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "start" => start = Some(parse_instant_expr(value)?),
                    "duration_minutes" => duration_minutes = Some(parse_u32_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateAppointment { id, start, duration_minutes })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "customers" => Ok(Command::DeleteCustomer { id }),
        "appointments" => Ok(Command::DeleteAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "customers" => {
            reject_filters(&filters, &[])?;
            Ok(Command::SelectCustomers)
        }
        "services" => {
            reject_filters(&filters, &[])?;
            Ok(Command::SelectServices)
        }
        "appointments" => {
            reject_filters(&filters, &["group_id", "customer_id"])?;
            Ok(Command::SelectAppointments {
                group_id: find_filter(&filters, "group_id").map(parse_ulid_expr).transpose()?,
                customer_id: find_filter(&filters, "customer_id")
                    .map(parse_ulid_expr)
                    .transpose()?,
            })
        }
        "availability" => {
            reject_filters(&filters, &["start", "service_code"])?;
            let start = find_filter(&filters, "start").ok_or(SqlError::MissingFilter("start"))?;
            Ok(Command::SelectAvailability {
                start: parse_instant_expr(start)?,
                service_code: find_filter(&filters, "service_code")
                    .map(parse_string_expr)
                    .transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms joined by AND.
fn extract_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            extract_eq_filters(left, out)?;
            extract_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn find_filter<'a>(filters: &[(String, &'a Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
}

fn reject_filters(filters: &[(String, &Expr)], allowed: &[&str]) -> Result<(), SqlError> {
    match filters.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
        Some((c, _)) => Err(SqlError::UnknownColumn(c.clone())),
        None => Ok(()),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    /// `positional` names the columns when the INSERT has no column list.
    fn new(columns: &[String], values: &'a [Expr], positional: &[&str]) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            positional.iter().map(|s| s.to_string()).collect()
        } else {
            columns.to_vec()
        };
        if names.len() != values.len() {
            return Err(SqlError::WrongArity(names.len(), values.len()));
        }
        Ok(Self { cells: names.into_iter().zip(values.iter()).collect() })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.cells.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }

    fn reject_unknown(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.cells.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(c.clone())),
            None => Ok(()),
        }
    }
}

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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_instant_expr(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    parse_instant(&parse_string_expr(expr)?)
}

fn parse_u32_expr(expr: &Expr) -> Result<u32, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad minutes {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    InvalidInstant(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidInstant(s) => {
                write!(f, "invalid instant {s:?} (expected YYYY-MM-DDTHH:MM)")
            }
        }
    }
}

impl std::error::Error for SqlError {}
