use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    // Identity
    RegisterUser {
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Authenticate {
        token: String,
    },
    WhoAmI,
    // Users
    UpdateUser {
        id: Ulid,
        patch: UserPatch,
    },
    DeleteUser {
        id: Ulid,
    },
    SelectUsers {
        id: Option<Ulid>,
    },
    // Categories
    InsertCategory {
        id: Ulid,
        name: String,
    },
    UpdateCategory {
        id: Ulid,
        name: String,
    },
    DeleteCategory {
        id: Ulid,
    },
    SelectCategories {
        id: Option<Ulid>,
    },
    // Resources
    InsertResource {
        id: Ulid,
        name: String,
        description: Option<String>,
        category_id: Option<Ulid>,
    },
    UpdateResource {
        id: Ulid,
        patch: ResourcePatch,
    },
    DeleteResource {
        id: Ulid,
    },
    SelectResources {
        id: Option<Ulid>,
    },
    // Custom fields
    InsertField {
        id: Ulid,
        resource_id: Ulid,
        key: String,
        value: String,
    },
    DeleteField {
        id: Ulid,
    },
    SelectFields {
        resource_id: Ulid,
    },
    // Reservations
    InsertReservation {
        id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        id: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    // Non-SQL verbs, parsed by prefix.
    if upper.starts_with("LOGIN ") || upper == "LOGIN" {
        let args = quoted_args(trimmed)?;
        if args.len() != 2 {
            return Err(SqlError::WrongArity("login", 2, args.len()));
        }
        let mut it = args.into_iter();
        return Ok(Command::Login {
            email: it.next().unwrap(),
            password: it.next().unwrap(),
        });
    }
    if upper.starts_with("AUTH ") || upper == "AUTH" {
        let args = quoted_args(trimmed)?;
        if args.len() != 1 {
            return Err(SqlError::WrongArity("auth", 1, args.len()));
        }
        return Ok(Command::Authenticate {
            token: args.into_iter().next().unwrap(),
        });
    }

    let tokens: Vec<&str> = upper.trim_end_matches(';').split_whitespace().collect();
    if tokens == ["SELECT", "CURRENT_USER"] {
        return Ok(Command::WhoAmI);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("users", 2, values.len()));
            }
            Ok(Command::RegisterUser {
                email: parse_string(&values[0])?,
                password: parse_string(&values[1])?,
            })
        }
        "categories" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("categories", 2, values.len()));
            }
            Ok(Command::InsertCategory {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
            })
        }
        "resources" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("resources", 2, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let name = parse_string(&values[1])?;
            let description = if values.len() >= 3 {
                parse_string_or_null(&values[2])?
            } else {
                None
            };
            let category_id = if values.len() >= 4 {
                parse_ulid_or_null(&values[3])?
            } else {
                None
            };
            Ok(Command::InsertResource {
                id,
                name,
                description,
                category_id,
            })
        }
        "fields" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("fields", 4, values.len()));
            }
            Ok(Command::InsertField {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                key: parse_string(&values[2])?,
                value: parse_string(&values[3])?,
            })
        }
        "reservations" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("reservations", 4, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                resource_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let tname = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match tname.as_str() {
        "users" => {
            let mut patch = UserPatch::default();
            for a in assignments {
                let col = assignment_column(a)?;
                match col.as_str() {
                    "email" => patch.email = Some(parse_string(&a.value)?),
                    "password" => patch.password = Some(parse_string(&a.value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateUser { id, patch })
        }
        "categories" => {
            let mut name = None;
            for a in assignments {
                let col = assignment_column(a)?;
                match col.as_str() {
                    "name" => name = Some(parse_string(&a.value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateCategory {
                id,
                name: name.ok_or(SqlError::MissingFilter("name"))?,
            })
        }
        "resources" => {
            let mut patch = ResourcePatch::default();
            for a in assignments {
                let col = assignment_column(a)?;
                match col.as_str() {
                    "name" => patch.name = Some(parse_string(&a.value)?),
                    "description" => {
                        patch.description = Some(parse_string_or_null(&a.value)?);
                    }
                    "category_id" => {
                        patch.category_id = Some(parse_ulid_or_null(&a.value)?);
                    }
                    "is_active" => patch.is_active = Some(parse_bool(&a.value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateResource { id, patch })
        }
        _ => Err(SqlError::UnknownTable(tname)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser { id }),
        "categories" => Ok(Command::DeleteCategory { id }),
        "resources" => Ok(Command::DeleteResource { id }),
        "fields" => Ok(Command::DeleteField { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
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
        collect_eq_filters(selection, &mut filters)?;
    }

    let id_filter = |filters: &[(String, Expr)]| -> Result<Option<Ulid>, SqlError> {
        for (col, expr) in filters {
            if col == "id" {
                return Ok(Some(parse_ulid_expr(expr)?));
            }
        }
        Ok(None)
    };

    match table.as_str() {
        "users" => Ok(Command::SelectUsers {
            id: id_filter(&filters)?,
        }),
        "categories" => Ok(Command::SelectCategories {
            id: id_filter(&filters)?,
        }),
        "resources" => Ok(Command::SelectResources {
            id: id_filter(&filters)?,
        }),
        "fields" => {
            for (col, expr) in &filters {
                if col == "resource_id" {
                    return Ok(Command::SelectFields {
                        resource_id: parse_ulid_expr(expr)?,
                    });
                }
            }
            Err(SqlError::MissingFilter("resource_id"))
        }
        "reservations" => Ok(Command::SelectReservations {
            id: id_filter(&filters)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk an AND-chained WHERE clause collecting `col = value` pairs.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, (**right).clone()));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

/// Extract all `'…'` quoted strings from a prefix-verb command line,
/// honoring the `''` escape.
fn quoted_args(input: &str) -> Result<Vec<String>, SqlError> {
    let mut args = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('\'') => {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            s.push('\'');
                        } else {
                            break;
                        }
                    }
                    Some(ch) => s.push(ch),
                    None => return Err(SqlError::Parse("unterminated string".into())),
                }
            }
            args.push(s);
        }
    }
    Ok(args)
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

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?,
            )),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
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
    WrongArity(&'static str, usize, usize),
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
