use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Parsed command from SQL input. Values stay as raw text; the booking
/// service owns validation and date parsing.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        first_name: String,
        last_name: String,
        vehicle_id: String,
        start_date: String,
        end_date: String,
        returning: bool,
    },
    SelectAvailability {
        vehicle_id: String,
        start_date: String,
        end_date: String,
    },
    SelectBookings {
        id: Option<String>,
    },
}

/// Column order used when an INSERT omits its column list.
const BOOKING_COLUMNS: [&str; 5] = ["first_name", "last_name", "vehicle_id", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_all_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Unsupported("multi-row INSERT into bookings".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        BOOKING_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("bookings", columns.len(), values.len()));
    }

    let mut fields: [Option<String>; 5] = Default::default();
    for (column, value) in columns.iter().zip(values) {
        let slot = BOOKING_COLUMNS
            .iter()
            .position(|c| *c == column.as_str())
            .ok_or_else(|| SqlError::UnknownColumn(column.clone()))?;
        fields[slot] = Some(literal_text(value)?);
    }
    let [first_name, last_name, vehicle_id, start_date, end_date] = fields;

    Ok(Command::InsertBooking {
        first_name: first_name.ok_or(SqlError::MissingColumn("first_name"))?,
        last_name: last_name.ok_or(SqlError::MissingColumn("last_name"))?,
        vehicle_id: vehicle_id.ok_or(SqlError::MissingColumn("vehicle_id"))?,
        start_date: start_date.ok_or(SqlError::MissingColumn("start_date"))?,
        end_date: end_date.ok_or(SqlError::MissingColumn("end_date"))?,
        returning: insert.returning.is_some(),
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "availability" => {
            let mut filters = AvailabilityFilters::default();
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut filters)?;
            }
            Ok(Command::SelectAvailability {
                vehicle_id: filters.vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
                start_date: filters.start_date.ok_or(SqlError::MissingFilter("start_date"))?,
                end_date: filters.end_date.ok_or(SqlError::MissingFilter("end_date"))?,
            })
        }
        "bookings" => {
            let id = match &select.selection {
                None => None,
                Some(expr) => Some(extract_where_id(expr)?),
            };
            Ok(Command::SelectBookings { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct AvailabilityFilters {
    vehicle_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

fn extract_availability_filters(expr: &Expr, filters: &mut AvailabilityFilters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_availability_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left);
            match (op, col.as_deref()) {
                (ast::BinaryOperator::And, _) => {
                    extract_availability_filters(left, filters)?;
                    extract_availability_filters(right, filters)?;
                }
                (ast::BinaryOperator::Eq, Some("vehicle_id")) => {
                    filters.vehicle_id = Some(literal_text(right)?);
                }
                (ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq, Some("start_date")) => {
                    filters.start_date = Some(literal_text(right)?);
                }
                (ast::BinaryOperator::Eq | ast::BinaryOperator::LtEq, Some("end_date")) => {
                    filters.end_date = Some(literal_text(right)?);
                }
                (_, Some(other)) => {
                    return Err(SqlError::Unsupported(format!("filter on {other} with {op}")));
                }
                _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
        }
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

fn extract_where_id(sel: &Expr) -> Result<String, SqlError> {
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => literal_text(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

/// String and numeric literals as their source text. `-5` keeps its sign so
/// the service can reject it as a non-positive id.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string or number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(format!("-{}", literal_text(expr)?))
    } else {
        Err(SqlError::Parse(format!("expected literal, got {expr}")))
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

    #[test]
    fn parse_insert_booking_named_columns() {
        let sql = "INSERT INTO bookings (first_name, last_name, vehicle_id, start_date, end_date) \
                   VALUES ('Ada', 'Lovelace', 3, '2025-06-01', '2025-06-05')";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBooking {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                vehicle_id: "3".into(),
                start_date: "2025-06-01".into(),
                end_date: "2025-06-05".into(),
                returning: false,
            }
        );
    }

    #[test]
    fn parse_insert_booking_reordered_columns() {
        let sql = "INSERT INTO bookings (vehicle_id, start_date, end_date, last_name, first_name) \
                   VALUES ('7', '2025-06-01T10:00:00Z', '2025-06-02T10:00:00Z', 'Hopper', 'Grace')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { first_name, last_name, vehicle_id, .. } => {
                assert_eq!(first_name, "Grace");
                assert_eq!(last_name, "Hopper");
                assert_eq!(vehicle_id, "7");
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_positional_with_returning() {
        let sql = "INSERT INTO bookings VALUES ('Ada', 'Lovelace', 1, '2025-06-01', '2025-06-05') RETURNING *";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { returning, first_name, .. } => {
                assert!(returning);
                assert_eq!(first_name, "Ada");
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_negative_vehicle_keeps_sign() {
        let sql = "INSERT INTO bookings VALUES ('Ada', 'Lovelace', -4, '2025-06-01', '2025-06-05')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { vehicle_id, .. } => assert_eq!(vehicle_id, "-4"),
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_missing_column_errors() {
        let sql = "INSERT INTO bookings (first_name, last_name, vehicle_id, start_date) \
                   VALUES ('Ada', 'Lovelace', 1, '2025-06-01')";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("end_date"))));
    }

    #[test]
    fn parse_insert_arity_mismatch_errors() {
        let sql = "INSERT INTO bookings VALUES ('Ada', 'Lovelace', 1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("bookings", 5, 3))));
    }

    #[test]
    fn parse_insert_unknown_column_errors() {
        let sql = "INSERT INTO bookings (first_name, last_name, vehicle_id, start_date, colour) \
                   VALUES ('Ada', 'Lovelace', 1, '2025-06-01', 'red')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = "INSERT INTO bookings VALUES \
                   ('Ada', 'Lovelace', 1, '2025-06-01', '2025-06-05'), \
                   ('Ada', 'Lovelace', 2, '2025-06-01', '2025-06-05')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE vehicle_id = 1 \
                   AND start_date >= '2025-06-01' AND end_date <= '2025-06-05'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                vehicle_id: "1".into(),
                start_date: "2025-06-01".into(),
                end_date: "2025-06-05".into(),
            }
        );
    }

    #[test]
    fn parse_select_availability_with_equality() {
        let sql = "SELECT * FROM availability WHERE (vehicle_id = '2' AND start_date = '2025-06-01') \
                   AND end_date = '2025-06-05'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { vehicle_id, end_date, .. } => {
                assert_eq!(vehicle_id, "2");
                assert_eq!(end_date, "2025-06-05");
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_filter() {
        let sql = "SELECT * FROM availability WHERE vehicle_id = 1 AND start_date >= '2025-06-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end_date"))));
    }

    #[test]
    fn parse_select_availability_rejects_other_operators() {
        let sql = "SELECT * FROM availability WHERE vehicle_id > 1 \
                   AND start_date >= '2025-06-01' AND end_date <= '2025-06-05'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_bookings() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'").unwrap(),
            Command::SelectBookings {
                id: Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".into())
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "SELECT * FROM vehicles";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "vehicles"));
    }

    #[test]
    fn parse_delete_unsupported() {
        let sql = "DELETE FROM bookings WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_garbage_errors() {
        assert!(matches!(parse_sql("SELEC oops"), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
