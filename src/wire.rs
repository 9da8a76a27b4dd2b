use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::EngineError;
use crate::model::*;
use crate::observability;
use crate::service::{BookingRequest, BookingService, ServiceError, format_ms};
use crate::sql::{self, Command, SqlError};

pub struct RentaldHandler {
    service: Arc<BookingService>,
    query_parser: Arc<RentaldQueryParser>,
}

impl RentaldHandler {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(RentaldQueryParser),
        }
    }

    async fn run_query(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();

        let result = self.execute_command(cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        result.map_err(|e| {
            debug!("{label} failed: {e}");
            service_err(e)
        })
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, ServiceError> {
        match cmd {
            Command::InsertBooking {
                first_name,
                last_name,
                vehicle_id,
                start_date,
                end_date,
                returning,
            } => {
                let details = self
                    .service
                    .create_booking(BookingRequest {
                        first_name,
                        last_name,
                        vehicle_id,
                        start_date,
                        end_date,
                    })
                    .await?;
                if returning {
                    Ok(booking_rows(vec![details]))
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::SelectAvailability {
                vehicle_id,
                start_date,
                end_date,
            } => {
                let availability = self
                    .service
                    .check_availability(&vehicle_id, &start_date, &end_date)
                    .await?;
                Ok(availability_rows(&availability))
            }
            Command::SelectBookings { id: Some(id) } => {
                let details = self.service.get_booking(&id).await?;
                Ok(booking_rows(vec![details]))
            }
            Command::SelectBookings { id: None } => {
                let all = self.service.list_bookings().await?;
                Ok(booking_rows(all))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("first_name", Type::VARCHAR),
        text_field("last_name", Type::VARCHAR),
        text_field("vehicle_id", Type::INT4),
        text_field("vehicle_name", Type::VARCHAR),
        text_field("vehicle_model", Type::VARCHAR),
        text_field("vehicle_type", Type::VARCHAR),
        text_field("wheels", Type::INT2),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("created_at", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("vehicle_id", Type::INT4),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("is_available", Type::BOOL),
        text_field("conflicting_bookings", Type::JSON),
    ]
}

fn booking_rows(bookings: Vec<BookingDetails>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|d| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&d.booking.id.to_string())?;
            encoder.encode_field(&d.booking.first_name)?;
            encoder.encode_field(&d.booking.last_name)?;
            encoder.encode_field(&(d.vehicle.id as i32))?;
            encoder.encode_field(&d.vehicle.name)?;
            encoder.encode_field(&d.vehicle.model)?;
            encoder.encode_field(&d.vehicle_type.name)?;
            encoder.encode_field(&(d.vehicle_type.wheels as i16))?;
            encoder.encode_field(&format_ms(d.booking.span.start))?;
            encoder.encode_field(&format_ms(d.booking.span.end))?;
            encoder.encode_field(&d.booking.status.as_str().to_string())?;
            encoder.encode_field(&format_ms(d.booking.created_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn availability_rows(a: &Availability) -> Response {
    let schema = Arc::new(availability_schema());
    let rows: Vec<PgWireResult<_>> = std::iter::once(a)
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(a.vehicle_id as i32))?;
            encoder.encode_field(&format_ms(a.span.start))?;
            encoder.encode_field(&format_ms(a.span.end))?;
            encoder.encode_field(&a.is_available)?;
            encoder.encode_field(&conflicts_json(&a.conflicting_bookings))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// JSON array rendered into the `conflicting_bookings` column.
pub fn conflicts_json(bookings: &[Booking]) -> String {
    let items: Vec<serde_json::Value> = bookings
        .iter()
        .map(|b| {
            serde_json::json!({
                "id": b.id.to_string(),
                "first_name": b.first_name,
                "last_name": b.last_name,
                "start_date": format_ms(b.span.start),
                "end_date": format_ms(b.span.end),
                "status": b.status.as_str(),
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

/// Result columns a statement will produce, judged from its text. Used to
/// describe prepared statements before their parameters are bound.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.trim_start().starts_with("SELECT") || upper.contains("RETURNING") {
        booking_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RentaldHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run_query(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentaldQueryParser;

#[async_trait]
impl QueryParser for RentaldQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentaldHandler {
    type Statement = String;
    type QueryParser = RentaldQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run_query(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters (text format) as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    inline_params(&portal.statement.statement, &params)
}

/// Replace each `$N` with the N-th value in one left-to-right pass. Inlined
/// text is never rescanned, so a value containing `$1` stays literal.
fn inline_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let slot = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match slot {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            // Unbound or bare `$`: keep the original text.
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Auth, factory, connection ────────────────────────────────────

/// Single shared password for every user name.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub struct RentaldFactory {
    handler: Arc<RentaldHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RentaldFactory {
    pub fn new(service: Arc<BookingService>, password: String) -> Self {
        Self {
            handler: Arc::new(RentaldHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordAuthSource { password },
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentaldFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<RentaldFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for a failed booking operation.
pub fn sqlstate(e: &ServiceError) -> &'static str {
    match e {
        ServiceError::Validation(_) => "22023",
        ServiceError::Engine(e) => match e {
            EngineError::InvalidInterval { .. } | EngineError::PastDate { .. } => "22023",
            EngineError::NotFound(_) | EngineError::BookingNotFound(_) => "P0002",
            EngineError::AvailabilityConflict { .. } => "23P01",
            EngineError::Storage(_) => "58030",
        },
    }
}

fn service_err(e: ServiceError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
