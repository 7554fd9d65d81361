use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
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
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, format_instant, Command, SqlError};

pub struct ChairbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ChairbookQueryParser>,
}

impl ChairbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ChairbookQueryParser),
        }
    }

    /// Execute with query metrics.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertCustomer { id, name, phone } => {
                engine.create_customer(id, name, phone).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateCustomer { id, name, phone } => {
                engine.update_customer(id, name, phone).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteCustomer { id } => {
                engine.delete_customer(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectCustomers => {
                let schema = Arc::new(customers_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_customers()
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        encoder.encode_field(&c.phone)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertServiceAppointment { customer_id, service_code, start } => {
                let booking = engine
                    .materialize(customer_id, &service_code, start)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(
                    Tag::new("INSERT").with_rows(booking.appointments.len()),
                ))
            }
            Command::InsertDirectAppointment { customer_id, start, duration_minutes } => {
                engine
                    .book_direct(customer_id, start, duration_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateAppointment { id, start, duration_minutes } => {
                let current = engine
                    .get_appointment(&id)
                    .await
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                engine
                    .reschedule(
                        id,
                        start.unwrap_or(current.start),
                        duration_minutes.unwrap_or(current.duration_minutes),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteAppointment { id } => {
                let removed = engine.delete_group(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(removed.len())))
            }
            Command::SelectAppointments { group_id, customer_id } => {
                let appointments = match group_id {
                    Some(gid) => engine.group_members(&gid).await,
                    None => engine.list_appointments().await,
                };
                let schema = Arc::new(appointments_schema());
                let rows: Vec<PgWireResult<_>> = appointments
                    .into_iter()
                    .filter(|a| customer_id.is_none_or(|cid| a.customer_id == cid))
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.customer_id.to_string())?;
                        encoder.encode_field(&format_instant(&a.start))?;
                        encoder.encode_field(&format_instant(&a.end()))?;
                        encoder.encode_field(&(a.duration_minutes as i64))?;
                        encoder.encode_field(&a.group_id.map(|g| g.to_string()))?;
                        encoder.encode_field(&a.service_code)?;
                        encoder.encode_field(&(a.block_index as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectServices => {
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_services()
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.code)?;
                        encoder.encode_field(&blocks_json(&s)?)?;
                        encoder.encode_field(&(s.total_minutes() as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAvailability { start, service_code } => {
                let services: Vec<Service> = match service_code {
                    Some(code) => {
                        let available =
                            engine.check_availability(&code, start).await.map_err(engine_err)?;
                        match engine.catalog().get(&code) {
                            Some(s) if available => vec![s.clone()],
                            _ => Vec::new(),
                        }
                    }
                    None => engine
                        .available_services(start)
                        .await
                        .map_err(engine_err)?
                        .into_values()
                        .collect(),
                };

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.code)?;
                        encoder.encode_field(&blocks_json(&s)?)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn blocks_json(service: &Service) -> PgWireResult<String> {
    serde_json::to_string(&service.blocks).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "XX000".into(),
            format!("encoding blocks: {e}"),
        )))
    })
}

// ── Schemas ──────────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn customers_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), text_field("phone")]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("customer_id"),
        text_field("start"),
        text_field("end"),
        int_field("duration_minutes"),
        text_field("group_id"),
        text_field("service_code"),
        int_field("block_index"),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![text_field("code"), text_field("blocks"), int_field("total_minutes")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("service_code"), text_field("blocks")]
}

/// Row shape of a statement; empty for anything but a SELECT on a known table.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("customers") => customers_schema(),
        Some("appointments") => appointments_schema(),
        Some("services") => services_schema(),
        Some("availability") => availability_schema(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for ChairbookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairbookQueryParser;

#[async_trait]
impl QueryParser for ChairbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairbookHandler {
    type Statement = String;
    type QueryParser = ChairbookQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
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

/// Replace `$1`, `$2`, ... with bound text parameters as quoted literals.
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

fn bind_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password; the user name is not checked.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairbookFactory {
    handler: Arc<ChairbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ChairbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = PasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ChairbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairbookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
) -> std::io::Result<()> {
    let factory = ChairbookFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) | EngineError::UnknownService(_) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::InvalidInstant(_) => "22007",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
