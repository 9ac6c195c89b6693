use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::AppointdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::identity::{Identity, SessionIdentity};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, RowKind};

pub struct AppointdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<AppointdQueryParser>,
}

impl AppointdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(AppointdQueryParser),
        }
    }

    /// The session principal is the user whose id is the login name.
    fn identity<C: ClientInfo>(&self, client: &C) -> SessionIdentity {
        let login = client.metadata().get("user").map(String::as_str);
        SessionIdentity::from_login(login, self.engine.repository())
    }

    async fn run(
        &self,
        identity: &dyn Identity,
        sql: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(identity, cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(
        &self,
        identity: &dyn Identity,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { id, email, role } => {
                let user = engine.register_user(id, email, role).await.map_err(engine_err)?;
                user_rows(vec![user], format)
            }
            Command::InsertAppointment(req) => {
                let appt = engine
                    .create_appointment(identity, req)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(vec![appt], format)
            }
            Command::SelectAppointment { id } => {
                let appt = engine.get_appointment(identity, id).await.map_err(engine_err)?;
                appointment_rows(vec![appt], format)
            }
            Command::SelectAppointments { page } => {
                let appts = engine
                    .list_my_appointments(identity, page)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(appts, format)
            }
            Command::SelectUser { id } => {
                let user = engine.get_user(identity, id).await.map_err(engine_err)?;
                user_rows(vec![user], format)
            }
            Command::UpdateAppointment { id, update } => {
                let appt = engine
                    .update_appointment(identity, id, update)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(vec![appt], format)
            }
            Command::DeleteAppointment { id } => {
                engine.delete_appointment(identity, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn appointment_schema(format: &Format) -> Vec<FieldInfo> {
    let columns = [
        ("id", Type::VARCHAR),
        ("title", Type::VARCHAR),
        ("description", Type::VARCHAR),
        ("date_time", Type::INT8),
        ("duration_minutes", Type::INT4),
        ("status", Type::VARCHAR),
        ("client_id", Type::VARCHAR),
        ("provider_id", Type::VARCHAR),
        ("created_at", Type::INT8),
        ("updated_at", Type::INT8),
    ];
    fields(&columns, format)
}

fn user_schema(format: &Format) -> Vec<FieldInfo> {
    let columns = [
        ("id", Type::VARCHAR),
        ("email", Type::VARCHAR),
        ("role", Type::VARCHAR),
        ("created_at", Type::INT8),
    ];
    fields(&columns, format)
}

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn schema_for(kind: Option<RowKind>, format: &Format) -> Vec<FieldInfo> {
    match kind {
        Some(RowKind::Appointment) => appointment_schema(format),
        Some(RowKind::User) => user_schema(format),
        None => vec![],
    }
}

fn appointment_rows(appts: Vec<Appointment>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(appointment_schema(format));
    let rows: Vec<PgWireResult<_>> = appts
        .into_iter()
        .map(|appt| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&appt.id.to_string())?;
            encoder.encode_field(&appt.title)?;
            encoder.encode_field(&appt.description)?;
            encoder.encode_field(&appt.date_time)?;
            encoder.encode_field(&(appt.duration_minutes as i32))?;
            encoder.encode_field(&appt.status.as_str().to_string())?;
            encoder.encode_field(&appt.client_id.to_string())?;
            encoder.encode_field(&appt.provider_id.to_string())?;
            encoder.encode_field(&appt.created_at)?;
            encoder.encode_field(&appt.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn user_rows(users: Vec<User>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(user_schema(format));
    let rows: Vec<PgWireResult<_>> = users
        .into_iter()
        .map(|user| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&user.id.to_string())?;
            encoder.encode_field(&user.email)?;
            encoder.encode_field(&user.role.as_str().to_string())?;
            encoder.encode_field(&user.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for AppointdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let identity = self.identity(client);
        let response = self.run(&identity, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AppointdQueryParser;

#[async_trait]
impl QueryParser for AppointdQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let text = Format::UnifiedText;
        Ok(schema_for(sql::row_kind(stmt), column_format.unwrap_or(&text)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AppointdHandler {
    type Statement = String;
    type QueryParser = AppointdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let identity = self.identity(client);
        let sql = substitute_params(portal);
        self.run(&identity, &sql, &portal.result_column_format).await
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
        let schema = schema_for(sql::row_kind(&target.statement), &Format::UnifiedText);
        Ok(DescribeStatementResponse::new(param_types, schema))
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
        let kind = sql::row_kind(&target.statement.statement);
        Ok(DescribePortalResponse::new(schema_for(kind, &target.result_column_format)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One pass over `sql`: each `$N` outside a quoted literal becomes the quoted
/// text of parameter N. Inserted values are never rescanned.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }

        let mut end = i + 1;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }
        let bound = sql[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|k| params.get(k));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AppointdFactory {
    handler: Arc<AppointdHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<AppointdAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl AppointdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = AppointdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AppointdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AppointdFactory {
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
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(AppointdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE reported for each engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Unauthenticated => "28000",
        EngineError::Forbidden | EngineError::NotClient | EngineError::ProvidersStatusOnly => {
            "42501"
        }
        EngineError::NotFound(_) | EngineError::ProviderNotFound(_) => "02000",
        EngineError::SlotUnavailable { .. } => "23P01",
        EngineError::EmailTaken(_) | EngineError::UserExists(_) => "23505",
        EngineError::InvalidTransition(_) | EngineError::InvalidState(_) => "55000",
        EngineError::Validation(_) => "22023",
        EngineError::PersistenceFailure(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
