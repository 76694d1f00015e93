use std::fmt::Debug;
use std::io;
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
use ulid::Ulid;

use crate::auth::{self, ServerAuthSource, TokenConfig};
use crate::engine::{Engine, EngineError};
use crate::model::Caller;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Connection metadata key holding the AUTH-bound caller id.
const CALLER_KEY: &str = "reservd.caller_id";

pub struct ReservdHandler {
    tenant_manager: Arc<TenantManager>,
    tokens: Arc<TokenConfig>,
    query_parser: Arc<ReservdQueryParser>,
}

impl ReservdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, tokens: Arc<TokenConfig>) -> Self {
        Self {
            tenant_manager,
            tokens,
            query_parser: Arc::new(ReservdQueryParser),
        }
    }

    async fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = current_tenant(client);
        self.tenant_manager.get_or_create(&db).await.map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Resolve the caller bound to this connection by a previous AUTH.
    /// Re-resolved per command so a deleted account loses access immediately.
    fn current_caller<C: ClientInfo>(&self, engine: &Engine, client: &C) -> PgWireResult<Caller> {
        let Some(id_str) = client.metadata().get(CALLER_KEY) else {
            return Err(unauthorized("not authenticated; run AUTH '<token>' first"));
        };
        let id =
            Ulid::from_string(id_str).map_err(|_| unauthorized("corrupt session identity"))?;
        engine
            .resolve_caller(id)
            .ok_or_else(|| unauthorized("account no longer exists"))
    }

    async fn execute_command<C>(
        &self,
        engine: &Engine,
        client: &mut C,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Send + Sync,
    {
        match cmd {
            Command::RegisterUser { email, password } => {
                engine
                    .register_user(&email, &password)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Login { email, password } => {
                let tenant = current_tenant(client);
                let user = match engine.authenticate(&email, &password) {
                    Ok(user) => user,
                    Err(e) => {
                        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                        return Err(engine_err(e));
                    }
                };
                let (token, expires_at) = auth::issue_token(&self.tokens, user.id, &tenant)
                    .map_err(|e| internal_err(&format!("token signing failed: {e}")))?;

                let schema = Arc::new(token_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&token)?;
                encoder.encode_field(&expires_at)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Authenticate { token } => {
                let tenant = current_tenant(client);
                let claims = match auth::verify_token(&self.tokens, &token) {
                    Ok(claims) => claims,
                    Err(_) => {
                        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                        return Err(unauthorized("invalid or expired token"));
                    }
                };
                if claims.tenant != tenant {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    return Err(unauthorized("token issued for another database"));
                }
                let user_id = match Ulid::from_string(&claims.sub) {
                    Ok(id) => id,
                    Err(_) => {
                        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                        return Err(unauthorized("malformed token subject"));
                    }
                };
                if engine.resolve_caller(user_id).is_none() {
                    metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                    return Err(unauthorized("account no longer exists"));
                }
                client
                    .metadata_mut()
                    .insert(CALLER_KEY.to_string(), user_id.to_string());
                Ok(vec![Response::Execution(Tag::new("AUTH"))])
            }
            authenticated => {
                let caller = self.current_caller(engine, client)?;
                self.execute_authed(engine, &caller, authenticated).await
            }
        }
    }

    async fn execute_authed(
        &self,
        engine: &Engine,
        caller: &Caller,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::RegisterUser { .. } | Command::Login { .. } | Command::Authenticate { .. } => {
                unreachable!("handled before caller resolution")
            }
            Command::WhoAmI => {
                let user = engine
                    .user_info(caller.id)
                    .ok_or_else(|| unauthorized("account no longer exists"))?;
                let schema = Arc::new(users_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&user.id.to_string())?;
                encoder.encode_field(&user.email)?;
                encoder.encode_field(&user.role.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateUser { id, patch } => {
                engine
                    .update_user(caller, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteUser { id } => {
                engine.delete_user(caller, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectUsers { id } => {
                let users = match id {
                    Some(id) => vec![engine.get_user(caller, id).map_err(engine_err)?],
                    None => engine.list_users(caller).map_err(engine_err)?,
                };
                let schema = Arc::new(users_schema());
                let rows: Vec<PgWireResult<_>> = users
                    .into_iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.id.to_string())?;
                        encoder.encode_field(&u.email)?;
                        encoder.encode_field(&u.role.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertCategory { id, name } => {
                engine
                    .create_category(caller, id, &name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateCategory { id, name } => {
                engine
                    .update_category(caller, id, &name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteCategory { id } => {
                engine
                    .delete_category(caller, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectCategories { id } => {
                let categories = match id {
                    Some(id) => vec![engine.get_category(id).map_err(engine_err)?],
                    None => engine.list_categories(),
                };
                let schema = Arc::new(categories_schema());
                let rows: Vec<PgWireResult<_>> = categories
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertResource {
                id,
                name,
                description,
                category_id,
            } => {
                engine
                    .create_resource(caller, id, &name, description, category_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, patch } => {
                engine
                    .update_resource(caller, id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine
                    .delete_resource(caller, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources { id } => {
                let resources = match id {
                    Some(id) => vec![engine.get_resource(id).await.map_err(engine_err)?],
                    None => engine.list_resources().await,
                };
                let schema = Arc::new(resources_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.description)?;
                        encoder.encode_field(&r.category_id.map(|c| c.to_string()))?;
                        encoder.encode_field(&r.is_active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertField {
                id,
                resource_id,
                key,
                value,
            } => {
                engine
                    .add_field(caller, id, resource_id, &key, &value)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteField { id } => {
                engine.remove_field(caller, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectFields { resource_id } => {
                let fields = engine.list_fields(resource_id).await;
                let schema = Arc::new(fields_schema());
                let rows: Vec<PgWireResult<_>> = fields
                    .into_iter()
                    .map(|f| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&f.id.to_string())?;
                        encoder.encode_field(&f.resource_id.to_string())?;
                        encoder.encode_field(&f.key)?;
                        encoder.encode_field(&f.value)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertReservation {
                id,
                resource_id,
                start,
                end,
            } => match engine.book(caller, id, resource_id, start, end).await {
                Ok(_) => Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))]),
                Err(e) => {
                    if matches!(e, EngineError::Conflict(_)) {
                        metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                    }
                    Err(engine_err(e))
                }
            },
            Command::DeleteReservation { id } => {
                engine
                    .cancel_reservation(caller, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { id } => {
                let reservations = match id {
                    Some(id) => vec![engine.get_reservation(caller, id).await.map_err(engine_err)?],
                    None => engine.list_reservations(caller).await,
                };
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.resource_id.to_string())?;
                        encoder.encode_field(&r.user_id.to_string())?;
                        encoder.encode_field(&r.start)?;
                        encoder.encode_field(&r.end)?;
                        encoder.encode_field(&r.status.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn current_tenant<C: ClientInfo>(client: &C) -> String {
    client
        .metadata()
        .get("database")
        .cloned()
        .unwrap_or_else(|| "default".to_string())
}

// ── Result schemas ───────────────────────────────────────────────

fn token_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("token".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "expires_at".into(),
            None,
            None,
            Type::INT8,
            FieldFormat::Text,
        ),
    ]
}

fn users_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("email".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("role".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn categories_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "description".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "category_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("is_active".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn fields_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "resource_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("key".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("value".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "resource_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "user_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

/// Result schema for the extended protocol, derived from statement text.
fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.trim_start().starts_with("LOGIN") {
        token_schema()
    } else if upper.contains("CURRENT_USER") || upper.contains("FROM USERS") {
        users_schema()
    } else if upper.contains("FROM CATEGORIES") {
        categories_schema()
    } else if upper.contains("FROM RESOURCES") {
        resources_schema()
    } else if upper.contains("FROM FIELDS") {
        fields_schema()
    } else if upper.contains("FROM RESERVATIONS") {
        reservations_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for ReservdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, client, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReservdQueryParser;

#[async_trait]
impl QueryParser for ReservdQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ReservdHandler {
    type Statement = String;
    type QueryParser = ReservdQueryParser;

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
        let engine = self.resolve_engine(client).await?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, client, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let mut responses = result?;
        Ok(responses.remove(0))
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

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

// ── Factory ──────────────────────────────────────────────────────

pub struct ReservdFactory {
    handler: Arc<ReservdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ServerAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReservdFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        password: String,
        tokens: Arc<TokenConfig>,
    ) -> Self {
        let auth_source = ServerAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ReservdHandler::new(tenant_manager, tokens)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReservdFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tokens: Arc<TokenConfig>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = ReservdFactory::new(tenant_manager, password, tokens);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn unauthorized(msg: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "28000".into(),
        msg.to_string(),
    )))
}

fn internal_err(msg: &str) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "XX000".into(),
        msg.to_string(),
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    // Internal faults are logged with detail and surfaced without it.
    if let EngineError::WalError(detail) = &e {
        tracing::error!("storage failure: {detail}");
        return PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "XX000".into(),
            "internal storage error".into(),
        )));
    }

    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::EmailTaken(_) | EngineError::NameTaken(_) => {
            "23505"
        }
        EngineError::Conflict(_) => "23P01",
        EngineError::ResourceInactive(_)
        | EngineError::InvalidInterval { .. }
        | EngineError::AlreadyCancelled(_)
        | EngineError::InvalidRequest(_) => "22023",
        EngineError::HasReservations(_) | EngineError::CategoryInUse(_) => "23503",
        EngineError::Forbidden(_) => "42501",
        EngineError::Unauthorized(_) => "28P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
