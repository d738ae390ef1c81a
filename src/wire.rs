use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
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

use crate::booking::{BookingService, CallContext, ReservationRequest};
use crate::engine::EngineError;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct SlotbookHandler {
    service: Arc<BookingService>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    /// Clients tag their requests through `application_name`.
    fn call_context<C: ClientInfo>(client: &C) -> CallContext {
        match client.metadata().get("application_name") {
            Some(name) if !name.trim().is_empty() => CallContext::new(name.clone()),
            _ => CallContext::generated(),
        }
    }

    async fn execute(&self, ctx: &CallContext, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(ctx, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, ctx: &CallContext, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertReservation {
                resource_id,
                customer_name,
                customer_email,
                start,
                end,
            } => {
                let request = ReservationRequest {
                    resource_id,
                    customer: Customer {
                        name: customer_name,
                        email: customer_email,
                    },
                    start,
                    end,
                };
                let created = self
                    .service
                    .create_reservation(ctx, request)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![created])
            }
            Command::SelectReservation { id } => {
                match self.service.get_reservation(ctx, id).await {
                    Ok(r) => reservation_rows(vec![r]),
                    Err(EngineError::NotFound(_)) => reservation_rows(Vec::new()),
                    Err(e) => Err(engine_err(e)),
                }
            }
            Command::SelectReservations { resource_id } => {
                let list = self
                    .service
                    .list_reservations(ctx, resource_id)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(list)
            }
            Command::DeleteReservation { id } => {
                let deleted = self
                    .service
                    .delete_reservation(ctx, id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(deleted)),
                ))
            }
        }
    }
}

pub fn reservation_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    let int8 = |name: &str| FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text);
    vec![
        text("id"),
        text("resource_id"),
        text("customer_name"),
        text("customer_email"),
        int8("start"),
        int8("end"),
        text("status"),
        int8("created_at"),
    ]
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.resource_id.to_string())?;
            encoder.encode_field(&r.customer.name)?;
            encoder.encode_field(&r.customer.email)?;
            encoder.encode_field(&r.span.start)?;
            encoder.encode_field(&r.span.end)?;
            encoder.encode_field(&r.status.as_str().to_string())?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// INSERT answers with the created row, SELECT with rows; DELETE has no row set.
fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start().to_uppercase();
    head.starts_with("SELECT") || head.starts_with("INSERT")
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
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
        let ctx = Self::call_context(client);
        Ok(vec![self.execute(&ctx, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
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
        if returns_rows(stmt) {
            Ok(reservation_schema())
        } else {
            Ok(vec![])
        }
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

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
        let ctx = Self::call_context(client);
        let sql = substitute_params(portal);
        self.execute(&ctx, &sql).await
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
        let fields = if returns_rows(&target.statement) {
            reservation_schema()
        } else {
            vec![]
        };
        Ok(DescribeStatementResponse::new(param_types, fields))
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
        if returns_rows(&target.statement.statement) {
            Ok(DescribePortalResponse::new(reservation_schema()))
        } else {
            Ok(DescribePortalResponse::new(vec![]))
        }
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over the statement text. Inlined values are never
/// rescanned, and `$N` inside a quoted literal is left alone.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_quote = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_quote = !in_quote;
            out.push(c);
            continue;
        }
        if c != '$' || in_quote {
            out.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let index = sql[digits_start..digits_end].parse::<usize>().ok();
        match index.and_then(|n| n.checked_sub(1)).and_then(|n| params.get(n)) {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[i..digits_end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self {
            handler: Arc::new(SlotbookHandler::new(service)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<BookingService>,
) -> std::io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(service));
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
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
