//! One processor pass: run the request at the head of the queue to
//! completion, report exactly one envelope and pop exactly once.

use crate::db::DatabaseService;
use crate::error::{BrokerError, BrokerResult};
use crate::executor::context::ExecutorContext;
use crate::executor::metadata::query_metadata;
use crate::executor::payload::decode_mutation_payload;
use crate::executor::queue::QueuedRequest;
use crate::executor::registry::generate_transaction_id;
use crate::host::{HandleOf, HostSurface};
use crate::models::{
    MutationKind, OrderedColumns, Request, ResponseData, ResponseEnvelope, ResponseMetadata,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error reported when a request names a transaction that is not open.
pub const TRANSACTION_ID_INVALID: &str = "transaction id is no longer valid";
/// Error reported when the service cannot open a connection.
pub const OPEN_FAILED: &str = "Unable to open database connection";
/// Error reported when the success-path commit fails.
pub const COMMIT_FAILED: &str = "error while committing transaction and closing database";

type QueryOutput = Option<(ResponseData, ResponseMetadata)>;

/// Terminal outcome of one request, before it is reported.
struct Completion {
    trans_id: Option<String>,
    result: Result<QueryOutput, String>,
}

impl Completion {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            trans_id: None,
            result: Err(message.into()),
        }
    }

    /// The request's connection was rolled back by a context release.
    fn released(reason: Option<String>) -> Self {
        let reason = reason.unwrap_or_else(|| "connection released".to_string());
        Self::failed(BrokerError::shutting_down(reason).to_string())
    }
}

pub(crate) struct Processor<H: HostSurface> {
    context: Arc<ExecutorContext<H>>,
}

impl<H: HostSurface> Processor<H> {
    pub(crate) fn new(context: Arc<ExecutorContext<H>>) -> Self {
        Self { context }
    }

    pub(crate) async fn run(self) {
        let ctx = &self.context;
        let Some(QueuedRequest { seq, request }) = ctx.peek_request() else {
            return;
        };

        if let Request::RefreshContext { reason } = &request {
            ctx.pop_request(seq);
            if let Some(previous) = ctx.take_superseded() {
                info!(
                    generation = ctx.generation(),
                    superseded = previous.generation(),
                    reason = %reason,
                    "Releasing superseded context"
                );
                previous.release_resources(reason).await;
            }
            return;
        }

        let Some(service) = ctx.host().database() else {
            debug!(
                generation = ctx.generation(),
                pending = ctx.queue_len(),
                "Database service unavailable, deferring"
            );
            return;
        };
        if !ctx.claim_request(seq) {
            return;
        }

        let callback = request.callback().unwrap_or_default().to_string();
        debug!(
            generation = ctx.generation(),
            kind = %request.kind(),
            callback = %callback,
            "Processing request"
        );
        let completion = self.execute(service.as_ref(), &request).await;

        let envelope = match completion.result {
            Ok(Some((data, metadata))) => ResponseEnvelope::success(
                &callback,
                completion.trans_id,
                Some(data),
                Some(metadata),
            ),
            Ok(None) => ResponseEnvelope::success(&callback, completion.trans_id, None, None),
            Err(message) => ResponseEnvelope::failure(&callback, completion.trans_id, message),
        };
        ctx.report_outcome(envelope);
        ctx.pop_request(seq);
    }

    async fn execute(&self, service: &H::Service, request: &Request) -> Completion {
        let ctx = &self.context;

        let existing = match request.transaction_id() {
            Some(id) => match ctx.get_active_connection(id) {
                Some(handle) => Some((id.to_string(), handle)),
                None => {
                    warn!(transaction_id = %id, kind = %request.kind(), "Unknown transaction id");
                    return Completion::failed(TRANSACTION_ID_INVALID);
                }
            },
            None => None,
        };

        // Nothing below may open a connection before the request is known
        // to be well formed and its table known to the service.
        let columns = match self.prepare(service, request).await {
            Ok(columns) => columns,
            Err(e) => {
                return match existing {
                    Some((id, handle)) => {
                        self.complete(service, id, handle, request.leave_open(), Err(e))
                            .await
                    }
                    None => Completion::failed(e.to_string()),
                };
            }
        };

        if let Request::CloseTransaction { commit, .. } = request {
            return match existing {
                Some((id, handle)) => self.close(service, &id, &handle, *commit).await,
                None => Completion::failed(
                    BrokerError::invalid_input("close requested without a transaction id")
                        .to_string(),
                ),
            };
        }

        let (trans_id, handle) = match existing {
            Some(pair) => pair,
            None => match self.open(service).await {
                Ok(pair) => pair,
                Err(completion) => return completion,
            },
        };

        let result = self
            .dispatch(service, &handle, request, columns.as_deref())
            .await;
        self.complete(service, trans_id, handle, request.leave_open(), result)
            .await
    }

    /// Validate the request and resolve its table schema.
    async fn prepare(
        &self,
        service: &H::Service,
        request: &Request,
    ) -> BrokerResult<Option<Arc<OrderedColumns>>> {
        request.validate()?;
        let Some(table_id) = request.table_id() else {
            return Ok(None);
        };
        if let Some(columns) = self.context.ordered_columns(table_id) {
            return Ok(Some(columns));
        }
        let columns = service
            .get_user_defined_columns(self.context.app_name(), table_id)
            .await?;
        debug!(table_id = %table_id, columns = columns.len(), "Cached table schema");
        Ok(Some(self.context.put_ordered_columns(columns)))
    }

    /// Open a connection and register it under a fresh transaction id.
    async fn open(&self, service: &H::Service) -> Result<(String, HandleOf<H>), Completion> {
        let ctx = &self.context;
        let handle = match service.open(ctx.app_name()).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    generation = ctx.generation(),
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Unable to open database connection"
                );
                return Err(Completion::failed(OPEN_FAILED));
            }
        };

        let transaction_id = generate_transaction_id();
        if let Err(e) = ctx.register_active_connection(&transaction_id, handle.clone()) {
            if let Err(close_err) = service
                .close_transaction(ctx.app_name(), &handle, false)
                .await
            {
                warn!(error = %close_err, "Rollback of unregistered connection failed");
            }
            return Err(Completion::failed(e.to_string()));
        }
        Ok((transaction_id, handle))
    }

    async fn dispatch(
        &self,
        service: &H::Service,
        handle: &HandleOf<H>,
        request: &Request,
        columns: Option<&OrderedColumns>,
    ) -> BrokerResult<QueryOutput> {
        let app = self.context.app_name();

        match request {
            Request::RawQuery {
                sql, bind_params, ..
            } => {
                let table = service.raw_query(app, handle, sql, bind_params).await?;
                let mut metadata = query_metadata(&table, None, None);
                self.context.extender().extend(&table, &mut metadata);
                Ok(Some((table.into_data(), metadata)))
            }
            Request::TableQuery { query, .. } => {
                let columns = require_columns(columns)?;
                let table_id = columns.table_id();
                let table = service
                    .query(app, handle, table_id, columns, query)
                    .await?;
                let key_value_store = if query.include_schema_map {
                    Some(service.get_table_metadata(app, handle, table_id).await?)
                } else {
                    None
                };
                let mut metadata =
                    query_metadata(&table, Some(columns), key_value_store.as_deref());
                self.context.extender().extend(&table, &mut metadata);
                Ok(Some((table.into_data(), metadata)))
            }
            Request::Mutation {
                kind,
                row_id,
                payload,
                ..
            } => {
                let columns = require_columns(columns)?;
                let table_id = columns.table_id();
                let row_id = row_id
                    .as_deref()
                    .ok_or_else(|| BrokerError::missing_field("rowId"))?;
                let values = if kind.uses_payload() {
                    decode_mutation_payload(columns, payload.as_deref())?
                } else {
                    Default::default()
                };

                match kind {
                    MutationKind::UpdateRow => {
                        service
                            .update_row(app, handle, table_id, columns, &values, row_id)
                            .await?
                    }
                    MutationKind::AddRow => {
                        service
                            .insert_row(app, handle, table_id, columns, &values, row_id)
                            .await?
                    }
                    MutationKind::AddCheckpoint => {
                        service
                            .add_checkpoint(app, handle, table_id, columns, &values, row_id)
                            .await?
                    }
                    MutationKind::DeleteRow => {
                        service.delete_row(app, handle, table_id, row_id).await?
                    }
                    MutationKind::SaveCheckpointIncomplete => {
                        service
                            .save_checkpoint_as_incomplete(app, handle, table_id, row_id)
                            .await?
                    }
                    MutationKind::SaveCheckpointComplete => {
                        service
                            .save_checkpoint_as_complete(app, handle, table_id, row_id)
                            .await?
                    }
                }
                debug!(
                    kind = %request.kind(),
                    table_id = %table_id,
                    row_id = %row_id,
                    "Mutation applied"
                );
                Ok(None)
            }
            Request::DeleteCheckpoint {
                row_id, delete_all, ..
            } => {
                let columns = require_columns(columns)?;
                let row_id = row_id
                    .as_deref()
                    .ok_or_else(|| BrokerError::missing_field("rowId"))?;
                service
                    .delete_checkpoints(app, handle, columns.table_id(), row_id, *delete_all)
                    .await?;
                Ok(None)
            }
            Request::RefreshContext { .. } | Request::CloseTransaction { .. } => Err(
                BrokerError::illegal_state(format!("{} is not dispatched", request.kind())),
            ),
        }
    }

    /// Apply the completion policy to a dispatched request.
    ///
    /// A connection no longer registered was rolled back by a release; the
    /// request then fails without a transaction id and nothing is closed.
    async fn complete(
        &self,
        service: &H::Service,
        trans_id: String,
        handle: HandleOf<H>,
        leave_open: bool,
        result: BrokerResult<QueryOutput>,
    ) -> Completion {
        let ctx = &self.context;
        let registered = if leave_open {
            ctx.get_active_connection(&trans_id).is_some()
        } else {
            ctx.remove_active_connection(&trans_id).is_some()
        };
        if !registered {
            warn!(
                transaction_id = %trans_id,
                "Connection released while request was running"
            );
            return Completion::released(ctx.released_reason());
        }

        match result {
            Ok(output) if leave_open => Completion {
                trans_id: Some(trans_id),
                result: Ok(output),
            },
            Ok(output) => match service.close_transaction(ctx.app_name(), &handle, true).await {
                Ok(()) => {
                    debug!(transaction_id = %trans_id, "Transaction committed");
                    Completion {
                        trans_id: None,
                        result: Ok(output),
                    }
                }
                Err(e) => {
                    error!(transaction_id = %trans_id, error = %e, "Commit failed");
                    Completion::failed(COMMIT_FAILED)
                }
            },
            Err(e) if leave_open => {
                warn!(
                    transaction_id = %trans_id,
                    error = %e,
                    "Request failed, transaction left open"
                );
                Completion {
                    trans_id: Some(trans_id),
                    result: Err(e.to_string()),
                }
            }
            Err(e) => {
                if let Err(rollback_err) = service
                    .close_transaction(ctx.app_name(), &handle, false)
                    .await
                {
                    warn!(transaction_id = %trans_id, error = %rollback_err, "Rollback failed");
                }
                debug!(
                    transaction_id = %trans_id,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Transaction rolled back"
                );
                Completion::failed(e.to_string())
            }
        }
    }

    /// Close an explicitly named transaction with the requested outcome.
    async fn close(
        &self,
        service: &H::Service,
        trans_id: &str,
        handle: &HandleOf<H>,
        commit: bool,
    ) -> Completion {
        let ctx = &self.context;
        if ctx.remove_active_connection(trans_id).is_none() {
            return Completion::released(ctx.released_reason());
        }
        match service.close_transaction(ctx.app_name(), handle, commit).await {
            Ok(()) => {
                info!(transaction_id = %trans_id, commit, "Transaction closed");
                Completion {
                    trans_id: None,
                    result: Ok(None),
                }
            }
            Err(e) if commit => {
                error!(transaction_id = %trans_id, error = %e, "Commit on close failed");
                Completion::failed(COMMIT_FAILED)
            }
            Err(e) => Completion::failed(e.to_string()),
        }
    }
}

fn require_columns(columns: Option<&OrderedColumns>) -> BrokerResult<&OrderedColumns> {
    columns.ok_or_else(|| BrokerError::missing_field("tableId"))
}
