//! Persistent exchange store
//!
//! The store is the single source of truth for captured exchanges. It keeps at
//! most `capacity` exchanges; inserting a new one into a full store first
//! evicts the oldest (by start time, then insertion order).

use crate::classify::ClassificationResult;
use crate::exchange::{Exchange, LogSummary, Response};
use futures::{stream, Stream, TryStreamExt};
use localup_inspect_db::entities::{exchange_record, response_record};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Rows fetched per query when streaming a listing
const LIST_PAGE_SIZE: u64 = 50;

/// Request content types whose responses are scanned by search
const SEARCHABLE_CONTENT_TYPES: [&str; 3] = ["application/json", "text/html", "text/plain"];

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Failed to encode classification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Database-backed exchange store
#[derive(Clone)]
pub struct ExchangeStore {
    db: Arc<DatabaseConnection>,
    capacity: usize,
    /// Serializes writers so a read never observes a half-applied upsert
    write_lock: Arc<Mutex<()>>,
}

impl ExchangeStore {
    /// Wrap an already migrated connection
    pub fn new(db: DatabaseConnection, capacity: usize) -> Self {
        Self {
            db: Arc::new(db),
            capacity: capacity.max(1),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Connect, run migrations and optionally truncate both tables
    pub async fn open(
        database_url: &str,
        capacity: usize,
        truncate_on_start: bool,
    ) -> Result<Self, StoreError> {
        let db = localup_inspect_db::connect(database_url).await?;
        localup_inspect_db::migrate(&db).await?;

        let store = Self::new(db, capacity);
        if truncate_on_start {
            store.delete(None).await?;
            info!("Cleared captured exchanges from previous session");
        }

        Ok(store)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored exchanges
    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(exchange_record::Entity::find().count(self.db.as_ref()).await?)
    }

    /// Insert or update an exchange.
    ///
    /// Existing ids are updated in place. A new id in a full store evicts the
    /// single oldest exchange before the insert.
    pub async fn upsert(&self, exchange: &Exchange) -> Result<(), StoreError> {
        let classification = exchange
            .classification()
            .map(serde_json::to_string)
            .transpose()?;

        let _guard = self.write_lock.lock().await;
        let txn = self.db.begin().await?;

        match exchange_record::Entity::find_by_id(exchange.id())
            .one(&txn)
            .await?
        {
            Some(existing) => {
                let mut active: exchange_record::ActiveModel = existing.into();
                active.subdomain = Set(exchange.subdomain().map(str::to_string));
                active.method = Set(exchange.request().method.clone());
                active.uri = Set(exchange.request().uri.clone());
                active.content_type = Set(exchange.request().content_type());
                active.raw_request = Set(exchange.raw_request().to_vec());
                active.stop_time = Set(exchange.stop_time());
                active.duration_ms = Set(exchange.duration_ms());
                active.classification = Set(classification);
                active.update(&txn).await?;
            }
            None => {
                let count = exchange_record::Entity::find().count(&txn).await?;
                if count >= self.capacity as u64 {
                    evict_oldest(&txn).await?;
                }

                let sequence = exchange_record::Entity::find()
                    .order_by_desc(exchange_record::Column::Sequence)
                    .one(&txn)
                    .await?
                    .map(|last| last.sequence + 1)
                    .unwrap_or(0);

                exchange_record::ActiveModel {
                    id: Set(exchange.id().to_string()),
                    sequence: Set(sequence),
                    subdomain: Set(exchange.subdomain().map(str::to_string)),
                    method: Set(exchange.request().method.clone()),
                    uri: Set(exchange.request().uri.clone()),
                    content_type: Set(exchange.request().content_type()),
                    raw_request: Set(exchange.raw_request().to_vec()),
                    start_time: Set(exchange.start_time()),
                    stop_time: Set(exchange.stop_time()),
                    duration_ms: Set(exchange.duration_ms()),
                    classification: Set(classification),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    /// Insert or update the response stored for `id`. Returns false, and
    /// writes nothing, when the exchange is no longer stored.
    pub async fn attach_response(&self, id: &str, response: &Response) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let txn = self.db.begin().await?;

        if exchange_record::Entity::find_by_id(id).one(&txn).await?.is_none() {
            debug!("Not storing response of missing exchange {}", id);
            return Ok(false);
        }
        write_response(&txn, id, response).await?;

        txn.commit().await?;
        Ok(true)
    }

    /// Record the stop time, duration and response of a finished exchange in
    /// one transaction. Never inserts: returns false when the exchange was
    /// evicted or deleted in the meantime.
    pub async fn complete(&self, exchange: &Exchange) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let txn = self.db.begin().await?;

        let Some(record) = exchange_record::Entity::find_by_id(exchange.id())
            .one(&txn)
            .await?
        else {
            debug!("Not completing missing exchange {}", exchange.id());
            return Ok(false);
        };

        let mut active: exchange_record::ActiveModel = record.into();
        active.stop_time = Set(exchange.stop_time());
        active.duration_ms = Set(exchange.duration_ms());
        active.update(&txn).await?;

        if let Some(response) = exchange.response() {
            write_response(&txn, exchange.id(), response).await?;
        }

        txn.commit().await?;
        Ok(true)
    }

    /// All exchanges, newest first. Nothing is read until the listing is consumed.
    pub fn list(&self, with_responses: bool) -> ExchangeListing {
        ExchangeListing {
            store: self.clone(),
            with_responses,
        }
    }

    /// Point lookup, including the response if one was stored
    pub async fn find(&self, id: &str) -> Result<Option<Exchange>, StoreError> {
        let row = exchange_record::Entity::find_by_id(id)
            .find_also_related(response_record::Entity)
            .one(self.db.as_ref())
            .await
            .inspect_err(|e| error!("Failed to look up exchange {}: {}", id, e))?;

        Ok(row.map(|(record, response)| into_exchange(record, response)))
    }

    /// Summaries of exchanges whose URI or classification contains `term`,
    /// or whose response contains it when the request declared a text-like
    /// content type. Matching follows the backend's `LIKE` (ASCII
    /// case-insensitive on SQLite).
    pub async fn search(&self, term: &str) -> Result<Vec<LogSummary>, StoreError> {
        let pattern = format!("%{}%", term);

        let text_request = Condition::any()
            .add(exchange_record::Column::ContentType.is_in(SEARCHABLE_CONTENT_TYPES))
            .add(exchange_record::Column::ContentType.like("%+json"));
        let matches = Condition::any()
            .add(exchange_record::Column::Uri.like(pattern.as_str()))
            .add(exchange_record::Column::Classification.like(pattern.as_str()))
            .add(
                Condition::all()
                    .add(text_request)
                    .add(response_record::Column::RawResponse.like(pattern.as_str())),
            );

        let rows = exchange_record::Entity::find()
            .find_also_related(response_record::Entity)
            .filter(matches)
            .order_by_desc(exchange_record::Column::StartTime)
            .order_by_desc(exchange_record::Column::Sequence)
            .all(self.db.as_ref())
            .await
            .inspect_err(|e| error!("Failed to search exchanges: {}", e))?;

        Ok(rows
            .into_iter()
            .map(|(record, response)| into_exchange(record, response).summary())
            .collect())
    }

    /// Delete one exchange (and its response), or everything when `id` is None
    pub async fn delete(&self, id: Option<&str>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let txn = self.db.begin().await?;

        match id {
            Some(id) => {
                response_record::Entity::delete_by_id(id).exec(&txn).await?;
                exchange_record::Entity::delete_by_id(id).exec(&txn).await?;
                debug!("Deleted exchange {}", id);
            }
            None => {
                response_record::Entity::delete_many().exec(&txn).await?;
                exchange_record::Entity::delete_many().exec(&txn).await?;
                debug!("Cleared all exchanges");
            }
        }

        txn.commit().await?;
        Ok(())
    }

    async fn fetch_page(
        &self,
        offset: u64,
        limit: Option<u64>,
        with_responses: bool,
    ) -> Result<Vec<Exchange>, StoreError> {
        let mut query = exchange_record::Entity::find()
            .order_by_desc(exchange_record::Column::StartTime)
            .order_by_desc(exchange_record::Column::Sequence);
        // SQLite rejects OFFSET without LIMIT
        if let Some(limit) = limit {
            query = query.limit(limit).offset(offset);
        }

        let exchanges = if with_responses {
            query
                .find_also_related(response_record::Entity)
                .all(self.db.as_ref())
                .await?
                .into_iter()
                .map(|(record, response)| into_exchange(record, response))
                .collect()
        } else {
            query
                .all(self.db.as_ref())
                .await?
                .into_iter()
                .map(|record| into_exchange(record, None))
                .collect()
        };

        Ok(exchanges)
    }
}

/// Lazy newest-first view over the store. Each consumption re-queries.
#[derive(Clone)]
pub struct ExchangeListing {
    store: ExchangeStore,
    with_responses: bool,
}

impl ExchangeListing {
    /// Materialize the whole listing
    pub async fn fetch(&self) -> Result<Vec<Exchange>, StoreError> {
        self.store
            .fetch_page(0, None, self.with_responses)
            .await
            .inspect_err(|e| error!("Failed to list exchanges: {}", e))
    }

    /// Page through the listing one query at a time
    pub fn stream(&self) -> impl Stream<Item = Result<Exchange, StoreError>> {
        let store = self.store.clone();
        let with_responses = self.with_responses;

        stream::try_unfold(0u64, move |offset| {
            let store = store.clone();
            async move {
                let page = store
                    .fetch_page(offset, Some(LIST_PAGE_SIZE), with_responses)
                    .await?;
                if page.is_empty() {
                    return Ok::<_, StoreError>(None);
                }
                let next = offset + page.len() as u64;
                Ok(Some((
                    stream::iter(page.into_iter().map(Ok::<_, StoreError>)),
                    next,
                )))
            }
        })
        .try_flatten()
    }
}

async fn evict_oldest<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let oldest = exchange_record::Entity::find()
        .order_by_asc(exchange_record::Column::StartTime)
        .order_by_asc(exchange_record::Column::Sequence)
        .one(db)
        .await?;

    if let Some(oldest) = oldest {
        debug!("Evicting oldest exchange {}", oldest.id);
        response_record::Entity::delete_by_id(oldest.id.clone())
            .exec(db)
            .await?;
        exchange_record::Entity::delete_by_id(oldest.id)
            .exec(db)
            .await?;
    }

    Ok(())
}

async fn write_response<C: ConnectionTrait>(
    db: &C,
    id: &str,
    response: &Response,
) -> Result<(), DbErr> {
    let status_code = response.status_code().map(i32::from);
    let raw_response = response.raw_response().to_vec();

    match response_record::Entity::find_by_id(id).one(db).await? {
        Some(existing) => {
            let mut active: response_record::ActiveModel = existing.into();
            active.status_code = Set(status_code);
            active.raw_response = Set(raw_response);
            active.responded_at = Set(chrono::Utc::now());
            active.update(db).await?;
        }
        None => {
            response_record::ActiveModel {
                id: Set(id.to_string()),
                status_code: Set(status_code),
                raw_response: Set(raw_response),
                responded_at: Set(chrono::Utc::now()),
            }
            .insert(db)
            .await?;
        }
    }

    Ok(())
}

fn into_exchange(
    record: exchange_record::Model,
    response: Option<response_record::Model>,
) -> Exchange {
    let classification = record.classification.as_deref().and_then(|json| {
        serde_json::from_str::<ClassificationResult>(json)
            .inspect_err(|e| warn!("Ignoring unreadable classification of {}: {}", record.id, e))
            .ok()
    });

    let mut exchange = Exchange::restore(
        record.id,
        record.subdomain,
        &record.method,
        &record.uri,
        record.raw_request,
        record.start_time,
        record.stop_time,
        classification,
    );

    if let Some(response) = response {
        exchange.restore_response(Response::from_parts(
            response.raw_response,
            response.status_code.and_then(|s| u16::try_from(s).ok()),
        ));
    }

    exchange
}
