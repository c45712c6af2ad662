//! ExchangeRecord entity: the durable projection of a captured request

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "exchange_records")]
pub struct Model {
    /// Correlation id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Insertion order, breaks ties between equal start times
    pub sequence: i64,

    pub subdomain: Option<String>,
    pub method: String,
    pub uri: String,

    /// Request Content-Type without parameters, lowercased
    pub content_type: Option<String>,

    /// Request exactly as received (head + body)
    pub raw_request: Vec<u8>,

    pub start_time: ChronoDateTimeUtc,
    pub stop_time: Option<ChronoDateTimeUtc>,

    /// Milliseconds between start and stop, None while in flight
    pub duration_ms: Option<i64>,

    /// JSON-encoded classification result
    #[sea_orm(column_type = "Text", nullable)]
    pub classification: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::response_record::Entity")]
    ResponseRecord,
}

impl Related<super::response_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ResponseRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
