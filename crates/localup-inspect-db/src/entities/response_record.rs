//! ResponseRecord entity: the response side-table, one row per answered exchange

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "response_records")]
pub struct Model {
    /// Correlation id of the owning exchange
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// None when the raw response could not be parsed
    pub status_code: Option<i32>,

    pub raw_response: Vec<u8>,

    pub responded_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Response belongs to its exchange
    #[sea_orm(
        belongs_to = "super::exchange_record::Entity",
        from = "Column::Id",
        to = "super::exchange_record::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ExchangeRecord,
}

impl Related<super::exchange_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExchangeRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
