//! Database entities

pub mod exchange_record;
pub mod response_record;

pub use exchange_record::Entity as ExchangeRecord;
pub use response_record::Entity as ResponseRecord;

pub mod prelude {
    pub use super::exchange_record::Entity as ExchangeRecord;
    pub use super::response_record::Entity as ResponseRecord;
}
