pub mod schema;
pub mod source;
pub mod store;

pub use source::{
    read_categories_from, read_countries_from, read_optional, read_transactions, CategoryRef,
    CountryRef, SourceBatch,
};
pub use store::{SqliteStore, StarStore};
