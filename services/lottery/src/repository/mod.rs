pub mod memory;
pub mod postgres;
pub mod status;
pub mod store;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{LotteryStore, LotteryTx};
