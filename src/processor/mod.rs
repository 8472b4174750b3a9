pub mod block;
pub mod log;
pub mod transaction;

pub use block::BlockProcessor;
pub use log::LogProcessor;
pub use transaction::TransactionProcessor;
