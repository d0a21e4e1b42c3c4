//! File transfers derived from item events and folder sync cycles.

mod history;
mod transfer;

pub use history::{TransferHistory, DEFAULT_COMPLETED_CAPACITY};
pub use transfer::{FailingTransfer, FileTransfer, TransferStatus};
