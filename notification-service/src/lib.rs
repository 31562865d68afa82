pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod notifier;
pub mod payment_links;
pub mod retry;
pub mod schema;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DispatchError, LedgerError};
