pub mod transaction;
pub mod refund;
pub mod webhook_event;

pub use transaction::*;
pub use refund::*;
pub use webhook_event::*;
