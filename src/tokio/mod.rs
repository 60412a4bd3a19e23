//! Asynchronous PostgreSQL client using Tokio.

mod cancel;
mod conn;
mod notification;
mod portal;
mod row_stream;
mod statement;
mod transaction;
pub(crate) mod transport;

pub use cancel::CancelToken;
pub use conn::Conn;
pub use notification::Listener;
pub use portal::Portal;
pub use row_stream::RowStream;
pub use statement::Statement;
pub use transaction::Transaction;
pub use transport::Notification;
