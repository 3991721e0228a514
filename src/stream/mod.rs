pub mod buffer;
pub mod caches;
pub mod dispatch;
pub mod ingester;

pub use buffer::TradeBuffer;
pub use caches::{PendingOrders, WalletSets};
pub use dispatch::Dispatcher;
pub use ingester::StreamIngester;
