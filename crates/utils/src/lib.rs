pub mod database;
pub mod grouping;
pub mod output;
pub mod tickers;
pub mod tracking;

// Re-export commonly used items
pub use crate::database::{ensure_database_exists, read_database, write_database};
pub use crate::grouping::{conflicts, partition_into_groups, sort_chronologically, TradeGroup};
pub use crate::output::{
    convert_trades, write_cash_file, write_position_file, write_trade_files, OutputKind,
};
pub use crate::tickers::{futures_ticker, month_code, month_code_from_abbrev};
pub use crate::tracking::{modified_time, FileStatus, FileTracker, TrackedFile, TrackingStats};
