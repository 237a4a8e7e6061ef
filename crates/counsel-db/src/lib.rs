pub mod counsel_store;
pub mod migrations;

pub use counsel_store::{
    CounselStore, HistoryRow, SummaryRow, UNKNOWN_USER_NAME, UserRecord,
};
