pub mod broadcast;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod overlay;
pub mod state;
pub mod storage;

pub use snaptrail_common::element;
pub use snaptrail_common::naming;
pub use snaptrail_common::protocol;
pub use snaptrail_common::session;
