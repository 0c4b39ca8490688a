// Landmarks, rule tables and session snapshots

pub mod landmark;
pub mod rule_table;
pub mod session;

pub use landmark::*;
pub use rule_table::*;
pub use session::*;
