pub mod combat;
pub mod constants;
pub mod grid;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod room;
pub mod scheduler;
pub mod types;
pub mod visibility;
pub mod win_ledger;
