pub mod balance;
pub mod lookup;
pub mod setup;
pub mod ui;
