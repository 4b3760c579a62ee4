pub mod account;
pub mod position;
pub mod trade;
