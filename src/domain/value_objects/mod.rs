pub mod decision;
pub mod pnl;
pub mod price;
