pub mod market_data;
pub mod trade_advisor;
pub mod trading_store;
