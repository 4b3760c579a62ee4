pub mod http;
pub mod llm_advisor_client;
pub mod twelve_data_client;
