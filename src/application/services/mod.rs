pub mod decision_pipeline;
