pub mod execution_service;
pub mod headcount_service;
