pub mod assess;
pub mod classify;
pub mod coverage;
pub mod plan;
pub mod report;
pub mod status;
pub mod table_check;
