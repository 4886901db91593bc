pub mod job;
pub mod receipt;
pub mod upload;
