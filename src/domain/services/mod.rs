pub mod conversion;
pub mod import;
