pub mod analysis_dto;
pub mod response_dto;

pub use analysis_dto::*;
pub use response_dto::*;
