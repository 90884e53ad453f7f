pub mod analysis_routes;
pub mod health_routes;

pub use analysis_routes::*;
pub use health_routes::*;
