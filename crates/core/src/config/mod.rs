pub mod fresh_config;
pub mod sources;
pub mod validation;

pub use fresh_config::*;
pub use sources::*;
pub use validation::*;
