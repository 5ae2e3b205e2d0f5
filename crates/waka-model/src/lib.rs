mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;

mod constants;
pub use constants::*;
