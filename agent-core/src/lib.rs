pub mod error;
pub mod error_utils;
pub mod ports;
pub mod settings;
pub mod types;

pub use error::*;
pub use error_utils::*;
pub use ports::*;
pub use settings::Settings;
pub use types::*;
