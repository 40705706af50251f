pub mod health;
pub mod error;
pub mod execution;
pub mod messages;

pub use health::*;
pub use error::*;
pub use execution::*;
pub use messages::*;
