pub mod health;
pub mod execute;

pub use health::*;
pub use execute::*;
