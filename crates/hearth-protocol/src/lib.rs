mod error;
mod messages;

pub use error::*;
pub use messages::*;
