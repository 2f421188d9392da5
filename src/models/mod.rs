pub mod provider;
pub mod proxy;

pub use provider::*;
pub use proxy::*;
