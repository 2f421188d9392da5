pub mod provider;

pub use provider::{ProviderRepository, ProviderStore};
