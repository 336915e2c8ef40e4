pub mod accounts;
pub mod assets;
pub mod orchestrator;
pub mod worker;

pub use accounts::Accounts;
pub use assets::{compose_gif, public_url, AssetError, AssetStore, LocalAssetStore};
pub use orchestrator::{Orchestrator, Stores, INTERRUPTED};
pub use worker::{GenerationQueue, WorkerPool};
