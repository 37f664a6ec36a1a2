pub mod config;
pub mod credentials;
pub mod error;
pub mod history;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
