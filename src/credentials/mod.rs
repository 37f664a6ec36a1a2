//! API keys and the per-run pool that hands them out.
//!
//! - [`keys`]: provider key formats, parsing of pasted key lists, masking
//! - [`pool`]: round-robin leasing with busy and cooldown tracking

pub mod keys;
pub mod pool;

pub use keys::{parse_keys, Credential, ParsedKeys, Provider};
pub use pool::{CredentialPool, Lease};
