// Sealing node common library - main library exports

pub mod crypto;
pub mod hash;
pub mod messages;
pub mod types;

// Flattened re-exports
pub use self::crypto::{KeyPair, PublicKey, Signature};
pub use self::hash::{hash_of, hash_of_parts, Hash, Identifier};
pub use self::types::*;
