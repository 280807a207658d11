//! Stateless transforms that provider adapters compose into decode chains.

pub mod aes_cbc;
pub mod alphabet;
pub mod delegate;
pub mod error;
pub mod keystream;
pub mod pattern;
pub mod stage;
pub mod unpacker;

pub use aes_cbc::{Padding, decrypt_cbc, sequence_iv};
pub use alphabet::{STANDARD_ALPHABET, SubstitutionAlphabet};
pub use delegate::{OpaqueDecryptor, SignatureHeaderNames, SignedHeaders};
pub use error::DecodeError;
pub use keystream::{Fingerprint, HashAlgorithm, KeystreamCache};
pub use pattern::Pattern;
pub use stage::{ChainFailure, DecodeContext, DecodeStage, run_chain};
