//! Native Rust implementation of the RNS core of SEAL-style homomorphic
//! encryption: exact arithmetic modulo a plaintext modulus (BFV) and
//! approximate arithmetic on scaled values (CKKS) over the polynomial ring
//! Z_q\[X\]/(X^N+1).
//!
//! The crate provides parameter validation and the modulus switching chain,
//! key generation, encryption and decryption, and the full evaluator:
//! addition, full-RNS multiplication, relinearization, modulus switching
//! and rescaling, Galois automorphisms and rotations, all resting on a
//! lazy negacyclic NTT and fast RNS base conversion.
//!
//! # Example
//!
//! ```rust
//! use sealy_core::{
//!     BFVEvaluator, BfvEncryptionParametersBuilder, CoefficientModulusFactory, Context,
//!     Decryptor, DegreeType, Encryptor, Evaluator, KeyGenerator, Plaintext, SecurityLevel,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let params = BfvEncryptionParametersBuilder::new()
//!         .set_poly_modulus_degree(DegreeType::D4096)
//!         .set_coefficient_modulus(
//!             CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
//!         )
//!         .set_plain_modulus_u64(1024)
//!         .build()?;
//!
//!     let ctx = Context::new(&params, false, SecurityLevel::TC128)?;
//!     let gen = KeyGenerator::new(&ctx)?;
//!
//!     let public_key = gen.create_public_key();
//!     let secret_key = gen.secret_key();
//!
//!     let encryptor = Encryptor::with_public_key(&ctx, &public_key)?;
//!     let decryptor = Decryptor::new(&ctx, secret_key)?;
//!     let evaluator = BFVEvaluator::new(&ctx)?;
//!
//!     let plaintext = Plaintext::from_hex_string("3x^2 + 7")?;
//!     let ciphertext = encryptor.encrypt(&plaintext)?;
//!     let doubled = evaluator.add(&ciphertext, &ciphertext)?;
//!
//!     let decrypted = decryptor.decrypt(&doubled)?;
//!     assert_eq!(decrypted.get_coefficient(0), 14);
//!     assert_eq!(decrypted.get_coefficient(2), 6);
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

mod ciphertext;
mod context;
mod context_data;
mod decryptor;
mod encryptor;
mod error;
mod evaluator;
mod key_generator;
mod memory;
mod modulus;
mod parameters;
mod plaintext;
mod random;
pub(crate) mod util;

pub use ciphertext::Ciphertext;
pub use context::Context;
pub use context_data::{ContextData, EncryptionParameterQualifiers};
pub use decryptor::Decryptor;
pub use encryptor::{
	marker as encryptor_marker, Asym, AsymmetricEncryptor, Encryptor, Sym, SymAsym,
	SymAsymEncryptor, SymmetricEncryptor,
};
pub use error::{Error, Result};
pub use evaluator::bfv::BFVEvaluator;
pub use evaluator::ckks::CKKSEvaluator;
pub use evaluator::Evaluator;
pub use key_generator::{
	GaloisKey, KeyGenerator, KeySwitchingKey, PublicKey, RelinearizationKey, SecretKey,
};
pub use memory::{MemoryPool, PoolBuffer};
pub use modulus::{
	CoefficientModulusFactory, DegreeType, Modulus, PlainModulusFactory, SecurityLevel,
	ShoupOperand,
};
pub use parameters::*;
pub use plaintext::Plaintext;
pub use random::{ChaChaRandomGeneratorFactory, RandomGeneratorFactory, RandomSeed};

#[cfg(any(test, feature = "deterministic"))]
pub use random::DeterministicRandomGeneratorFactory;
