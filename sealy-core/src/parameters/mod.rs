use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::modulus::{Modulus, COEFF_MOD_COUNT_MAX, POLY_DEGREE_MAX, POLY_DEGREE_MIN};
use crate::random::{ChaChaRandomGeneratorFactory, RandomGeneratorFactory};
use crate::util::uintarith::get_power_of_two;
use crate::DegreeType;

mod bfv;
pub use bfv::BfvEncryptionParametersBuilder;
mod ckks;
pub use ckks::CkksEncryptionParametersBuilder;

/// Alternative spelling kept for API compatibility.
pub type BFVEncryptionParametersBuilder = BfvEncryptionParametersBuilder;
/// Alternative spelling kept for API compatibility.
pub type CKKSEncryptionParametersBuilder = CkksEncryptionParametersBuilder;

/// Default standard deviation of the noise distribution.
pub const DEFAULT_NOISE_STANDARD_DEVIATION: f64 = 3.2;
/// Default clipping bound of the noise distribution (6 sigma).
pub const DEFAULT_NOISE_MAX_DEVIATION: f64 = 19.2;

/// The supported homomorphic encryption schemes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeType {
	/// None. Don't use this.
	None = 0x0,

	/// Brakerski/Fan-Vercauteren scheme for exact arithmetic modulo the
	/// plaintext modulus.
	Bfv = 0x1,

	/// Cheon-Kim-Kim-Song scheme for approximate arithmetic on complex
	/// vectors.
	Ckks = 0x2,
}

impl SchemeType {
	/// Converts a u8 to a SchemeType.
	pub fn from_u8(val: u8) -> Self {
		match val {
			0x0 => SchemeType::None,
			0x1 => SchemeType::Bfv,
			0x2 => SchemeType::Ckks,
			_ => panic!("Illegal scheme type"),
		}
	}
}

/// Content-addressed identifier of a parameter set: the SHA-256 hash of the
/// canonical encoding of (scheme, degree, coefficient modulus, plain
/// modulus). Equality of identifiers implies interoperable ciphertexts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParmsId(pub [u64; 4]);

impl ParmsId {
	/// The identifier of an unbound object.
	pub const ZERO: ParmsId = ParmsId([0; 4]);

	/// Returns whether this is the zero identifier.
	pub fn is_zero(&self) -> bool {
		self.0 == [0; 4]
	}
}

/// An immutable collection of parameters that defines an encryption scheme.
/// Use either the BFV or the CKKS builder to create one. Once created, these
/// objects are effectively immutable.
///
/// Picking appropriate encryption parameters is essential to enable a
/// particular application while balancing performance and security. Some
/// encryption settings will not allow some inputs (e.g. attempting to
/// encrypt a polynomial with more coefficients than PolyModulus or larger
/// coefficients than PlainModulus) or support the desired computations (with
/// noise growing too fast due to too large PlainModulus and too small
/// CoeffModulus).
///
/// The parameters maintain at all times a 256-bit hash of the currently set
/// values, the ParmsId. It acts as a unique identifier of the parameter set
/// and is carried by every object derived from it; in modulus switching the
/// ParmsId tracks the position in the chain of derived parameter sets.
#[derive(Debug, Clone)]
pub struct EncryptionParameters {
	scheme: SchemeType,
	poly_modulus_degree: u64,
	coeff_modulus: Vec<Modulus>,
	plain_modulus: Modulus,
	noise_standard_deviation: f64,
	noise_max_deviation: f64,
	random_factory: Arc<dyn RandomGeneratorFactory>,
	parms_id: ParmsId,
}

impl EncryptionParameters {
	/// Creates empty parameters for the given scheme.
	pub fn new(scheme: SchemeType) -> Result<Self> {
		let mut parms = Self {
			scheme,
			poly_modulus_degree: 0,
			coeff_modulus: vec![],
			plain_modulus: Modulus::zero(),
			noise_standard_deviation: DEFAULT_NOISE_STANDARD_DEVIATION,
			noise_max_deviation: DEFAULT_NOISE_MAX_DEVIATION,
			random_factory: Arc::new(ChaChaRandomGeneratorFactory::new()),
			parms_id: ParmsId::ZERO,
		};
		parms.recompute_parms_id();
		Ok(parms)
	}

	/// Sets the degree of the polynomial modulus X^N + 1. Must be a power of
	/// two; degrees below 1024 are usable only with insecure contexts.
	pub fn set_poly_modulus_degree(&mut self, degree: u64) -> Result<()> {
		if get_power_of_two(degree).is_none() || !(POLY_DEGREE_MIN..=POLY_DEGREE_MAX).contains(&degree)
		{
			return Err(Error::InvalidArgument("poly_modulus_degree is not valid"));
		}
		self.poly_modulus_degree = degree;
		self.recompute_parms_id();
		Ok(())
	}

	/// Sets the coefficient modulus as a list of distinct primes. Each prime
	/// must be congruent to 1 modulo 2N for the NTT to exist; this is
	/// checked during context construction.
	pub fn set_coefficient_modulus(&mut self, modulus: Vec<Modulus>) -> Result<()> {
		if modulus.is_empty() || modulus.len() > COEFF_MOD_COUNT_MAX {
			return Err(Error::InvalidArgument("invalid coefficient modulus size"));
		}
		self.coeff_modulus = modulus;
		self.recompute_parms_id();
		Ok(())
	}

	/// Sets the plaintext modulus (scheme B only).
	pub fn set_plain_modulus(&mut self, modulus: Modulus) -> Result<()> {
		if self.scheme != SchemeType::Bfv && !modulus.is_zero() {
			return Err(Error::Unsupported("plain modulus is only used by the BFV scheme"));
		}
		self.plain_modulus = modulus;
		self.recompute_parms_id();
		Ok(())
	}

	/// Sets the plaintext modulus from a raw value (scheme B only).
	pub fn set_plain_modulus_u64(&mut self, modulus: u64) -> Result<()> {
		self.set_plain_modulus(crate::PlainModulusFactory::raw(modulus)?)
	}

	/// Overrides the noise distribution. The standard deviation must be
	/// positive and the clipping bound at least as large.
	pub fn set_noise_distribution(&mut self, standard_deviation: f64, max_deviation: f64) -> Result<()> {
		if !(standard_deviation > 0.0) || max_deviation < standard_deviation {
			return Err(Error::InvalidArgument("invalid noise distribution"));
		}
		self.noise_standard_deviation = standard_deviation;
		self.noise_max_deviation = max_deviation;
		Ok(())
	}

	/// Replaces the random generator factory used by key generation and
	/// encryption.
	pub fn set_random_generator_factory(&mut self, factory: Arc<dyn RandomGeneratorFactory>) {
		self.random_factory = factory;
	}

	/// Returns the scheme the parameters were created for.
	pub fn get_scheme(&self) -> SchemeType {
		self.scheme
	}

	/// Returns the degree of the polynomial modulus.
	pub fn get_poly_modulus_degree(&self) -> u64 {
		self.poly_modulus_degree
	}

	/// Returns the coefficient modulus primes.
	pub fn get_coefficient_modulus(&self) -> &[Modulus] {
		&self.coeff_modulus
	}

	/// Returns the plaintext modulus. Zero under the CKKS scheme.
	pub fn get_plain_modulus(&self) -> &Modulus {
		&self.plain_modulus
	}

	/// Returns the noise standard deviation.
	pub fn noise_standard_deviation(&self) -> f64 {
		self.noise_standard_deviation
	}

	/// Returns the noise clipping bound.
	pub fn noise_max_deviation(&self) -> f64 {
		self.noise_max_deviation
	}

	/// Returns the random generator factory.
	pub fn random_generator(&self) -> &Arc<dyn RandomGeneratorFactory> {
		&self.random_factory
	}

	/// Returns the identifier of this parameter set.
	pub fn parms_id(&self) -> ParmsId {
		self.parms_id
	}

	/// Returns a copy of these parameters with the last coefficient prime
	/// removed. Fails when only one prime remains.
	pub(crate) fn next_in_chain(&self) -> Result<Self> {
		if self.coeff_modulus.len() < 2 {
			return Err(Error::ModulusChainTooSmall);
		}
		let mut next = self.clone();
		next.coeff_modulus.pop();
		next.recompute_parms_id();
		Ok(next)
	}

	fn recompute_parms_id(&mut self) {
		let mut hasher = Sha256::new();
		hasher.update((self.scheme as u64).to_le_bytes());
		hasher.update(self.poly_modulus_degree.to_le_bytes());
		hasher.update((self.coeff_modulus.len() as u64).to_le_bytes());
		for q in &self.coeff_modulus {
			hasher.update(q.value().to_le_bytes());
		}
		hasher.update(self.plain_modulus.value().to_le_bytes());
		let digest = hasher.finalize();
		let mut words = [0u64; 4];
		for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(8)) {
			*word = u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
		}
		self.parms_id = ParmsId(words);
	}
}

impl PartialEq for EncryptionParameters {
	fn eq(&self, other: &Self) -> bool {
		self.parms_id == other.parms_id
	}
}

impl Eq for EncryptionParameters {}

/// Helper for builders to express a not-yet-set degree.
pub(crate) enum ModulusDegreeType {
	/// Degree not configured yet.
	NotSet,
	/// Degree fixed to a supported constant.
	Constant(DegreeType),
}

/// Helper for builders to express a not-yet-set coefficient modulus.
pub(crate) enum CoefficientModulusType {
	/// Coefficient modulus not configured yet.
	NotSet,
	/// An explicit list of primes.
	Modulus(Vec<Modulus>),
}

/// Helper for builders to express a not-yet-set plain modulus.
pub(crate) enum PlainModulusType {
	/// Plain modulus not configured yet.
	NotSet,
	/// A raw u64 constant.
	Constant(u64),
	/// An explicit modulus.
	Modulus(Modulus),
}

#[cfg(test)]
mod tests {
	use crate::*;

	#[test]
	fn parms_id_tracks_content() {
		let a = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(1234)
			.build()
			.unwrap();
		let b = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(1234)
			.build()
			.unwrap();
		assert_eq!(a.parms_id(), b.parms_id());
		assert_eq!(a, b);

		let c = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(1235)
			.build()
			.unwrap();
		assert_ne!(a.parms_id(), c.parms_id());
	}

	#[test]
	fn chain_step_drops_last_prime() {
		let parms = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(1234)
			.build()
			.unwrap();
		let next = parms.next_in_chain().unwrap();
		assert_eq!(next.get_coefficient_modulus().len(), 2);
		assert_eq!(
			next.get_coefficient_modulus(),
			&parms.get_coefficient_modulus()[..2]
		);
		assert_ne!(next.parms_id(), parms.parms_id());

		let last = next.next_in_chain().unwrap();
		assert!(last.next_in_chain().is_err());
	}

	#[test]
	fn scheme_type_roundtrip() {
		assert_eq!(SchemeType::from_u8(1), SchemeType::Bfv);
		assert_eq!(SchemeType::from_u8(2), SchemeType::Ckks);
	}

	#[test]
	fn value_types_serialize() {
		let parms_id = ParmsId([1, 2, 3, 4]);
		let json = serde_json::to_string(&parms_id).unwrap();
		assert_eq!(serde_json::from_str::<ParmsId>(&json).unwrap(), parms_id);

		let modulus = Modulus::new(0xffffee001).unwrap();
		let json = serde_json::to_string(&modulus).unwrap();
		let back: Modulus = serde_json::from_str(&json).unwrap();
		assert_eq!(back, modulus);
		assert_eq!(back.value(), 0xffffee001);

		let json = serde_json::to_string(&SchemeType::Ckks).unwrap();
		assert_eq!(serde_json::from_str::<SchemeType>(&json).unwrap(), SchemeType::Ckks);
	}
}
