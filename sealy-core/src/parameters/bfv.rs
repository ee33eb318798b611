use std::sync::Arc;

use crate::random::RandomGeneratorFactory;
use crate::{DegreeType, EncryptionParameters, Error, Modulus, SchemeType};

use super::{CoefficientModulusType, ModulusDegreeType, PlainModulusType};

/// Represents a builder that sets up and creates encryption scheme
/// parameters for the BFV scheme. The parameters (most importantly
/// PolyModulus, CoeffModulus, PlainModulus) significantly affect the
/// performance, capabilities, and security of the encryption scheme.
pub struct BfvEncryptionParametersBuilder {
	poly_modulus_degree: ModulusDegreeType,
	coefficient_modulus: CoefficientModulusType,
	plain_modulus: PlainModulusType,
	random_factory: Option<Arc<dyn RandomGeneratorFactory>>,
}

impl BfvEncryptionParametersBuilder {
	/// Creates a new builder.
	pub fn new() -> Self {
		Self {
			poly_modulus_degree: ModulusDegreeType::NotSet,
			coefficient_modulus: CoefficientModulusType::NotSet,
			plain_modulus: PlainModulusType::NotSet,
			random_factory: None,
		}
	}

	/// Set the degree of the polynomial used in the BFV scheme. Generally,
	/// larger values provide more security and noise margin at the expense
	/// of performance.
	pub fn set_poly_modulus_degree(mut self, degree: DegreeType) -> Self {
		self.poly_modulus_degree = ModulusDegreeType::Constant(degree);
		self
	}

	/// Sets the coefficient modulus parameter. The coefficient modulus
	/// consists of a list of distinct prime numbers, represented by a vector
	/// of Modulus objects. The coefficient modulus directly affects the size
	/// of ciphertext elements, the amount of computation that the scheme can
	/// perform (bigger is better), and the security level (bigger is worse).
	/// Each of the primes must be 30 to 60 bits and congruent to 1 modulo
	/// 2*poly_modulus_degree.
	pub fn set_coefficient_modulus(mut self, modulus: Vec<Modulus>) -> Self {
		self.coefficient_modulus = CoefficientModulusType::Modulus(modulus);
		self
	}

	/// Set the plaintext modulus to a fixed size. Not recommended.
	/// Ideally, create a batching-capable modulus with
	/// `PlainModulusFactory::batching()` and call set_plain_modulus.
	pub fn set_plain_modulus_u64(mut self, modulus: u64) -> Self {
		self.plain_modulus = PlainModulusType::Constant(modulus);
		self
	}

	/// Set the plaintext modulus. Passing a prime congruent to 1 modulo
	/// 2*poly_modulus_degree enables batching.
	pub fn set_plain_modulus(mut self, modulus: Modulus) -> Self {
		self.plain_modulus = PlainModulusType::Modulus(modulus);
		self
	}

	/// Overrides the random generator factory backing key generation and
	/// encryption.
	pub fn set_random_generator_factory(mut self, factory: Arc<dyn RandomGeneratorFactory>) -> Self {
		self.random_factory = Some(factory);
		self
	}

	/// Validate the parameter choices and return the encryption parameters.
	pub fn build(self) -> Result<EncryptionParameters, Error> {
		let mut params = EncryptionParameters::new(SchemeType::Bfv)?;

		match self.poly_modulus_degree {
			ModulusDegreeType::NotSet => return Err(Error::DegreeNotSet),
			ModulusDegreeType::Constant(d) => params.set_poly_modulus_degree(d.into())?,
		}

		match self.coefficient_modulus {
			CoefficientModulusType::NotSet => return Err(Error::CoefficientModulusNotSet),
			CoefficientModulusType::Modulus(m) => params.set_coefficient_modulus(m)?,
		};

		match self.plain_modulus {
			PlainModulusType::NotSet => return Err(Error::PlainModulusNotSet),
			PlainModulusType::Constant(p) => {
				params.set_plain_modulus_u64(p)?;
			}
			PlainModulusType::Modulus(m) => {
				params.set_plain_modulus(m)?;
			}
		};

		if let Some(factory) = self.random_factory {
			params.set_random_generator_factory(factory);
		}

		Ok(params)
	}
}

impl Default for BfvEncryptionParametersBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use crate::*;

	#[test]
	fn can_build_params() {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus_u64(1234)
			.build()
			.unwrap();

		assert_eq!(params.get_poly_modulus_degree(), 4096);
		assert_eq!(params.get_scheme(), SchemeType::Bfv);
		assert_eq!(params.get_plain_modulus().value(), 1234);
		assert_eq!(params.get_coefficient_modulus().len(), 3);
	}

	#[test]
	fn missing_fields_are_reported() {
		let err = BfvEncryptionParametersBuilder::new().build().unwrap_err();
		assert_eq!(err, Error::DegreeNotSet);

		let err = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.build()
			.unwrap_err();
		assert_eq!(err, Error::CoefficientModulusNotSet);

		let err = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.build()
			.unwrap_err();
		assert_eq!(err, Error::PlainModulusNotSet);
	}
}
