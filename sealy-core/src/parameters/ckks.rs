use std::sync::Arc;

use crate::random::RandomGeneratorFactory;
use crate::{DegreeType, EncryptionParameters, Error, Modulus, SchemeType};

use super::{CoefficientModulusType, ModulusDegreeType};

/// Represents a builder that sets up and creates encryption scheme
/// parameters for the CKKS scheme. CKKS carries no plaintext modulus; the
/// precision of the approximate arithmetic is governed by the scale attached
/// to plaintexts and by the coefficient modulus chain.
pub struct CkksEncryptionParametersBuilder {
	poly_modulus_degree: ModulusDegreeType,
	coefficient_modulus: CoefficientModulusType,
	random_factory: Option<Arc<dyn RandomGeneratorFactory>>,
}

impl CkksEncryptionParametersBuilder {
	/// Creates a new builder.
	pub fn new() -> Self {
		Self {
			poly_modulus_degree: ModulusDegreeType::NotSet,
			coefficient_modulus: CoefficientModulusType::NotSet,
			random_factory: None,
		}
	}

	/// Set the degree of the polynomial used in the CKKS scheme.
	pub fn set_poly_modulus_degree(mut self, degree: DegreeType) -> Self {
		self.poly_modulus_degree = ModulusDegreeType::Constant(degree);
		self
	}

	/// Sets the coefficient modulus parameter. Under CKKS the sizes of the
	/// primes relative to the scale steer how much precision survives each
	/// rescaling.
	pub fn set_coefficient_modulus(mut self, modulus: Vec<Modulus>) -> Self {
		self.coefficient_modulus = CoefficientModulusType::Modulus(modulus);
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
		let mut params = EncryptionParameters::new(SchemeType::Ckks)?;

		match self.poly_modulus_degree {
			ModulusDegreeType::NotSet => return Err(Error::DegreeNotSet),
			ModulusDegreeType::Constant(d) => params.set_poly_modulus_degree(d.into())?,
		}

		match self.coefficient_modulus {
			CoefficientModulusType::NotSet => return Err(Error::CoefficientModulusNotSet),
			CoefficientModulusType::Modulus(m) => params.set_coefficient_modulus(m)?,
		};

		if let Some(factory) = self.random_factory {
			params.set_random_generator_factory(factory);
		}

		Ok(params)
	}
}

impl Default for CkksEncryptionParametersBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use crate::*;

	#[test]
	fn can_build_params() {
		let params = CkksEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D8192)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D8192, &[50, 30, 30, 50, 50]).unwrap(),
			)
			.build()
			.unwrap();

		assert_eq!(params.get_poly_modulus_degree(), 8192);
		assert_eq!(params.get_scheme(), SchemeType::Ckks);
		assert!(params.get_plain_modulus().is_zero());
		assert_eq!(params.get_coefficient_modulus().len(), 5);
	}
}
