use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::context_data::ContextData;
use crate::error::{Error, Result};
use crate::modulus::{
	SecurityLevel, COEFF_MOD_BIT_COUNT_MAX, COEFF_MOD_BIT_COUNT_MIN, COEFF_MOD_COUNT_MAX,
};
use crate::parameters::{EncryptionParameters, ParmsId, SchemeType};

/// Performs sanity checks (validation) and pre-computations for a given set
/// of encryption parameters. While [`EncryptionParameters`] is a lightweight
/// value type, a `Context` is a heavyweight object constructed from it: it
/// validates the parameters for correctness, evaluates their properties, and
/// stores the results of several costly pre-computations.
///
/// The context owns a chain of [`ContextData`] instances. The first one
/// corresponds to the parameters exactly as supplied; these are reserved for
/// the key material (secret, public, relinearization and Galois keys) and
/// are called the key level. The rest of the chain is derived by repeatedly
/// removing the last prime of the coefficient modulus until a single prime
/// remains; ciphertexts and plaintexts live at these data levels, starting
/// at the first (largest) one. The chain is immutable after construction
/// and shared by every object derived from the context.
#[derive(Debug, Clone)]
pub struct Context {
	data: Vec<Arc<ContextData>>,
	parms_id_map: HashMap<ParmsId, usize>,
	key_parms_id: ParmsId,
	first_parms_id: ParmsId,
	last_parms_id: ParmsId,
	using_keyswitching: bool,
}

impl Context {
	/// Creates a context, validating the parameters against the
	/// HomomorphicEncryption.org security standard at the given level.
	///
	/// * `params` - The encryption parameters.
	/// * `expand_mod_chain` - Whether to build the full modulus switching
	///   chain or only the key and first data levels.
	/// * `security_level` - The enforced security level.
	pub fn new(
		params: &EncryptionParameters,
		expand_mod_chain: bool,
		security_level: SecurityLevel,
	) -> Result<Self> {
		Self::build(params, expand_mod_chain, Some(security_level))
	}

	/// Creates a context without enforcing a security level. The resulting
	/// parameters may be trivially breakable and should never protect real
	/// data.
	#[cfg(any(test, feature = "insecure-params"))]
	pub fn new_insecure(params: &EncryptionParameters, expand_mod_chain: bool) -> Result<Self> {
		Self::build(params, expand_mod_chain, None)
	}

	fn build(
		params: &EncryptionParameters,
		expand_mod_chain: bool,
		security_level: Option<SecurityLevel>,
	) -> Result<Self> {
		Self::validate(params, security_level)?;

		// The head of the chain holds every prime and is reserved for keys.
		let key_level = ContextData::new(params.clone(), security_level)?;
		let using_keyswitching = params.get_coefficient_modulus().len() >= 2;

		let mut chain = vec![key_level];
		if using_keyswitching {
			let mut parms = params.next_in_chain()?;
			loop {
				chain.push(ContextData::new(parms.clone(), security_level)?);
				if !expand_mod_chain || parms.get_coefficient_modulus().len() == 1 {
					break;
				}
				parms = parms.next_in_chain()?;
			}
		}

		let count = chain.len();
		let ids: Vec<ParmsId> = chain.iter().map(|c| c.parms_id()).collect();
		for (i, node) in chain.iter_mut().enumerate() {
			let prev = if i > 0 { Some(ids[i - 1]) } else { None };
			let next = ids.get(i + 1).copied();
			node.set_chain_links(count - 1 - i, prev, next);
		}

		let key_parms_id = ids[0];
		let first_parms_id = if using_keyswitching { ids[1] } else { ids[0] };
		let last_parms_id = *ids.last().expect("chain is never empty");

		debug!(
			levels = count,
			using_keyswitching,
			total_bits = chain[0].total_coeff_modulus_bit_count(),
			"context chain constructed"
		);

		let parms_id_map = ids
			.iter()
			.enumerate()
			.map(|(i, id)| (*id, i))
			.collect();

		Ok(Self {
			data: chain.into_iter().map(Arc::new).collect(),
			parms_id_map,
			key_parms_id,
			first_parms_id,
			last_parms_id,
			using_keyswitching,
		})
	}

	fn validate(params: &EncryptionParameters, security_level: Option<SecurityLevel>) -> Result<()> {
		let scheme = params.get_scheme();
		if scheme == SchemeType::None {
			return Err(Error::InvalidParameters);
		}
		let n = params.get_poly_modulus_degree();
		if n == 0 {
			return Err(Error::InvalidParameters);
		}
		let coeff_modulus = params.get_coefficient_modulus();
		if coeff_modulus.is_empty() || coeff_modulus.len() > COEFF_MOD_COUNT_MAX {
			return Err(Error::InvalidParameters);
		}
		for (i, q) in coeff_modulus.iter().enumerate() {
			if !(COEFF_MOD_BIT_COUNT_MIN..=COEFF_MOD_BIT_COUNT_MAX).contains(&q.bit_count()) {
				return Err(Error::InvalidParameters);
			}
			// Primes must be distinct; equal values break the CRT.
			if coeff_modulus[..i].iter().any(|p| p.value() == q.value()) {
				return Err(Error::InvalidParameters);
			}
		}

		let plain_modulus = params.get_plain_modulus();
		match scheme {
			SchemeType::Bfv => {
				if plain_modulus.is_zero()
					|| plain_modulus.bit_count() > COEFF_MOD_BIT_COUNT_MAX
				{
					return Err(Error::InvalidParameters);
				}
				// The plaintext modulus must be coprime to every prime for
				// the gamma-scaled decryption to exist.
				if coeff_modulus
					.iter()
					.any(|q| plain_modulus.value() % q.value() == 0)
				{
					return Err(Error::InvalidParameters);
				}
			}
			SchemeType::Ckks => {
				if !plain_modulus.is_zero() {
					return Err(Error::InvalidParameters);
				}
			}
			SchemeType::None => unreachable!(),
		}

		if let Some(level) = security_level {
			let max_bits = level
				.max_total_bit_count(n)
				.ok_or(Error::InvalidParameters)?;
			let total_bits: u32 = coeff_modulus.iter().map(|q| q.bit_count()).sum();
			if total_bits > max_bits {
				return Err(Error::InvalidParameters);
			}
		}
		Ok(())
	}

	/// Looks up the pre-computation data of a parameter set in the chain.
	pub fn get_context_data(&self, parms_id: &ParmsId) -> Option<Arc<ContextData>> {
		self.parms_id_map
			.get(parms_id)
			.map(|i| Arc::clone(&self.data[*i]))
	}

	/// The key-level node (all primes present).
	pub fn key_context_data(&self) -> Arc<ContextData> {
		Arc::clone(&self.data[0])
	}

	/// The first data-level node, where fresh ciphertexts live.
	pub fn first_context_data(&self) -> Arc<ContextData> {
		self.get_context_data(&self.first_parms_id)
			.expect("first level always exists")
	}

	/// The smallest node of the chain.
	pub fn last_context_data(&self) -> Arc<ContextData> {
		self.get_context_data(&self.last_parms_id)
			.expect("last level always exists")
	}

	/// Identifier of the key level.
	pub fn key_parms_id(&self) -> ParmsId {
		self.key_parms_id
	}

	/// Identifier of the first data level.
	pub fn first_parms_id(&self) -> ParmsId {
		self.first_parms_id
	}

	/// Identifier of the last data level.
	pub fn last_parms_id(&self) -> ParmsId {
		self.last_parms_id
	}

	/// Whether the parameters support key switching (at least two primes).
	pub fn using_keyswitching(&self) -> bool {
		self.using_keyswitching
	}
}

#[cfg(test)]
mod tests {
	use crate::*;

	fn bfv_params(bits: &[u32], t: u64) -> EncryptionParameters {
		BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, bits).unwrap(),
			)
			.set_plain_modulus_u64(t)
			.build()
			.unwrap()
	}

	#[test]
	fn can_create_and_drop_context() {
		let ctx = Context::new(&bfv_params(&[36, 36, 37], 256), false, SecurityLevel::TC128)
			.unwrap();

		std::mem::drop(ctx);
	}

	#[test]
	fn chain_has_key_and_data_levels() {
		let ctx =
			Context::new(&bfv_params(&[36, 36, 37], 256), true, SecurityLevel::TC128).unwrap();
		assert!(ctx.using_keyswitching());

		let key = ctx.key_context_data();
		assert_eq!(key.parms().get_coefficient_modulus().len(), 3);
		assert_eq!(key.prev_parms_id(), None);

		let first = ctx.first_context_data();
		assert_eq!(first.parms().get_coefficient_modulus().len(), 2);
		assert_eq!(first.prev_parms_id(), Some(ctx.key_parms_id()));
		assert_eq!(key.next_parms_id(), Some(ctx.first_parms_id()));

		let last = ctx.last_context_data();
		assert_eq!(last.parms().get_coefficient_modulus().len(), 1);
		assert_eq!(last.next_parms_id(), None);
		assert_eq!(last.chain_index(), 0);
		assert_eq!(key.chain_index(), 2);
	}

	#[test]
	fn without_expansion_chain_stops_at_first_level() {
		let ctx =
			Context::new(&bfv_params(&[36, 36, 37], 256), false, SecurityLevel::TC128).unwrap();
		assert_eq!(ctx.first_parms_id(), ctx.last_parms_id());
		assert_ne!(ctx.key_parms_id(), ctx.first_parms_id());
	}

	#[test]
	fn derived_constants_match_definitions() {
		let ctx =
			Context::new(&bfv_params(&[36, 36, 37], 256), false, SecurityLevel::TC128).unwrap();
		let data = ctx.first_context_data();
		let q: u128 = data
			.parms()
			.get_coefficient_modulus()
			.iter()
			.map(|m| m.value() as u128)
			.product();

		assert_eq!(data.coeff_mod_plain_modulus() as u128, q % 256);
		assert_eq!(data.plain_upper_half_threshold(), 128);
		let delta = q / 256;
		for (d, m) in data
			.coeff_div_plain_modulus()
			.iter()
			.zip(data.parms().get_coefficient_modulus())
		{
			assert_eq!(*d as u128, delta % m.value() as u128);
		}
		assert!(data.qualifiers().using_fast_plain_lift);
		assert!(!data.qualifiers().using_batching);
	}

	#[test]
	fn batching_qualifier_requires_congruent_prime() {
		let t = PlainModulusFactory::batching(DegreeType::D4096, 20).unwrap();
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[36, 36, 37]).unwrap(),
			)
			.set_plain_modulus(t)
			.build()
			.unwrap();
		let ctx = Context::new(&params, false, SecurityLevel::TC128).unwrap();
		assert!(ctx.first_context_data().qualifiers().using_batching);
	}

	#[test]
	fn security_level_is_enforced() {
		// 3 * 37 bits exceed the 109-bit budget at N = 4096.
		let params = bfv_params(&[37, 37, 37], 256);
		assert!(matches!(
			Context::new(&params, false, SecurityLevel::TC192),
			Err(Error::InvalidParameters)
		));
		assert!(Context::new_insecure(&params, false).is_ok());
	}

	#[test]
	fn single_prime_disables_keyswitching() {
		let params = BfvEncryptionParametersBuilder::new()
			.set_poly_modulus_degree(DegreeType::D4096)
			.set_coefficient_modulus(
				CoefficientModulusFactory::build(DegreeType::D4096, &[54]).unwrap(),
			)
			.set_plain_modulus_u64(256)
			.build()
			.unwrap();
		let ctx = Context::new(&params, true, SecurityLevel::TC128).unwrap();
		assert!(!ctx.using_keyswitching());
		assert_eq!(ctx.key_parms_id(), ctx.first_parms_id());
	}
}
