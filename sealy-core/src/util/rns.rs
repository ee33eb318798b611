//! Fast base conversion between the ciphertext base q, the auxiliary base
//! Bsk = {m_1, ..., m_L, m_sk} and the correction moduli m_tilde and gamma,
//! plus the divide-by-last-prime primitives of modulus switching.
//!
//! Conversions out of q are approximate: the result is the exact CRT value
//! plus an unknown small multiple of q, which the Montgomery-style m_tilde
//! reduction removes. Conversion back from Bsk uses m_sk to recover the
//! centered representative.

use crate::error::{Error, Result};
use crate::memory::MemoryPool;
use crate::modulus::{generate_primes, Modulus, INTERNAL_MOD_BIT_COUNT};
use crate::util::ntt::{inverse_ntt_negacyclic, ntt_negacyclic, NttTables};
use crate::util::polyarith::{
	modulo_poly_coeffs, multiply_poly_scalar_assign, sub_poly_assign,
};
use crate::util::uintarith::{multiply_uint_u64, significant_bit_count};

/// Precomputed tables for base conversion over a fixed coefficient base.
///
/// Every chain node owns one; the Bsk and {t, gamma} machinery is only built
/// under the BFV scheme, while the last-prime inverses driving modulus
/// switching exist for both schemes.
#[derive(Debug)]
pub struct BaseConverter {
	coeff_count: usize,
	coeff_base: Vec<Modulus>,
	aux_base: Vec<Modulus>,
	bsk_base: Vec<Modulus>,
	plain_gamma_base: Vec<Modulus>,
	m_tilde: Modulus,
	m_sk: Modulus,
	gamma: Modulus,
	bsk_ntt_tables: Vec<NttTables>,

	// Punctured products q/q_i and the whole q, as word vectors.
	coeff_products: Vec<Vec<u64>>,
	coeff_whole: Vec<u64>,
	// (q/q_i)^{-1} mod q_i and the same scaled by m_tilde.
	inv_coeff_products_mod_coeff: Vec<u64>,
	mtilde_inv_coeff_products_mod_coeff: Vec<u64>,
	// (q/q_i) mod b for every b in Bsk (indexed [bsk][i]) and mod m_tilde.
	coeff_products_mod_bsk: Vec<Vec<u64>>,
	coeff_products_mod_mtilde: Vec<u64>,
	// q^{-1} mod b for every b in Bsk, and q mod b.
	inv_coeff_whole_mod_bsk: Vec<u64>,
	coeff_whole_mod_bsk: Vec<u64>,
	// q^{-1} mod m_tilde and m_tilde^{-1} mod b for every b in Bsk.
	inv_coeff_whole_mod_mtilde: u64,
	inv_mtilde_mod_bsk: Vec<u64>,
	// (B/m_j)^{-1} mod m_j, (B/m_j) mod q_i (indexed [i][j]) and mod m_sk.
	inv_aux_products_mod_aux: Vec<u64>,
	aux_products_mod_coeff: Vec<Vec<u64>>,
	aux_products_mod_msk: Vec<u64>,
	// B^{-1} mod m_sk and B mod q_i.
	inv_aux_whole_mod_msk: u64,
	aux_whole_mod_coeff: Vec<u64>,
	// (q/q_i) mod {t, gamma} (indexed [which][i]), (-q)^{-1} mod {t, gamma},
	// gamma^{-1} mod t and t*gamma mod q_i.
	coeff_products_mod_plain_gamma: Vec<Vec<u64>>,
	neg_inv_coeff_whole_mod_plain_gamma: Vec<u64>,
	inv_gamma_mod_plain: u64,
	plain_gamma_product_mod_coeff: Vec<u64>,
	// q_last^{-1} mod q_i for modulus switching.
	inv_last_coeff_mod: Vec<u64>,
}

impl BaseConverter {
	/// Generates the converter for the given coefficient base. The scheme-B
	/// machinery (auxiliary base, m_tilde, m_sk, gamma) is built only when
	/// `build_bsk` is set; `plain_modulus` may be zero under scheme C.
	pub fn generate(
		coeff_base: &[Modulus],
		coeff_count: usize,
		plain_modulus: &Modulus,
		build_bsk: bool,
	) -> Result<Self> {
		let k = coeff_base.len();
		if k == 0 || !coeff_count.is_power_of_two() {
			return Err(Error::InvalidParameters);
		}

		// Inverses of the last prime modulo the others, for descending the
		// modulus chain.
		let last = coeff_base[k - 1];
		let mut inv_last_coeff_mod = Vec::with_capacity(k.saturating_sub(1));
		for q in &coeff_base[..k - 1] {
			let value = q.reduce_u128(last.value() as u128);
			let inv = q.try_invert_mod(value).ok_or(Error::InvalidParameters)?;
			inv_last_coeff_mod.push(inv);
		}

		// Punctured products of the coefficient base, k words each.
		let coeff_products = punctured_products(coeff_base);
		let mut whole = vec![0u64; k + 1];
		whole[0] = 1;
		for q in coeff_base {
			let tmp = whole.clone();
			multiply_uint_u64(&tmp, q.value(), &mut whole);
		}

		let mut inv_coeff_products_mod_coeff = Vec::with_capacity(k);
		for (i, q) in coeff_base.iter().enumerate() {
			let reduced = modulo_product(&coeff_products[i], q);
			let inv = q.try_invert_mod(reduced).ok_or(Error::InvalidParameters)?;
			inv_coeff_products_mod_coeff.push(inv);
		}

		let coeff_whole = whole[..k].to_vec();
		if whole[k] != 0 {
			return Err(Error::InvalidParameters);
		}

		if !build_bsk {
			return Ok(Self {
				coeff_count,
				coeff_base: coeff_base.to_vec(),
				coeff_products,
				coeff_whole,
				aux_base: vec![],
				bsk_base: vec![],
				plain_gamma_base: vec![],
				m_tilde: Modulus::zero(),
				m_sk: Modulus::zero(),
				gamma: Modulus::zero(),
				bsk_ntt_tables: vec![],
				inv_coeff_products_mod_coeff,
				mtilde_inv_coeff_products_mod_coeff: vec![],
				coeff_products_mod_bsk: vec![],
				coeff_products_mod_mtilde: vec![],
				inv_coeff_whole_mod_bsk: vec![],
				coeff_whole_mod_bsk: vec![],
				inv_coeff_whole_mod_mtilde: 0,
				inv_mtilde_mod_bsk: vec![],
				inv_aux_products_mod_aux: vec![],
				aux_products_mod_coeff: vec![],
				aux_products_mod_msk: vec![],
				inv_aux_whole_mod_msk: 0,
				aux_whole_mod_coeff: vec![],
				coeff_products_mod_plain_gamma: vec![],
				neg_inv_coeff_whole_mod_plain_gamma: vec![],
				inv_gamma_mod_plain: 0,
				plain_gamma_product_mod_coeff: vec![],
				inv_last_coeff_mod,
			});
		}

		// The auxiliary base must satisfy prod m_j > q * K * N * t, where K
		// absorbs the cross terms of larger ciphertexts; 32 bits are
		// reserved for K * N. One more 61-bit prime is added when the
		// budget would otherwise be too tight.
		let total_coeff_bits: u32 = coeff_base.iter().map(|q| q.bit_count()).sum();
		let mut aux_count = k;
		if 32 + plain_modulus.bit_count() + total_coeff_bits
			>= INTERNAL_MOD_BIT_COUNT * (k as u32 + 1)
		{
			aux_count += 1;
		}

		let exclude: Vec<u64> = coeff_base.iter().map(|q| q.value()).collect();
		let internal = generate_primes(
			2 * coeff_count as u64,
			INTERNAL_MOD_BIT_COUNT,
			aux_count + 3,
			&exclude,
		)
		.map_err(|_| Error::InvalidParameters)?;
		let aux_base: Vec<Modulus> = internal[..aux_count]
			.iter()
			.map(|p| Modulus::new(*p))
			.collect::<Result<_>>()?;
		let m_sk = Modulus::new(internal[aux_count])?;
		let m_tilde = Modulus::new(internal[aux_count + 1])?;
		let gamma = Modulus::new(internal[aux_count + 2])?;

		let mut bsk_base = aux_base.clone();
		bsk_base.push(m_sk);

		let mut bsk_ntt_tables = Vec::with_capacity(bsk_base.len());
		let power = coeff_count.trailing_zeros();
		for b in &bsk_base {
			bsk_ntt_tables.push(NttTables::new(power, b).ok_or(Error::InvalidParameters)?);
		}

		// Punctured products of the auxiliary base and the derived inverses.
		let aux_products = punctured_products(&aux_base);
		let mut aux_whole = vec![0u64; aux_count + 1];
		aux_whole[0] = 1;
		for m in &aux_base {
			let tmp = aux_whole.clone();
			multiply_uint_u64(&tmp, m.value(), &mut aux_whole);
		}

		let mut inv_aux_products_mod_aux = Vec::with_capacity(aux_count);
		for (i, m) in aux_base.iter().enumerate() {
			let reduced = modulo_product(&aux_products[i], m);
			let inv = m.try_invert_mod(reduced).ok_or(Error::InvalidParameters)?;
			inv_aux_products_mod_aux.push(inv);
		}
		let aux_products_mod_msk: Vec<u64> = aux_products
			.iter()
			.map(|p| modulo_product(p, &m_sk))
			.collect();
		let inv_aux_whole_mod_msk = m_sk
			.try_invert_mod(modulo_product(&aux_whole, &m_sk))
			.ok_or(Error::InvalidParameters)?;
		let aux_whole_mod_coeff: Vec<u64> = coeff_base
			.iter()
			.map(|q| modulo_product(&aux_whole, q))
			.collect();
		let aux_products_mod_coeff: Vec<Vec<u64>> = coeff_base
			.iter()
			.map(|q| aux_products.iter().map(|p| modulo_product(p, q)).collect())
			.collect();

		// m_tilde scaling and its removal.
		let mut mtilde_inv_coeff_products_mod_coeff = Vec::with_capacity(k);
		for (q, inv) in coeff_base.iter().zip(&inv_coeff_products_mod_coeff) {
			mtilde_inv_coeff_products_mod_coeff
				.push(q.multiply_mod(*inv, q.reduce_u128(m_tilde.value() as u128)));
		}
		let coeff_products_mod_mtilde: Vec<u64> = coeff_products
			.iter()
			.map(|p| modulo_product(p, &m_tilde))
			.collect();
		let inv_coeff_whole_mod_mtilde = m_tilde
			.try_invert_mod(modulo_product(&whole, &m_tilde))
			.ok_or(Error::InvalidParameters)?;

		let coeff_products_mod_bsk: Vec<Vec<u64>> = bsk_base
			.iter()
			.map(|b| coeff_products.iter().map(|p| modulo_product(p, b)).collect())
			.collect();
		let mut inv_coeff_whole_mod_bsk = Vec::with_capacity(bsk_base.len());
		let mut inv_mtilde_mod_bsk = Vec::with_capacity(bsk_base.len());
		let mut coeff_whole_mod_bsk = Vec::with_capacity(bsk_base.len());
		for b in &bsk_base {
			let whole_mod_b = modulo_product(&whole, b);
			inv_coeff_whole_mod_bsk
				.push(b.try_invert_mod(whole_mod_b).ok_or(Error::InvalidParameters)?);
			inv_mtilde_mod_bsk.push(
				b.try_invert_mod(b.reduce_u128(m_tilde.value() as u128))
					.ok_or(Error::InvalidParameters)?,
			);
			coeff_whole_mod_bsk.push(whole_mod_b);
		}

		// The {t, gamma} base used by scaled decryption.
		let mut plain_gamma_base = vec![];
		let mut coeff_products_mod_plain_gamma = vec![];
		let mut neg_inv_coeff_whole_mod_plain_gamma = vec![];
		let mut inv_gamma_mod_plain = 0;
		let mut plain_gamma_product_mod_coeff = vec![];
		if !plain_modulus.is_zero() {
			plain_gamma_base = vec![*plain_modulus, gamma];
			for b in &plain_gamma_base {
				coeff_products_mod_plain_gamma
					.push(coeff_products.iter().map(|p| modulo_product(p, b)).collect());
				let neg = b.negate_mod(modulo_product(&whole, b));
				neg_inv_coeff_whole_mod_plain_gamma
					.push(b.try_invert_mod(neg).ok_or(Error::InvalidParameters)?);
			}
			inv_gamma_mod_plain = plain_modulus
				.try_invert_mod(plain_modulus.reduce_u128(gamma.value() as u128))
				.ok_or(Error::InvalidParameters)?;
			plain_gamma_product_mod_coeff = coeff_base
				.iter()
				.map(|q| q.multiply_mod(
					q.reduce_u128(plain_modulus.value() as u128),
					q.reduce_u128(gamma.value() as u128),
				))
				.collect();
		}

		Ok(Self {
			coeff_count,
			coeff_base: coeff_base.to_vec(),
			coeff_products,
			coeff_whole,
			aux_base,
			bsk_base,
			plain_gamma_base,
			m_tilde,
			m_sk,
			gamma,
			bsk_ntt_tables,
			inv_coeff_products_mod_coeff,
			mtilde_inv_coeff_products_mod_coeff,
			coeff_products_mod_bsk,
			coeff_products_mod_mtilde,
			inv_coeff_whole_mod_bsk,
			coeff_whole_mod_bsk,
			inv_coeff_whole_mod_mtilde,
			inv_mtilde_mod_bsk,
			inv_aux_products_mod_aux,
			aux_products_mod_coeff,
			aux_products_mod_msk,
			inv_aux_whole_mod_msk,
			aux_whole_mod_coeff,
			coeff_products_mod_plain_gamma,
			neg_inv_coeff_whole_mod_plain_gamma,
			inv_gamma_mod_plain,
			plain_gamma_product_mod_coeff,
			inv_last_coeff_mod,
		})
	}

	/// Number of primes in the coefficient base.
	pub fn coeff_base_count(&self) -> usize {
		self.coeff_base.len()
	}

	/// Number of primes in Bsk.
	pub fn bsk_base_count(&self) -> usize {
		self.bsk_base.len()
	}

	/// The Bsk moduli.
	pub fn bsk_base(&self) -> &[Modulus] {
		&self.bsk_base
	}

	/// NTT tables over Bsk.
	pub fn bsk_ntt_tables(&self) -> &[NttTables] {
		&self.bsk_ntt_tables
	}

	/// The {t, gamma} base of scaled decryption.
	pub fn plain_gamma_base(&self) -> &[Modulus] {
		&self.plain_gamma_base
	}

	/// (-q)^{-1} modulo t and gamma.
	pub fn neg_inv_coeff_whole_mod_plain_gamma(&self) -> &[u64] {
		&self.neg_inv_coeff_whole_mod_plain_gamma
	}

	/// gamma^{-1} modulo t.
	pub fn inv_gamma_mod_plain(&self) -> u64 {
		self.inv_gamma_mod_plain
	}

	/// t * gamma modulo each coefficient prime.
	pub fn plain_gamma_product_mod_coeff(&self) -> &[u64] {
		&self.plain_gamma_product_mod_coeff
	}

	/// q_last^{-1} modulo each surviving prime.
	pub fn inv_last_coeff_mod(&self) -> &[u64] {
		&self.inv_last_coeff_mod
	}

	/// Composes one coefficient from its residues into the multiprecision
	/// value modulo q. `residues[i]` is the value modulo the i-th prime;
	/// `destination` receives k words.
	pub fn compose_coeff(&self, residues: &[u64], destination: &mut [u64]) {
		let k = self.coeff_base.len();
		debug_assert_eq!(residues.len(), k);
		debug_assert_eq!(destination.len(), k);

		let mut acc = vec![0u64; k + 1];
		let mut term = vec![0u64; k + 1];
		let mut whole = vec![0u64; k + 1];
		whole[..k].copy_from_slice(&self.coeff_whole);
		for (i, q) in self.coeff_base.iter().enumerate() {
			let scaled = q.multiply_mod(residues[i], self.inv_coeff_products_mod_coeff[i]);
			term[..k].copy_from_slice(&self.coeff_products[i]);
			term[k] = 0;
			let product = term.clone();
			crate::util::uintarith::multiply_uint_u64(&product, scaled, &mut term);
			let tmp = acc.clone();
			crate::util::uintarith::add_uint(&tmp, &term, &mut acc);
		}
		// The sum of k terms each below q exceeds q by fewer than k
		// multiples.
		while crate::util::uintarith::is_greater_or_equal_uint(&acc, &whole) {
			let tmp = acc.clone();
			crate::util::uintarith::sub_uint(&tmp, &whole, &mut acc);
		}
		destination.copy_from_slice(&acc[..k]);
	}

	/// Fast base conversion q -> Bsk. The result is the CRT value plus an
	/// unknown small multiple of q.
	pub fn fastbconv(&self, input: &[u64], destination: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		debug_assert_eq!(input.len(), k * n);
		debug_assert_eq!(destination.len(), self.bsk_base.len() * n);

		let mut temp = pool.allocate(k * n);
		transpose_scaled(
			input,
			&self.coeff_base,
			&self.inv_coeff_products_mod_coeff,
			n,
			&mut temp,
		);
		for (j, b) in self.bsk_base.iter().enumerate() {
			accumulate_products(
				&temp,
				&self.coeff_products_mod_bsk[j],
				b,
				&mut destination[j * n..(j + 1) * n],
			);
		}
	}

	/// Fast base conversion q -> Bsk U {m_tilde}, the entry point of the
	/// scheme-B multiplication pipeline.
	pub fn fastbconv_mtilde(&self, input: &[u64], destination: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		let bsk = self.bsk_base.len();
		debug_assert_eq!(input.len(), k * n);
		debug_assert_eq!(destination.len(), (bsk + 1) * n);

		// Scale by m_tilde while decomposing so the q-overflow can be
		// recovered from the residue modulo m_tilde.
		let mut temp = pool.allocate(k * n);
		transpose_scaled(
			input,
			&self.coeff_base,
			&self.mtilde_inv_coeff_products_mod_coeff,
			n,
			&mut temp,
		);
		for (j, b) in self.bsk_base.iter().enumerate() {
			accumulate_products(
				&temp,
				&self.coeff_products_mod_bsk[j],
				b,
				&mut destination[j * n..(j + 1) * n],
			);
		}
		accumulate_products(
			&temp,
			&self.coeff_products_mod_mtilde,
			&self.m_tilde,
			&mut destination[bsk * n..(bsk + 1) * n],
		);
	}

	/// Montgomery-style reduction Bsk U {m_tilde} -> Bsk removing the
	/// alpha*q error term introduced by [`BaseConverter::fastbconv_mtilde`].
	pub fn mont_rq(&self, input: &[u64], destination: &mut [u64]) {
		let n = self.coeff_count;
		let bsk = self.bsk_base.len();
		debug_assert_eq!(input.len(), (bsk + 1) * n);
		debug_assert_eq!(destination.len(), bsk * n);

		let mtilde_input = &input[bsk * n..(bsk + 1) * n];
		for (j, b) in self.bsk_base.iter().enumerate() {
			let coeff_whole = self.coeff_whole_mod_bsk[j];
			let inv_mtilde = self.inv_mtilde_mod_bsk[j];
			for ((dest, value), r) in destination[j * n..(j + 1) * n]
				.iter_mut()
				.zip(&input[j * n..(j + 1) * n])
				.zip(mtilde_input)
			{
				let r_mtilde = self.m_tilde.negate_mod(
					self.m_tilde
						.multiply_mod(*r, self.inv_coeff_whole_mod_mtilde),
				);
				let tmp =
					b.reduce_u128(coeff_whole as u128 * r_mtilde as u128 + *value as u128);
				*dest = b.multiply_mod(tmp, inv_mtilde);
			}
		}
	}

	/// Computes floor(input / q) in Bsk; the input holds the same value in
	/// base q (first) and base Bsk (after).
	pub fn fast_floor(&self, input: &[u64], destination: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		let bsk = self.bsk_base.len();
		debug_assert_eq!(input.len(), (k + bsk) * n);
		debug_assert_eq!(destination.len(), bsk * n);

		self.fastbconv(&input[..k * n], destination, pool);

		let bsk_input = &input[k * n..];
		for (j, b) in self.bsk_base.iter().enumerate() {
			let inv_whole = self.inv_coeff_whole_mod_bsk[j];
			let b_value = b.value();
			for (dest, value) in destination[j * n..(j + 1) * n]
				.iter_mut()
				.zip(&bsk_input[j * n..(j + 1) * n])
			{
				// (x - [x]_q) / q; the negation folds into the addition.
				*dest = b.reduce_u128(
					(*value + b_value - *dest) as u128 * inv_whole as u128,
				);
			}
		}
	}

	/// Fast base conversion Bsk -> q using m_sk to correct the centered
	/// representative.
	pub fn fastbconv_sk(&self, input: &[u64], destination: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		let aux = self.aux_base.len();
		debug_assert_eq!(input.len(), (aux + 1) * n);
		debug_assert_eq!(destination.len(), k * n);

		// Convert the auxiliary part B -> q.
		let mut temp = pool.allocate(aux * n);
		transpose_scaled(
			&input[..aux * n],
			&self.aux_base,
			&self.inv_aux_products_mod_aux,
			n,
			&mut temp,
		);
		for (j, q) in self.coeff_base.iter().enumerate() {
			accumulate_products(
				&temp,
				&self.aux_products_mod_coeff[j],
				q,
				&mut destination[j * n..(j + 1) * n],
			);
		}

		// Convert B -> m_sk and recover the overflow count alpha_sk.
		let mut alpha_sk = pool.allocate(n);
		accumulate_products(&temp, &self.aux_products_mod_msk, &self.m_sk, &mut alpha_sk);
		let msk_input = &input[aux * n..];
		let msk_value = self.m_sk.value();
		for (alpha, x_sk) in alpha_sk.iter_mut().zip(msk_input) {
			// The negation need not be reduced before the multiplication.
			*alpha = self.m_sk.reduce_u128(
				(*alpha + msk_value - *x_sk) as u128 * self.inv_aux_whole_mod_msk as u128,
			);
		}

		// Subtract alpha_sk * B, correcting for the centered representative.
		let msk_half = msk_value >> 1;
		for (j, q) in self.coeff_base.iter().enumerate() {
			let aux_whole = self.aux_whole_mod_coeff[j];
			let neg_aux_whole = q.value() - aux_whole;
			for (dest, alpha) in destination[j * n..(j + 1) * n].iter_mut().zip(&*alpha_sk) {
				let wide = if *alpha > msk_half {
					aux_whole as u128 * (msk_value - *alpha) as u128 + *dest as u128
				} else {
					neg_aux_whole as u128 * *alpha as u128 + *dest as u128
				};
				*dest = q.reduce_u128(wide);
			}
		}
	}

	/// Fast base conversion q -> {t, gamma} used by scheme-B decryption.
	pub fn fastbconv_plain_gamma(&self, input: &[u64], destination: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		debug_assert!(!self.plain_gamma_base.is_empty());
		debug_assert_eq!(input.len(), k * n);
		debug_assert_eq!(destination.len(), 2 * n);

		let mut temp = pool.allocate(k * n);
		transpose_scaled(
			input,
			&self.coeff_base,
			&self.inv_coeff_products_mod_coeff,
			n,
			&mut temp,
		);
		for (j, b) in self.plain_gamma_base.iter().enumerate() {
			accumulate_products(
				&temp,
				&self.coeff_products_mod_plain_gamma[j],
				b,
				&mut destination[j * n..(j + 1) * n],
			);
		}
	}

	/// Divides an RNS polynomial by the last prime of the base with
	/// rounding, in the coefficient domain, dropping the last component.
	pub fn round_last_coeff_modulus_inplace(&self, rns_poly: &mut [u64], pool: &MemoryPool) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		debug_assert!(k >= 2);
		debug_assert_eq!(rns_poly.len(), k * n);

		let last = &self.coeff_base[k - 1];
		let half = last.value() >> 1;

		// Add q_last/2 to switch from flooring to rounding.
		let (head, last_poly) = rns_poly.split_at_mut((k - 1) * n);
		for c in last_poly.iter_mut() {
			*c = last.add_mod(*c, half);
		}

		let mut temp = pool.allocate(n);
		for (i, q) in self.coeff_base[..k - 1].iter().enumerate() {
			// ([x + q_last/2]_{q_last} - q_last/2) mod q_i
			modulo_poly_coeffs(last_poly, q, &mut temp);
			let half_mod = q.reduce(half);
			for c in temp.iter_mut() {
				*c = q.sub_mod(*c, half_mod);
			}
			let target = &mut head[i * n..(i + 1) * n];
			sub_poly_assign(target, &temp, q);
			multiply_poly_scalar_assign(target, self.inv_last_coeff_mod[i], q);
		}
	}

	/// As [`BaseConverter::round_last_coeff_modulus_inplace`] for a
	/// polynomial in NTT form; the last component leaves the NTT domain for
	/// the division and the correction re-enters it per prime.
	pub fn round_last_coeff_modulus_ntt_inplace(
		&self,
		rns_poly: &mut [u64],
		ntt_tables: &[NttTables],
		pool: &MemoryPool,
	) {
		let n = self.coeff_count;
		let k = self.coeff_base.len();
		debug_assert!(k >= 2);
		debug_assert_eq!(rns_poly.len(), k * n);
		debug_assert_eq!(ntt_tables.len(), k);

		let last = &self.coeff_base[k - 1];
		let half = last.value() >> 1;

		let (head, last_poly) = rns_poly.split_at_mut((k - 1) * n);
		inverse_ntt_negacyclic(last_poly, &ntt_tables[k - 1]);
		for c in last_poly.iter_mut() {
			*c = last.add_mod(*c, half);
		}

		let mut temp = pool.allocate(n);
		for (i, q) in self.coeff_base[..k - 1].iter().enumerate() {
			modulo_poly_coeffs(last_poly, q, &mut temp);
			let half_mod = q.reduce(half);
			for c in temp.iter_mut() {
				*c = q.sub_mod(*c, half_mod);
			}
			ntt_negacyclic(&mut temp, &ntt_tables[i]);
			let target = &mut head[i * n..(i + 1) * n];
			sub_poly_assign(target, &temp, q);
			multiply_poly_scalar_assign(target, self.inv_last_coeff_mod[i], q);
		}
	}
}

/// Punctured products prod_{j != i} base_j, each as a base-length word
/// vector.
fn punctured_products(base: &[Modulus]) -> Vec<Vec<u64>> {
	let k = base.len();
	let mut products = Vec::with_capacity(k);
	for i in 0..k {
		let mut value = vec![0u64; k];
		value[0] = 1;
		for (j, q) in base.iter().enumerate() {
			if i != j {
				let tmp = value.clone();
				multiply_uint_u64(&tmp, q.value(), &mut value);
			}
		}
		products.push(value);
	}
	products
}

fn modulo_product(value: &[u64], modulus: &Modulus) -> u64 {
	debug_assert!(significant_bit_count(value) > 0);
	crate::util::uintarith::modulo_uint(value, modulus.value())
}

/// Writes `input[i][coeff] * scale[i] mod base[i]` transposed so the inner
/// accumulation below walks memory sequentially.
fn transpose_scaled(input: &[u64], base: &[Modulus], scale: &[u64], n: usize, temp: &mut [u64]) {
	let k = base.len();
	for (i, (q, s)) in base.iter().zip(scale).enumerate() {
		let shoup = q.shoup(*s);
		for (coeff, value) in input[i * n..(i + 1) * n].iter().enumerate() {
			temp[i + coeff * k] = q.multiply_shoup(*value, shoup);
		}
	}
}

/// `destination[coeff] = sum_i temp[coeff][i] * weights[i] mod modulus`,
/// accumulated lazily in a 128-bit lane.
fn accumulate_products(temp: &[u64], weights: &[u64], modulus: &Modulus, destination: &mut [u64]) {
	let k = weights.len();
	for (coeff, dest) in destination.iter_mut().enumerate() {
		let mut acc = 0u128;
		for (value, weight) in temp[coeff * k..(coeff + 1) * k].iter().zip(weights) {
			// Products stay below 60+61 bits, so the lane cannot overflow
			// for any supported base size.
			acc += *value as u128 * *weight as u128;
		}
		*dest = modulus.reduce_u128(acc);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::modulus::CoefficientModulusFactory;

	fn setup(n: usize, bits: &[u32], t: u64) -> (Vec<Modulus>, BaseConverter, MemoryPool) {
		let coeff_base = CoefficientModulusFactory::build_degree(n as u64, bits).unwrap();
		let plain = Modulus::new(t).unwrap();
		let converter = BaseConverter::generate(&coeff_base, n, &plain, true).unwrap();
		(coeff_base, converter, MemoryPool::new())
	}

	fn to_rns(values: &[u64], base: &[Modulus], n: usize) -> Vec<u64> {
		let mut out = vec![0u64; base.len() * n];
		for (i, q) in base.iter().enumerate() {
			for (j, v) in values.iter().enumerate() {
				out[i * n + j] = v % q.value();
			}
		}
		out
	}

	#[test]
	fn base_conversion_roundtrip() {
		// A polynomial with small coefficients survives
		// fastbconv_mtilde -> mont_rq -> fastbconv_sk unchanged.
		let n = 16usize;
		let (coeff_base, converter, pool) = setup(n, &[36, 36], 1153);
		let values: Vec<u64> = (0..n as u64).map(|i| (i * 77773 + 5) % (1 << 20)).collect();
		let input = to_rns(&values, &coeff_base, n);

		let bsk = converter.bsk_base_count();
		let mut with_mtilde = vec![0u64; (bsk + 1) * n];
		converter.fastbconv_mtilde(&input, &mut with_mtilde, &pool);
		let mut in_bsk = vec![0u64; bsk * n];
		converter.mont_rq(&with_mtilde, &mut in_bsk);

		// The image in Bsk is x or x + q, with the same representative
		// under every Bsk prime.
		let q: u128 = coeff_base.iter().map(|m| m.value() as u128).product();
		for j in 0..n {
			let b0 = converter.bsk_base()[0];
			let shifted = in_bsk[j] != (values[j] % b0.value()) as u64;
			for (i, b) in converter.bsk_base().iter().enumerate() {
				let expected = if shifted {
					((values[j] as u128 + q) % b.value() as u128) as u64
				} else {
					values[j] % b.value()
				};
				assert_eq!(in_bsk[i * n + j], expected);
			}
		}

		// The sign-corrected conversion lands back on the exact residues.
		let mut back = vec![0u64; coeff_base.len() * n];
		converter.fastbconv_sk(&in_bsk, &mut back, &pool);
		assert_eq!(back, input);
	}

	#[test]
	fn fast_floor_divides_by_q() {
		// For x = value * q, floor(x / q) = value exactly; a nonzero
		// remainder may shift the result down by alpha in {0, .., k-1}.
		let n = 16usize;
		let (coeff_base, converter, pool) = setup(n, &[36, 36], 1153);
		let q: u128 = coeff_base.iter().map(|m| m.value() as u128).product();

		let values: Vec<u128> = (0..n as u128).map(|i| i * 1000 + 3).collect();
		let k = coeff_base.len();
		let bsk = converter.bsk_base_count();

		let fill = |remainders: &[u128]| {
			let mut input = vec![0u64; (k + bsk) * n];
			for (i, b) in coeff_base.iter().enumerate() {
				for j in 0..n {
					let x = values[j] * q + remainders[j];
					input[i * n + j] = (x % b.value() as u128) as u64;
				}
			}
			for (i, b) in converter.bsk_base().iter().enumerate() {
				for j in 0..n {
					let x = values[j] * q + remainders[j];
					input[(k + i) * n + j] = (x % b.value() as u128) as u64;
				}
			}
			input
		};

		let input = fill(&vec![0u128; n]);
		let mut floored = vec![0u64; bsk * n];
		converter.fast_floor(&input, &mut floored, &pool);
		for (i, b) in converter.bsk_base().iter().enumerate() {
			for j in 0..n {
				assert_eq!(floored[i * n + j] as u128, values[j] % b.value() as u128);
			}
		}

		let remainders: Vec<u128> = (0..n as u128).map(|i| (i * 999_983 + 17) % q).collect();
		let input = fill(&remainders);
		converter.fast_floor(&input, &mut floored, &pool);
		for j in 0..n {
			// alpha is the same for every target prime of a coefficient.
			let b0 = converter.bsk_base()[0];
			let alpha =
				b0.sub_mod((values[j] % b0.value() as u128) as u64, floored[j]);
			assert!(alpha < k as u64);
			for (i, b) in converter.bsk_base().iter().enumerate() {
				let expected = b.sub_mod((values[j] % b.value() as u128) as u64, alpha);
				assert_eq!(floored[i * n + j], expected);
			}
		}
	}

	#[test]
	fn plain_gamma_conversion_is_exact_up_to_q() {
		let n = 16usize;
		let (coeff_base, converter, pool) = setup(n, &[36, 36], 1153);
		let values: Vec<u64> = (0..n as u64).map(|i| i * 37 + 1).collect();
		let input = to_rns(&values, &coeff_base, n);

		let mut out = vec![0u64; 2 * n];
		converter.fastbconv_plain_gamma(&input, &mut out, &pool);

		// The conversion may overshoot by alpha * q with alpha < k, but the
		// same alpha shows up under t and under gamma; the decryption path
		// cancels it through the gamma correction.
		let q: u128 = coeff_base.iter().map(|m| m.value() as u128).product();
		let base = converter.plain_gamma_base();
		for j in 0..n {
			let matches = (0..coeff_base.len() as u128).any(|alpha| {
				base.iter().enumerate().all(|(i, b)| {
					out[i * n + j] as u128
						== (values[j] as u128 + alpha * q) % b.value() as u128
				})
			});
			assert!(matches, "no consistent overshoot for coefficient {}", j);
		}
	}

	#[test]
	fn round_last_modulus_halves_the_base() {
		let n = 16usize;
		let (coeff_base, converter, pool) = setup(n, &[36, 36, 36], 1153);
		let q_last = coeff_base[2].value();

		// Encode value * q_last + r; rounding division recovers value (+1
		// when r rounds up).
		let mut poly = vec![0u64; 3 * n];
		let values: Vec<u64> = (0..n as u64).map(|i| i + 1).collect();
		let remainders: Vec<u64> = (0..n as u64).map(|i| (i * 7) % 100).collect();
		for (i, b) in coeff_base.iter().enumerate() {
			for j in 0..n {
				let x = values[j] as u128 * q_last as u128 + remainders[j] as u128;
				poly[i * n + j] = (x % b.value() as u128) as u64;
			}
		}
		converter.round_last_coeff_modulus_inplace(&mut poly, &pool);
		for (i, b) in coeff_base[..2].iter().enumerate() {
			for j in 0..n {
				assert_eq!(poly[i * n + j], values[j] % b.value());
			}
		}
	}
}
