//! Negacyclic number-theoretic transform with lazy Harvey butterflies.
//!
//! Tables store the powers of a minimal primitive 2N-th root of unity in
//! bit-reversed order together with Shoup multipliers; the inverse tables are
//! reordered so the Gentleman-Sande loop walks them sequentially, and the
//! N^{-1} scaling is folded into the final inverse layer.

use crate::modulus::{Modulus, ShoupOperand};
use crate::util::uintarith::{is_prime, reverse_bits};

/// Precomputed tables for the negacyclic NTT of degree 2^coeff_count_power
/// modulo a prime q with q = 1 (mod 2N).
#[derive(Debug, Clone)]
pub struct NttTables {
	coeff_count_power: u32,
	coeff_count: usize,
	modulus: Modulus,
	root: u64,
	root_powers: Vec<ShoupOperand>,
	inv_root_powers: Vec<ShoupOperand>,
	inv_degree: ShoupOperand,
}

impl NttTables {
	/// Generates the tables, returning `None` when the modulus is not prime
	/// or does not admit a primitive 2N-th root of unity.
	pub fn new(coeff_count_power: u32, modulus: &Modulus) -> Option<Self> {
		let coeff_count = 1usize << coeff_count_power;
		let two_n = 2 * coeff_count as u64;

		let root = try_minimal_primitive_root(two_n, modulus)?;
		let inverse_root = modulus.try_invert_mod(root)?;
		let inv_degree = modulus.try_invert_mod(coeff_count as u64)?;

		// Powers of the root in bit-scrambled order.
		let root_powers = powers_of_root_bit_reversed(root, coeff_count_power, modulus);

		// Powers of the inverse root, reordered so the inverse transform
		// reads them sequentially.
		let scrambled = powers_of_root_bit_reversed(inverse_root, coeff_count_power, modulus);
		let mut inv_root_powers = vec![ShoupOperand::default(); coeff_count];
		let mut next = 1usize;
		let mut block = coeff_count / 2;
		while block > 0 {
			for j in block..block * 2 {
				inv_root_powers[next] = scrambled[j];
				next += 1;
			}
			block /= 2;
		}

		Some(Self {
			coeff_count_power,
			coeff_count,
			modulus: *modulus,
			root,
			root_powers,
			inv_root_powers,
			inv_degree: modulus.shoup(inv_degree),
		})
	}

	/// The transform degree N.
	pub fn coeff_count(&self) -> usize {
		self.coeff_count
	}

	/// log2 of the transform degree.
	pub fn coeff_count_power(&self) -> u32 {
		self.coeff_count_power
	}

	/// The prime the tables were generated for.
	pub fn modulus(&self) -> &Modulus {
		&self.modulus
	}

	/// The minimal primitive 2N-th root of unity.
	pub fn root(&self) -> u64 {
		self.root
	}
}

fn powers_of_root_bit_reversed(
	root: u64,
	coeff_count_power: u32,
	modulus: &Modulus,
) -> Vec<ShoupOperand> {
	let coeff_count = 1usize << coeff_count_power;
	let mut powers = vec![ShoupOperand::default(); coeff_count];
	let mut power = 1u64;
	powers[0] = modulus.shoup(1);
	for i in 1..coeff_count {
		power = modulus.multiply_mod(power, root);
		powers[reverse_bits(i as u64, coeff_count_power) as usize] = modulus.shoup(power);
	}
	powers
}

/// Finds the smallest primitive `two_n`-th root of unity modulo the given
/// prime; `None` when none exists.
fn try_minimal_primitive_root(two_n: u64, modulus: &Modulus) -> Option<u64> {
	let q = modulus.value();
	if q < 3 || !is_prime(q) || (q - 1) % two_n != 0 {
		return None;
	}
	let exponent = (q - 1) / two_n;
	let n = two_n / 2;

	// A candidate c gives a 2N-th root of unity c^((q-1)/2N); it is
	// primitive exactly when its N-th power is -1.
	let mut root = None;
	for candidate in 2..q.min(1024) {
		let c = modulus.exponentiate_mod(candidate, exponent);
		if modulus.exponentiate_mod(c, n) == q - 1 {
			root = Some(c);
			break;
		}
	}
	let root = root?;

	// The primitive roots are exactly the odd powers; take the minimum.
	let root_sq = modulus.multiply_mod(root, root);
	let mut current = root;
	let mut best = root;
	for _ in 0..n {
		current = modulus.multiply_mod(current, root_sq);
		if current < best {
			best = current;
		}
	}
	Some(best)
}

/// Forward negacyclic NTT; the output coefficients lie in `[0, 4q)`.
pub fn ntt_negacyclic_lazy(operand: &mut [u64], tables: &NttTables) {
	let n = tables.coeff_count;
	debug_assert_eq!(operand.len(), n);
	let modulus = &tables.modulus;
	let q = modulus.value();
	let two_q = q << 1;

	let mut t = n >> 1;
	let mut m = 1usize;
	while m < n {
		for i in 0..m {
			let w = tables.root_powers[m + i];
			let j1 = 2 * i * t;
			let (xs, ys) = operand[j1..j1 + 2 * t].split_at_mut(t);
			for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
				// x' <- x + w*y, y' <- x - w*y, inputs in [0, 4q).
				let mut u = *x;
				if u >= two_q {
					u -= two_q;
				}
				let v = modulus.multiply_shoup_lazy(*y, w);
				*x = u + v;
				*y = u + two_q - v;
			}
		}
		t >>= 1;
		m <<= 1;
	}
}

/// Forward negacyclic NTT with fully reduced output in `[0, q)`.
pub fn ntt_negacyclic(operand: &mut [u64], tables: &NttTables) {
	ntt_negacyclic_lazy(operand, tables);
	let q = tables.modulus.value();
	let two_q = q << 1;
	for c in operand.iter_mut() {
		if *c >= two_q {
			*c -= two_q;
		}
		if *c >= q {
			*c -= q;
		}
	}
}

/// Inverse negacyclic NTT; the output coefficients lie in `[0, 2q)`. The
/// N^{-1} scaling happens inside the last butterfly layer.
pub fn inverse_ntt_negacyclic_lazy(operand: &mut [u64], tables: &NttTables) {
	let n = tables.coeff_count;
	debug_assert_eq!(operand.len(), n);
	if n == 1 {
		// Degree-one transform only applies the scaling.
		operand[0] = tables
			.modulus
			.multiply_shoup(operand[0], tables.inv_degree);
		return;
	}
	let modulus = &tables.modulus;
	let q = modulus.value();
	let two_q = q << 1;

	let mut t = 1usize;
	let mut inv_root_index = 1usize;
	let mut m = n;
	while m > 2 {
		let h = m >> 1;
		let mut j1 = 0usize;
		for _ in 0..h {
			let w = tables.inv_root_powers[inv_root_index];
			inv_root_index += 1;
			let (us, vs) = operand[j1..j1 + 2 * t].split_at_mut(t);
			for (u, v) in us.iter_mut().zip(vs.iter_mut()) {
				let x = *u;
				let y = *v;
				let mut sum = x + y;
				if sum >= two_q {
					sum -= two_q;
				}
				*u = sum;
				*v = modulus.multiply_shoup_lazy(x + two_q - y, w);
			}
			j1 += 2 * t;
		}
		t <<= 1;
		m >>= 1;
	}

	// Merge n^{-1} into the last layer.
	let w = tables.inv_root_powers[inv_root_index];
	let inv_n = tables.inv_degree;
	let inv_n_w = modulus.shoup(modulus.multiply_shoup(w.operand, inv_n));
	let (us, vs) = operand.split_at_mut(n / 2);
	for (u, v) in us.iter_mut().zip(vs.iter_mut()) {
		let x = *u;
		let y = *v;
		let mut sum = x + y;
		if sum >= two_q {
			sum -= two_q;
		}
		*u = modulus.multiply_shoup_lazy(sum, inv_n);
		*v = modulus.multiply_shoup_lazy(x + two_q - y, inv_n_w);
	}
}

/// Inverse negacyclic NTT with fully reduced output in `[0, q)`.
pub fn inverse_ntt_negacyclic(operand: &mut [u64], tables: &NttTables) {
	inverse_ntt_negacyclic_lazy(operand, tables);
	let q = tables.modulus.value();
	for c in operand.iter_mut() {
		if *c >= q {
			*c -= q;
		}
	}
}
