use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock};

/// Thread-safe recycling pool for the scratch buffers the hot paths allocate.
///
/// Every operation either receives a pool handle or borrows the process-wide
/// default. Buffers handed out are zeroed; dropping a [`PoolBuffer`] returns
/// its storage to the pool for reuse.
#[derive(Debug, Clone)]
pub struct MemoryPool {
	free: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl MemoryPool {
	/// Creates an empty pool.
	pub fn new() -> Self {
		Self {
			free: Arc::new(Mutex::new(Vec::new())),
		}
	}

	/// Returns the process-wide default pool.
	pub fn global() -> &'static MemoryPool {
		static GLOBAL: OnceLock<MemoryPool> = OnceLock::new();
		GLOBAL.get_or_init(MemoryPool::new)
	}

	/// Acquires a zeroed buffer of `len` words from the pool.
	pub fn allocate(&self, len: usize) -> PoolBuffer {
		let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
		let mut data = free
			.iter()
			.position(|b| b.capacity() >= len)
			.map(|i| free.swap_remove(i))
			.unwrap_or_default();
		drop(free);
		data.clear();
		data.resize(len, 0);
		PoolBuffer {
			data,
			pool: self.clone(),
		}
	}

	fn release(&self, data: Vec<u64>) {
		let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
		// Bound the number of retained buffers so a burst of large scratch
		// allocations does not pin memory forever.
		if free.len() < 64 {
			free.push(data);
		}
	}
}

impl Default for MemoryPool {
	fn default() -> Self {
		Self::new()
	}
}

/// A scratch buffer borrowed from a [`MemoryPool`]; storage returns to the
/// pool on drop.
#[derive(Debug)]
pub struct PoolBuffer {
	data: Vec<u64>,
	pool: MemoryPool,
}

impl Deref for PoolBuffer {
	type Target = [u64];

	fn deref(&self) -> &[u64] {
		&self.data
	}
}

impl DerefMut for PoolBuffer {
	fn deref_mut(&mut self) -> &mut [u64] {
		&mut self.data
	}
}

impl Drop for PoolBuffer {
	fn drop(&mut self) {
		let data = std::mem::take(&mut self.data);
		self.pool.release(data);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn can_create_and_destroy_memory_pool() {
		let memory_pool = MemoryPool::new();

		std::mem::drop(memory_pool);
	}

	#[test]
	fn buffers_are_zeroed_and_recycled() {
		let pool = MemoryPool::new();
		{
			let mut buffer = pool.allocate(128);
			buffer[0] = 42;
			buffer[127] = 7;
		}
		let buffer = pool.allocate(64);
		assert_eq!(buffer.len(), 64);
		assert!(buffer.iter().all(|c| *c == 0));
		// The recycled backing store is at least as large as before.
		assert!(buffer.data.capacity() >= 64);
	}
}
