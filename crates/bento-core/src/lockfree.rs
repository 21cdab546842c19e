//! Lock-free primitives shared between the audio thread and control threads.

use core::sync::atomic::{AtomicBool, Ordering};

use atomic_float::{AtomicF32, AtomicF64};

macro_rules! atomic_cell {
    ($name:ident, $inner:ty, $value:ty, $default:expr) => {
        /// Cache-line aligned atomic cell.
        #[derive(Debug)]
        #[repr(align(64))]
        pub struct $name {
            value: $inner,
        }

        impl $name {
            pub fn new(value: $value) -> Self {
                Self {
                    value: <$inner>::new(value),
                }
            }

            #[inline]
            pub fn get(&self) -> $value {
                self.value.load(Ordering::Acquire)
            }

            #[inline]
            pub fn set(&self, value: $value) {
                self.value.store(value, Ordering::Release);
            }

            #[inline]
            pub fn swap(&self, value: $value) -> $value {
                self.value.swap(value, Ordering::AcqRel)
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self::new(self.get())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($default)
            }
        }
    };
}

atomic_cell!(AtomicFloat, AtomicF32, f32, 0.0);
atomic_cell!(AtomicDouble, AtomicF64, f64, 0.0);
atomic_cell!(AtomicFlag, AtomicBool, bool, false);

/// Counter for RT-side drop accounting. Incremented on the audio thread,
/// read and logged from the non-RT side.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct DropCounter {
    count: core::sync::atomic::AtomicU64,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_float_roundtrip() {
        let val = AtomicFloat::new(1.0);
        assert_eq!(val.get(), 1.0);
        val.set(2.5);
        assert_eq!(val.get(), 2.5);
        assert_eq!(val.swap(3.0), 2.5);
    }

    #[test]
    fn test_atomic_flag() {
        let flag = AtomicFlag::new(false);
        assert!(!flag.get());
        flag.set(true);
        assert!(flag.get());
    }

    #[test]
    fn test_drop_counter() {
        let counter = DropCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }
}
