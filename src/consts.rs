//! VM parameters and tunable segment sizes.
//!
//! Stack 256, heap 768, tensor 256, and meta 256 words are the defaults
//! used when a caller doesn't override them. They're exposed as
//! constructor parameters on [`crate::state::SegmentSizes`] so embedders
//! can tune them per workload.

/// Total number of general-purpose registers in the register file.
pub const VM_REGISTER_COUNT: usize = 27;

/// Number of trits packed into the small limb (16 trytes).
pub const TRITS_PER_LIMB48: usize = 48;

/// Number of trits packed into the wide limb (18 trytes).
pub const TRITS_PER_LIMB54: usize = 54;

/// Number of trits per tryte.
pub const TRITS_PER_TRYTE: usize = 3;

/// Default stack segment size, in words.
pub const DEFAULT_STACK_SIZE: usize = 256;

/// Default heap segment size, in words.
pub const DEFAULT_HEAP_SIZE: usize = 768;

/// Default tensor segment size, in words.
pub const DEFAULT_TENSOR_SIZE: usize = 256;

/// Default meta segment size, in words.
pub const DEFAULT_META_SIZE: usize = 256;

/// Number of executed instructions between periodic GC summary emissions.
pub const GC_INTERVAL: u64 = 64;
