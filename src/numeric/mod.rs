//! Balanced-ternary numeric primitives (C1).
//!
//! `trit`/`limb` give the packed fixed-width representation used by the
//! register file and memory cells; `carry` and `mul` implement the
//! parallel-prefix addition and the three equivalent multiply strategies;
//! `convert` bridges balanced ternary to/from signed binary; `fraction`
//! and `float` are the thin side-table layers built on top.

pub mod carry;
pub mod convert;
pub mod float;
pub mod fraction;
pub mod limb;
pub mod mul;
pub mod trit;

pub use float::Float;
pub use fraction::Fraction;
pub use limb::{Limb, Limb48, Limb54};
pub use trit::{Trit, Tryte, TRYTE_MAX, TRYTE_MIN};
