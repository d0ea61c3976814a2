//! Byte multipliers, so buffer sizes read as `64 * KIB` instead of
//! `65536`.

use static_assertions::const_assert_eq;

pub const B: usize = 1;

pub const KIB: usize = 1024 * B;
pub const MIB: usize = 1024 * KIB;
pub const GIB: usize = 1024 * MIB;

pub const KB: usize = 1000 * B;
pub const MB: usize = 1000 * KB;
pub const GB: usize = 1000 * MB;

const_assert_eq!(MIB, 1 << 20);
const_assert_eq!(GIB, 1 << 30);
const_assert_eq!(GB, 1_000_000_000);
