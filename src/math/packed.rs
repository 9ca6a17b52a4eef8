//! Packed voxel coordinates
//!
//! Each signed axis is biased into 21 bits so a whole coordinate fits one
//! `u64` hash key.

use glam::IVec3;

/// Bits per axis in a packed key
pub const AXIS_BITS: u32 = 21;

/// Largest absolute coordinate component that can be packed
pub const COORD_LIMIT: i32 = (1 << (AXIS_BITS - 1)) - 1;

const BIAS: i32 = 1 << (AXIS_BITS - 1);
const MASK: u64 = (1 << AXIS_BITS) - 1;

/// Whether every component fits in a packed key
pub fn in_range(pos: IVec3) -> bool {
    let limit = COORD_LIMIT as u32;
    pos.x.unsigned_abs() <= limit && pos.y.unsigned_abs() <= limit && pos.z.unsigned_abs() <= limit
}

/// Pack a coordinate. Callers check [`in_range`] first; out-of-range
/// components wrap.
pub fn pack_coord(pos: IVec3) -> u64 {
    let x = (pos.x.wrapping_add(BIAS)) as u64 & MASK;
    let y = (pos.y.wrapping_add(BIAS)) as u64 & MASK;
    let z = (pos.z.wrapping_add(BIAS)) as u64 & MASK;
    x | (y << AXIS_BITS) | (z << (2 * AXIS_BITS))
}

/// Inverse of [`pack_coord`]
pub fn unpack_coord(key: u64) -> IVec3 {
    let x = (key & MASK) as i32 - BIAS;
    let y = ((key >> AXIS_BITS) & MASK) as i32 - BIAS;
    let z = ((key >> (2 * AXIS_BITS)) & MASK) as i32 - BIAS;
    IVec3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_signed() {
        for x in [-COORD_LIMIT, -1000, -1, 0, 1, 64, COORD_LIMIT] {
            for y in [-64, 0, 320] {
                for z in [-7, 0, 99_999] {
                    let pos = IVec3::new(x, y, z);
                    assert_eq!(unpack_coord(pack_coord(pos)), pos, "Failed for {:?}", pos);
                }
            }
        }
    }

    #[test]
    fn test_distinct_keys() {
        let a = pack_coord(IVec3::new(1, 0, 0));
        let b = pack_coord(IVec3::new(0, 1, 0));
        let c = pack_coord(IVec3::new(0, 0, 1));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_in_range() {
        assert!(in_range(IVec3::splat(COORD_LIMIT)));
        assert!(!in_range(IVec3::new(COORD_LIMIT + 1, 0, 0)));
        assert!(!in_range(IVec3::new(0, i32::MIN, 0)));
    }
}
