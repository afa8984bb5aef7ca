//! Control alphabet of the entity and content streams.
//!
//! Path codes are UTF-8 encodings of code points >= 32, so the single-byte
//! values below never collide with them. The printable range 7..=13 is left
//! free for ASCII text and must not be repurposed.

/// FM-index terminator, smallest byte in the alphabet.
pub const SENTINEL: u8 = 0;
/// Start of heading / field separator; together with [`EOO`] it terminates a
/// document.
pub const SOH: u8 = 1;
/// Long-text fragment delimiter.
pub const FRAG: u8 = 2;
/// Start of array.
pub const SOA: u8 = 3;
/// End of array.
pub const EOA: u8 = 4;
/// Array element divider.
pub const AED: u8 = 5;
/// End of object.
pub const EOO: u8 = 6;

/// UTF-8 string value marker.
pub const TEXT: u8 = 14;
/// Reserved.
pub const FLT32: u8 = 15;
/// 64-bit float value marker.
pub const FLT64: u8 = 16;
/// Reserved.
pub const INT8: u8 = 17;
/// Reserved.
pub const INT16: u8 = 18;
/// Reserved.
pub const INT32: u8 = 19;
/// 64-bit integer value marker.
pub const INT64: u8 = 20;
/// Boolean value marker.
pub const BOOL: u8 = 21;
/// Null value marker.
pub const NULL: u8 = 22;
/// Raw JSON sub-tree marker.
pub const JSON: u8 = 23;

/// Every value-type marker, in alphabet order.
pub const VALUES: [u8; 10] = [TEXT, FLT32, FLT64, INT8, INT16, INT32, INT64, BOOL, NULL, JSON];

/// A byte is a control character iff it is a structural marker or a
/// value-type marker.
#[inline]
pub fn is_control_character(c: u8) -> bool {
    c <= EOO || (TEXT..=JSON).contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_range_is_control() {
        for c in 0..=EOO {
            assert!(is_control_character(c), "byte {c} should be control");
        }
    }

    #[test]
    fn printable_gap_is_not_control() {
        for c in 7..=13u8 {
            assert!(!is_control_character(c), "byte {c} should be free");
        }
    }

    #[test]
    fn value_markers_are_control() {
        for c in VALUES {
            assert!(is_control_character(c));
        }
        assert!(!is_control_character(24));
        assert!(!is_control_character(b' '));
    }
}
