//! Log sequence numbers, as they appear in layer file names.

use std::fmt;

/// A log sequence number, a position in the change history of a timeline.
#[derive(Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Parse an LSN from its fixed-width representation in layer file names:
    /// exactly 16 hex digits.
    pub fn from_hex(s: &str) -> Option<Lsn> {
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Lsn)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> u64 {
        lsn.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xffffffff)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_is_fixed_width() {
        assert_eq!(Lsn::from_hex("00000000014FED58"), Some(Lsn(0x014FED58)));
        assert_eq!(Lsn::from_hex("14FED58"), None);
        assert_eq!(Lsn::from_hex(""), None);
        assert_eq!(Lsn::from_hex("00000000014FED5X"), None);
    }
}
