//! Pairing fingerprint ("vibe check").
//!
//! Both peers derive three symbols from the pair of identifiers so users
//! can compare screens. Cosmetic only: it is neither secret nor collision
//! resistant.

use std::cmp::Ordering;
use std::fmt;

const PALETTE: [&str; 20] = [
    "👽", "💀", "👻", "🤖", "🤡", "💩", "👺", "👹", "👿", "🤠", "👾", "👀", "🧠", "👁", "👅", "🦴",
    "🦷", "👄", "💋", "🩸",
];

/// Three palette symbols, rendered space-separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([&'static str; 3]);

impl Fingerprint {
    /// Derives the fingerprint of a pair; argument order does not matter.
    pub fn of(a: &str, b: &str) -> Self {
        // Ordered by UTF-16 code units, then hashed over them.
        let (first, second) = match a.encode_utf16().cmp(b.encode_utf16()) {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };

        let mut hash: i32 = 0;
        for unit in first.encode_utf16().chain(second.encode_utf16()) {
            hash = hash
                .wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit));
        }

        Fingerprint([symbol(hash), symbol(hash >> 5), symbol(hash >> 10)])
    }

    pub fn symbols(&self) -> [&'static str; 3] {
        self.0
    }
}

fn symbol(hash: i32) -> &'static str {
    let index = (i64::from(hash).abs() % PALETTE.len() as i64) as usize;
    PALETTE[index]
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.0[0], self.0[1], self.0[2])
    }
}
