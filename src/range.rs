//! Interval arithmetic domain for the range analysis
//!
//! A `Range` is a contiguous interval of signed integers with the two
//! extremes of `i128` reserved as the -inf/+inf sentinels. All operators
//! soundly over-approximate their concrete counterparts at a fixed bit
//! width, with a non-wrapping interpretation: the sentinels act as true
//! infinities, never as the machine wrap boundary.

use std::{cmp, fmt, str::FromStr};

/// Sentinel lower bound, acts as -inf
pub const MIN: i128 = i128::MIN;
/// Sentinel upper bound, acts as +inf
pub const MAX: i128 = i128::MAX;

/// Interprets the low `width` bits of `value` as a signed integer
pub fn sign_extend(value: i128, width: u32) -> i128 {
    if width >= 128 {
        return value;
    }
    let shift = 128 - width;
    (value << shift) >> shift
}

/// Smallest signed value representable at `width` bits. Saturates to the
/// -inf sentinel at 128 bits, where the true minimum has no finite spelling.
pub fn min_signed(width: u32) -> i128 {
    if width >= 128 {
        return MIN;
    }
    -(1i128 << (width - 1))
}

/// Largest signed value representable at `width` bits. Saturates to the
/// +inf sentinel at 128 bits.
pub fn max_signed(width: u32) -> i128 {
    if width >= 128 {
        return MAX;
    }
    (1i128 << (width - 1)) - 1
}

/// Largest unsigned value representable at `width` bits. Saturates to the
/// +inf sentinel from 127 bits up, past which the value is not representable.
pub fn max_unsigned(width: u32) -> i128 {
    if width >= 127 {
        return MAX;
    }
    (1i128 << width) - 1
}

/// Lattice state of a `Range`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Not yet computed, absorbed by any join or meet
    Unknown,
    /// A proper interval with `lower <= upper`
    Regular,
    /// Unreachable state, absorbed by intersection
    Empty,
}

/// An interval of signed integers with -inf/+inf sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    kind: RangeKind,
    lower: i128,
    upper: i128,
}

impl Default for Range {
    fn default() -> Self {
        Self::unknown()
    }
}

impl Range {
    /// Constructs a regular interval, degrading to empty if the bounds are inverted
    pub fn new(lower: i128, upper: i128) -> Self {
        if lower > upper {
            return Self::empty();
        }
        Self {
            kind: RangeKind::Regular,
            lower,
            upper,
        }
    }

    /// The unconstrained interval `[-inf, +inf]`
    pub fn full() -> Self {
        Self::new(MIN, MAX)
    }

    /// The not-yet-computed state
    pub fn unknown() -> Self {
        Self {
            kind: RangeKind::Unknown,
            lower: MIN,
            upper: MAX,
        }
    }

    /// The unreachable state
    pub fn empty() -> Self {
        Self {
            kind: RangeKind::Empty,
            lower: MIN,
            upper: MAX,
        }
    }

    /// Point interval `[value, value]`
    pub fn constant(value: i128) -> Self {
        Self::new(value, value)
    }

    /// Lower bound
    pub fn lower(&self) -> i128 {
        self.lower
    }

    /// Upper bound
    pub fn upper(&self) -> i128 {
        self.upper
    }

    /// Lattice state
    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    /// True if the state was never computed
    pub fn is_unknown(&self) -> bool {
        self.kind == RangeKind::Unknown
    }

    /// True if this is a proper interval
    pub fn is_regular(&self) -> bool {
        self.kind == RangeKind::Regular
    }

    /// True if the interval is unreachable
    pub fn is_empty(&self) -> bool {
        self.kind == RangeKind::Empty
    }

    /// True if this is the unconstrained interval
    pub fn is_full_set(&self) -> bool {
        self.is_regular() && self.lower == MIN && self.upper == MAX
    }

    /// True if the interval holds exactly one value
    pub fn is_constant(&self) -> bool {
        self.is_regular() && self.lower == self.upper
    }

    /// True if `value` lies inside the interval
    pub fn contains(&self, value: i128) -> bool {
        self.is_regular() && self.lower <= value && value <= self.upper
    }

    /// True if `other` is contained in `self`
    pub fn contains_range(&self, other: &Range) -> bool {
        if other.is_empty() {
            return true;
        }
        self.is_regular()
            && other.is_regular()
            && self.lower <= other.lower
            && other.upper <= self.upper
    }

    fn binary_prelude(&self, other: &Range) -> Option<Range> {
        if self.is_unknown() || other.is_unknown() {
            return Some(Self::unknown());
        }
        if self.is_empty() || other.is_empty() {
            return Some(Self::empty());
        }
        None
    }

    /// Interval addition
    pub fn add(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        Range::new(
            bound_add(self.lower, other.lower),
            bound_add(self.upper, other.upper),
        )
    }

    /// Interval subtraction
    pub fn sub(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        Range::new(
            bound_sub(self.lower, other.upper),
            bound_sub(self.upper, other.lower),
        )
    }

    /// Interval multiplication, min/max over the four corner products
    pub fn mul(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        let corners = [
            bound_mul(self.lower, other.lower),
            bound_mul(self.lower, other.upper),
            bound_mul(self.upper, other.lower),
            bound_mul(self.upper, other.upper),
        ];
        Range::from_corners(&corners)
    }

    /// Unsigned interval division
    ///
    /// The zero endpoint of the divisor is substituted with one; a divisor
    /// straddling zero or the maximal range gives up all precision.
    pub fn udiv(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        if other.is_full_set() {
            return Range::full();
        }
        let (c, d) = match purge_zero_divisor(other.lower, other.upper) {
            Some(bounds) => bounds,
            None => return Range::full(),
        };
        // Unsigned semantics on negative bounds are not representable here
        if self.lower < 0 || c < 0 {
            return Range::full();
        }
        let corners = [
            bound_div(self.lower, c),
            bound_div(self.lower, d),
            bound_div(self.upper, c),
            bound_div(self.upper, d),
        ];
        Range::from_corners(&corners)
    }

    /// Signed interval division
    pub fn sdiv(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        if other.is_full_set() {
            return Range::full();
        }
        let (c, d) = match purge_zero_divisor(other.lower, other.upper) {
            Some(bounds) => bounds,
            None => return Range::full(),
        };
        let corners = [
            bound_div(self.lower, c),
            bound_div(self.lower, d),
            bound_div(self.upper, c),
            bound_div(self.upper, d),
        ];
        Range::from_corners(&corners)
    }

    /// Unsigned remainder, enclosing interval of the four corner results
    pub fn urem(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        let (c, d) = match purge_zero_divisor(other.lower, other.upper) {
            Some(bounds) => bounds,
            None => return Range::full(),
        };
        let corners = [
            bound_rem(self.lower, c),
            bound_rem(self.lower, d),
            bound_rem(self.upper, c),
            bound_rem(self.upper, d),
        ];
        Range::from_corners(&corners)
    }

    /// Signed remainder, enclosing interval of the four corner results
    pub fn srem(&self, other: &Range) -> Range {
        self.urem(other)
    }

    /// Interval left shift
    pub fn shl(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        let corners = [
            bound_shl(self.lower, other.lower),
            bound_shl(self.lower, other.upper),
            bound_shl(self.upper, other.lower),
            bound_shl(self.upper, other.upper),
        ];
        Range::from_corners(&corners)
    }

    /// Logical right shift; any negative bound forces `[0, +inf]`
    pub fn lshr(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        if self.lower < 0 || self.upper < 0 || other.lower < 0 || other.upper < 0 {
            return Range::new(0, MAX);
        }
        let corners = [
            bound_lshr(self.lower, other.lower),
            bound_lshr(self.lower, other.upper),
            bound_lshr(self.upper, other.lower),
            bound_lshr(self.upper, other.upper),
        ];
        Range::from_corners(&corners)
    }

    /// Arithmetic right shift
    pub fn ashr(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        let corners = [
            bound_ashr(self.lower, other.lower),
            bound_ashr(self.lower, other.upper),
            bound_ashr(self.upper, other.lower),
            bound_ashr(self.upper, other.upper),
        ];
        Range::from_corners(&corners)
    }

    /// Bitwise AND approximation: `[0, min(upper bounds)]`
    pub fn and(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        let umin = cmp::min(self.upper, other.upper);
        // An all-ones or negative minimum is the unsigned maximum in disguise
        if umin == -1 || umin < 0 || umin == MAX {
            return Range::full();
        }
        Range::new(0, umin)
    }

    /// Bitwise OR bounds via the Hacker's Delight minOR/maxOR algorithms,
    /// switching on the sign combination of the four bounds
    pub fn or(&self, other: &Range, width: u32) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        // The bit masks below need a width strictly inside u128.
        if width >= 128 {
            return Range::full();
        }
        let (a, b, c, d) = (self.lower, self.upper, other.lower, other.upper);
        let lo = min_signed(width);
        let hi = max_signed(width);
        if a < lo || b > hi || c < lo || d > hi {
            return Range::full();
        }
        let mask = (1u128 << width) - 1;
        let ua = (a as u128) & mask;
        let ub = (b as u128) & mask;
        let uc = (c as u128) & mask;
        let ud = (d as u128) & mask;
        // 4-bit code over the sign bits of a, b, c, d; 1 means non-negative.
        // Only nine combinations are reachable since a <= b and c <= d.
        let code = (((a >= 0) as u8) << 3)
            | (((b >= 0) as u8) << 2)
            | (((c >= 0) as u8) << 1)
            | ((d >= 0) as u8);
        let (rl, ru) = match code {
            0b0000 | 0b0011 | 0b1100 | 0b1111 => (
                min_or(ua, ub, uc, ud, width),
                max_or(ua, ub, uc, ud, width),
            ),
            0b0001 => (ua, mask),
            0b0100 => (uc, mask),
            // min(a, c): both negative, so the masked unsigned ordering agrees
            0b0101 => (cmp::min(ua, uc), max_or(0, ub, 0, ud, width)),
            0b0111 => (min_or(ua, mask, uc, ud, width), max_or(0, ub, uc, ud, width)),
            0b1101 => (min_or(ua, ub, uc, mask, width), max_or(ua, ub, 0, ud, width)),
            _ => {
                debug_assert!(false, "unreachable sign combination in or()");
                return Range::full();
            }
        };
        let lower = sign_extend(rl as i128, width);
        let upper = sign_extend(ru as i128, width);
        if lower > upper {
            return Range::full();
        }
        Range::new(lower, upper)
    }

    /// Bitwise XOR carries no precision and always yields `[-inf, +inf]`
    pub fn xor(&self, other: &Range) -> Range {
        if let Some(r) = self.binary_prelude(other) {
            return r;
        }
        Range::full()
    }

    fn fit_or_clamp(&self, lo: i128, hi: i128) -> Range {
        if self.is_unknown() {
            return Self::unknown();
        }
        if self.is_empty() {
            return Self::empty();
        }
        if self.lower >= lo && self.upper <= hi {
            *self
        } else {
            Range::new(lo, hi)
        }
    }

    /// Truncation to `width` bits: unchanged when it already fits, otherwise
    /// the full signed range of the target width. Never invents precision.
    pub fn truncate(&self, width: u32) -> Range {
        self.fit_or_clamp(min_signed(width), max_signed(width))
    }

    /// Sign extension / truncation to `width` bits
    pub fn sext_or_trunc(&self, width: u32) -> Range {
        self.fit_or_clamp(min_signed(width), max_signed(width))
    }

    /// Zero extension / truncation to `width` bits
    pub fn zext_or_trunc(&self, width: u32) -> Range {
        self.fit_or_clamp(0, max_unsigned(width))
    }

    /// Lattice meet. `Unknown` is absorbed, `Empty` is absorbing.
    pub fn intersect_with(&self, other: &Range) -> Range {
        if self.is_unknown() {
            return *other;
        }
        if other.is_unknown() {
            return *self;
        }
        if self.is_empty() || other.is_empty() {
            return Self::empty();
        }
        Range::new(
            cmp::max(self.lower, other.lower),
            cmp::min(self.upper, other.upper),
        )
    }

    /// Lattice join. `Unknown` and `Empty` are units.
    pub fn union_with(&self, other: &Range) -> Range {
        if self.is_unknown() || self.is_empty() {
            return *other;
        }
        if other.is_unknown() || other.is_empty() {
            return *self;
        }
        Range::new(
            cmp::min(self.lower, other.lower),
            cmp::max(self.upper, other.upper),
        )
    }

    fn from_corners(corners: &[i128; 4]) -> Range {
        let lower = *corners.iter().min().unwrap_or(&MIN);
        let upper = *corners.iter().max().unwrap_or(&MAX);
        Range::new(lower, upper)
    }
}

fn bound_add(a: i128, b: i128) -> i128 {
    if a == MIN || b == MIN {
        return MIN;
    }
    if a == MAX || b == MAX {
        return MAX;
    }
    a.checked_add(b)
        .unwrap_or(if a < 0 { MIN } else { MAX })
}

fn bound_sub(a: i128, b: i128) -> i128 {
    if a == MIN || b == MAX {
        return MIN;
    }
    if a == MAX || b == MIN {
        return MAX;
    }
    a.checked_sub(b)
        .unwrap_or(if a < 0 { MIN } else { MAX })
}

fn bound_mul(a: i128, b: i128) -> i128 {
    let infinite = a == MIN || a == MAX || b == MIN || b == MAX;
    if infinite {
        if a == 0 || b == 0 {
            return 0;
        }
        return if (a < 0) ^ (b < 0) { MIN } else { MAX };
    }
    a.checked_mul(b)
        .unwrap_or(if (a < 0) ^ (b < 0) { MIN } else { MAX })
}

// Callers guarantee b != 0
fn bound_div(a: i128, b: i128) -> i128 {
    if b == MIN || b == MAX {
        return 0;
    }
    if a == MIN || a == MAX {
        return if (a < 0) ^ (b < 0) { MIN } else { MAX };
    }
    a.wrapping_div(b)
}

fn bound_rem(a: i128, b: i128) -> i128 {
    if a == MIN {
        return MIN;
    }
    if a == MAX {
        return MAX;
    }
    if b == MIN || b == MAX {
        return a;
    }
    a.wrapping_rem(b)
}

fn bound_shl(a: i128, s: i128) -> i128 {
    if a == MIN || s < 0 {
        return MIN;
    }
    if a == MAX || s >= 127 {
        return if a < 0 { MIN } else { MAX };
    }
    let shifted = a.wrapping_shl(s as u32);
    if shifted.wrapping_shr(s as u32) != a {
        return if a < 0 { MIN } else { MAX };
    }
    shifted
}

// Callers guarantee non-negative operands
fn bound_lshr(a: i128, s: i128) -> i128 {
    if s == MAX {
        return 0;
    }
    if a == MAX {
        return MAX;
    }
    if s >= 127 {
        return 0;
    }
    a.wrapping_shr(s as u32)
}

fn bound_ashr(a: i128, s: i128) -> i128 {
    if s == MAX || s >= 127 {
        return if a < 0 { -1 } else { 0 };
    }
    if a == MIN || a == MAX {
        return a;
    }
    if s < 0 {
        return a;
    }
    a.wrapping_shr(s as u32)
}

// Substitutes one for a zero divisor endpoint; a divisor interval strictly
// containing zero cannot be purged and returns None.
fn purge_zero_divisor(c: i128, d: i128) -> Option<(i128, i128)> {
    let mut c = c;
    let mut d = d;
    if c == 0 && d == 0 {
        return None;
    }
    if c == 0 {
        c = 1;
    }
    if d == 0 {
        d = -1;
    }
    if c < 0 && d > 0 {
        return None;
    }
    if c > d {
        return None;
    }
    Some((c, d))
}

// Hacker's Delight minOR, unsigned, parametric in width
fn min_or(mut a: u128, b: u128, mut c: u128, d: u128, width: u32) -> u128 {
    let mut m: u128 = 1 << (width - 1);
    while m != 0 {
        if !a & c & m != 0 {
            let temp = (a | m) & m.wrapping_neg();
            if temp <= b {
                a = temp;
                break;
            }
        } else if a & !c & m != 0 {
            let temp = (c | m) & m.wrapping_neg();
            if temp <= d {
                c = temp;
                break;
            }
        }
        m >>= 1;
    }
    a | c
}

// Hacker's Delight maxOR, unsigned, parametric in width
fn max_or(a: u128, mut b: u128, c: u128, mut d: u128, width: u32) -> u128 {
    let mut m: u128 = 1 << (width - 1);
    while m != 0 {
        if b & d & m != 0 {
            let temp = (b - m) | (m - 1);
            if temp >= a {
                b = temp;
                break;
            }
            let temp = (d - m) | (m - 1);
            if temp >= c {
                d = temp;
                break;
            }
        }
        m >>= 1;
    }
    b | d
}

fn format_bound(f: &mut fmt::Formatter, bound: i128) -> fmt::Result {
    match bound {
        MIN => write!(f, "-inf"),
        MAX => write!(f, "+inf"),
        _ => write!(f, "{bound}"),
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            RangeKind::Unknown => write!(f, "unknown"),
            RangeKind::Empty => write!(f, "empty"),
            RangeKind::Regular => {
                write!(f, "[")?;
                format_bound(f, self.lower)?;
                write!(f, ", ")?;
                format_bound(f, self.upper)?;
                write!(f, "]")
            }
        }
    }
}

/// Error raised when a range literal does not match the seed grammar
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed range literal: {0}")]
pub struct RangeParseError(pub String);

fn parse_bound(token: &str) -> Result<i128, ()> {
    match token {
        "-inf" => Ok(MIN),
        "+inf" => Ok(MAX),
        _ => token.parse::<i128>().map_err(|_| ()),
    }
}

impl FromStr for Range {
    type Err = RangeParseError;

    /// Parses the seed grammar `[L, U]` with `-inf`/`+inf` literals
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || RangeParseError(s.to_string());
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(malformed)?;
        let mut parts = inner.splitn(2, ',');
        let lower = parse_bound(parts.next().ok_or_else(malformed)?.trim())
            .map_err(|_| malformed())?;
        let upper = parse_bound(parts.next().ok_or_else(malformed)?.trim())
            .map_err(|_| malformed())?;
        if lower > upper {
            return Err(malformed());
        }
        Ok(Range::new(lower, upper))
    }
}
