//! Safe arithmetic helpers - no unwrap, no panics, no lossy casts

/// Basis-point denominator (10_000 bps = 100%)
pub const BPS_DENOM: u128 = 10_000;

/// Add u128 with saturation at MAX
pub fn add_u128(a: u128, b: u128) -> u128 {
    a.saturating_add(b)
}

/// Subtract u128 with saturation at 0
pub fn sub_u128(a: u128, b: u128) -> u128 {
    a.saturating_sub(b)
}

/// Multiply u128 with saturation
pub fn mul_u128(a: u128, b: u128) -> u128 {
    a.saturating_mul(b)
}

/// Divide u128 (returns 0 if divisor is 0)
pub fn div_u128(a: u128, b: u128) -> u128 {
    if b == 0 {
        0
    } else {
        a / b
    }
}

/// Minimum of two u128
pub fn min_u128(a: u128, b: u128) -> u128 {
    if a < b { a } else { b }
}

/// Apply a basis-point rate: `amount * bps / 10_000`, rounded down
pub fn mul_bps(amount: u128, bps: u32) -> u128 {
    div_u128(mul_u128(amount, bps as u128), BPS_DENOM)
}
