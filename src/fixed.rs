// 2.0: deterministic 18-fractional-digit fixed point. all funding and share math
// quantizes through here so results never depend on intermediate scale.
// floor rounding (toward negative infinity) everywhere by default.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits carried by every quantized amount.
pub const DECIMALS: u32 = 18;

/// Smallest representable amount, 1e-18.
pub fn unit() -> Decimal {
    Decimal::new(1, DECIMALS)
}

/// Quantize to 18 fractional digits, rounding toward negative infinity.
pub fn floor(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMALS, RoundingStrategy::ToNegativeInfinity)
}

/// Multiply and quantize down.
pub fn mul(a: Decimal, b: Decimal) -> Decimal {
    floor(a * b)
}

/// Divide and quantize down. Callers guarantee a non-zero divisor.
pub fn div(a: Decimal, b: Decimal) -> Decimal {
    debug_assert!(!b.is_zero());
    floor(a / b)
}

/// Shift a signed funding transfer one unit in the stable side's favor.
///
/// Positive transfers (longs pay) grow by one unit, negative transfers (longs
/// receive) shrink in magnitude by one unit. Applied once per funding accrual
/// so the ledger never under-distributes funding owed to the stable side. The
/// resulting dust is an accepted rounding loss.
pub fn bias_toward_stable(transfer: Decimal) -> Decimal {
    if transfer.is_zero() {
        transfer
    } else {
        transfer + unit()
    }
}
