// src/utils/precision.rs
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Default quantity decimals when no per-symbol precision is known.
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 6;

/// Rounds an amount DOWN to the nearest multiple of `step_size`.
/// amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    ((amount / step_size).floor() * step_size).normalize()
}

/// Rounds a price to the NEAREST multiple of `tick_size`.
/// price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    ((price / tick_size).round() * tick_size).normalize()
}

/// `0.001` for 3 decimals.
pub fn step_for_decimals(decimals: u32) -> Decimal {
    Decimal::new(1, decimals.min(28))
}

/// Half-away-from-zero rounding to a fixed number of decimals.
/// 0.123456789 at 6 decimals -> 0.123457
pub fn round_quantity(amount: Decimal, decimals: u32) -> Decimal {
    amount
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Number of decimals implied by an exchange step string like `"0.00100000"`.
pub fn decimals_from_step(step: &str) -> Option<u32> {
    let step = Decimal::from_str(step.trim()).ok()?;
    if step <= Decimal::ZERO {
        return None;
    }
    Some(step.normalize().scale())
}

/// Fixed-point rendering of a price with precision that follows its magnitude,
/// so sub-cent assets keep their significant digits.
pub fn format_price(price: f64) -> String {
    let magnitude = price.abs();
    let decimals = if magnitude == 0.0 {
        2
    } else if magnitude < 0.0001 {
        8
    } else if magnitude < 0.01 {
        6
    } else if magnitude < 100.0 {
        4
    } else {
        2
    };
    format!("{:.*}", decimals, price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantity_floors_to_step() {
        assert_eq!(normalize_quantity(dec!(10.999), dec!(1)), dec!(10));
        assert_eq!(normalize_quantity(dec!(0.12345), dec!(0.001)), dec!(0.123));
        assert_eq!(normalize_quantity(dec!(5), Decimal::ZERO), dec!(5));
    }

    #[test]
    fn price_rounds_to_tick() {
        assert_eq!(normalize_price(dec!(100.16), dec!(0.1)), dec!(100.2));
        assert_eq!(normalize_price(dec!(100.14), dec!(0.1)), dec!(100.1));
    }

    #[test]
    fn round_quantity_uses_half_away_from_zero() {
        assert_eq!(round_quantity(dec!(0.123456789), 6), dec!(0.123457));
        assert_eq!(round_quantity(dec!(0.0000005), 6), dec!(0.000001));
        assert_eq!(round_quantity(dec!(1.5), 0), dec!(2));
    }

    #[test]
    fn decimals_from_exchange_step_strings() {
        assert_eq!(decimals_from_step("0.00100000"), Some(3));
        assert_eq!(decimals_from_step("1"), Some(0));
        assert_eq!(decimals_from_step("0"), None);
        assert_eq!(decimals_from_step("abc"), None);
        assert_eq!(step_for_decimals(3), dec!(0.001));
    }

    #[test]
    fn price_format_tracks_magnitude() {
        assert_eq!(format_price(98765.4321), "98765.43");
        assert_eq!(format_price(12.345678), "12.3457");
        assert_eq!(format_price(0.005), "0.005000");
        assert_eq!(format_price(0.00001234), "0.00001234");
    }
}
