//! Fixed-point transcendentals (`[ADD] §4.3bis`, grounded on
//! `include/opmath.hpp`/`fixpoint.c`).
//!
//! Values are Q(16.16)-style fixed-point numbers stored as `i32`, with the
//! fractional-bit count given by a runtime `precision` (the assembler's
//! `-Q`/fixed-point option, default 16, see [`crate::options::AssemblerOptions`]).
//! One full turn equals `1 << precision` - the same native angle unit the
//! original's `fix2angle`/`angle2fix` helpers use - so `sin`/`cos`/`tan` take a
//! fixed-point *angle in turns* and return a fixed-point *ratio*, while
//! `asin`/`acos`/`atan`/`atan2` take fixed-point *ratios* and return a
//! fixed-point *angle in turns*.

use std::f64::consts::TAU;

fn to_real(v: i32, precision: u8) -> f64 {
    v as f64 / (1u64 << precision) as f64
}

fn from_real(v: f64, precision: u8) -> i32 {
    (v * (1u64 << precision) as f64).round() as i32
}

fn turns_to_radians(turns: f64) -> f64 {
    turns * TAU
}

fn radians_to_turns(radians: f64) -> f64 {
    radians / TAU
}

pub fn fixed_sin(angle: i32, precision: u8) -> i32 {
    from_real(turns_to_radians(to_real(angle, precision)).sin(), precision)
}

pub fn fixed_cos(angle: i32, precision: u8) -> i32 {
    from_real(turns_to_radians(to_real(angle, precision)).cos(), precision)
}

pub fn fixed_tan(angle: i32, precision: u8) -> i32 {
    from_real(turns_to_radians(to_real(angle, precision)).tan(), precision)
}

pub fn fixed_asin(ratio: i32, precision: u8) -> i32 {
    from_real(radians_to_turns(to_real(ratio, precision).asin()), precision)
}

pub fn fixed_acos(ratio: i32, precision: u8) -> i32 {
    from_real(radians_to_turns(to_real(ratio, precision).acos()), precision)
}

pub fn fixed_atan(ratio: i32, precision: u8) -> i32 {
    from_real(radians_to_turns(to_real(ratio, precision).atan()), precision)
}

pub fn fixed_atan2(y: i32, x: i32, precision: u8) -> i32 {
    from_real(radians_to_turns(to_real(y, precision).atan2(to_real(x, precision))), precision)
}

pub fn fixed_pow(base: i32, exponent: i32, precision: u8) -> i32 {
    from_real(to_real(base, precision).powf(to_real(exponent, precision)), precision)
}

pub fn fixed_log2(value: i32, precision: u8) -> i32 {
    from_real(to_real(value, precision).log2(), precision)
}

pub fn fixed_round(value: i32, precision: u8) -> i32 {
    from_real(to_real(value, precision).round(), precision)
}

pub fn fixed_ceil(value: i32, precision: u8) -> i32 {
    from_real(to_real(value, precision).ceil(), precision)
}

pub fn fixed_floor(value: i32, precision: u8) -> i32 {
    from_real(to_real(value, precision).floor(), precision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turn_sine_is_one() {
        let quarter_turn = 1i32 << (16 - 2);
        let result = fixed_sin(quarter_turn, 16);
        assert!((result - (1 << 16)).abs() <= 1);
    }

    #[test]
    fn asin_of_one_is_quarter_turn() {
        let one = 1i32 << 16;
        let result = fixed_asin(one, 16);
        let quarter_turn = 1i32 << (16 - 2);
        assert!((result - quarter_turn).abs() <= 1);
    }

    #[test]
    fn floor_and_ceil_bracket_non_integer() {
        let value = from_real(2.75, 16);
        assert_eq!(fixed_floor(value, 16), from_real(2.0, 16));
        assert_eq!(fixed_ceil(value, 16), from_real(3.0, 16));
    }

    #[test]
    fn pow_matches_real_exponentiation() {
        let base = from_real(2.0, 16);
        let exp = from_real(10.0, 16);
        let result = fixed_pow(base, exp, 16);
        assert_eq!(result, from_real(1024.0, 16));
    }
}
