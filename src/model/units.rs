//! Native-unit to MTConnect-unit conversion (spec.md §3, §4.1).
//!
//! Derives a linear `(factor, offset)` conversion from a data item's
//! `units`/`nativeUnits`/`nativeScale` triple. Ordering matters: the offset
//! is applied before the scale (`(value + offset) * factor`) — reversing the
//! order changes the numeric result for Fahrenheit.

/// A linear conversion applied to sample values on ingest (T9 `UnitConverter`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    factor: f64,
    offset: f64,
}

impl Default for UnitConversion {
    fn default() -> Self {
        Self {
            factor: 1.0,
            offset: 0.0,
        }
    }
}

impl UnitConversion {
    /// Builds an identity conversion.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Builds a conversion from an explicit factor/offset pair, as set by a
    /// `* calibration:` protocol command (T5).
    pub fn new(factor: f64, offset: f64) -> Self {
        Self { factor, offset }
    }

    /// Converts a scalar value.
    pub fn convert(&self, value: f64) -> f64 {
        (value + self.offset) * self.factor
    }

    /// Converts each element of a vector value (3D samples) in place.
    pub fn convert_vector(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            *v = self.convert(*v);
        }
    }

    /// The scaling factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// The additive offset, applied before scaling.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Multiplies the existing factor by an additional scale, used when a
    /// `KILO`-prefixed native unit stacks with an already-derived conversion.
    pub fn scale(&mut self, extra: f64) {
        self.factor *= extra;
    }

    /// Derives a conversion from a `units`/`nativeUnits` pair, per spec.md
    /// §3: Fahrenheit-to-Celsius carries offset −32 (applied before scaling);
    /// a `KILO`-prefixed native unit multiplies the factor by 1000; anything
    /// else with matching base units (ignoring a `KILO` prefix) is treated
    /// as identity once the prefix scale is accounted for.
    ///
    /// Returns `None` when `native_units` is absent or equal to `units`,
    /// meaning no conversion is required.
    pub fn derive(units: Option<&str>, native_units: Option<&str>, native_scale: Option<f64>) -> Option<Self> {
        let native = native_units?;
        let target = units.unwrap_or(native);
        if native == target && native_scale.is_none() {
            return None;
        }

        // Compound native units (`MILLIMETER/SECOND`, `REVOLUTION/MINUTE`)
        // are parsed symbolically: numerator and denominator convert
        // independently and combine as num/denom (spec.md §3).
        if native.contains('/') || target.contains('/') {
            return Some(Self::derive_compound(native, target, native_scale));
        }

        let mut conv = Self::identity();

        let (native_base, native_kilo) = strip_kilo(native);
        let (target_base, _target_kilo) = strip_kilo(target);

        if native_kilo {
            conv.scale(1000.0);
        }

        if native_base == "FAHRENHEIT" && target_base == "CELSIUS" {
            conv.offset = -32.0;
            conv.scale(5.0 / 9.0);
        } else if native_base == "CELSIUS" && target_base == "FAHRENHEIT" {
            conv.scale(9.0 / 5.0);
            // Offset is applied before scaling: express the usual +32
            // post-scale constant as an equivalent pre-scale offset.
            conv.offset = 32.0 * (5.0 / 9.0);
        } else {
            conv.scale(linear_factor(native_base, target_base));
        }

        if let Some(scale) = native_scale {
            conv.scale(scale);
        }

        Some(conv)
    }

    /// Derives a conversion for a compound (ratio) unit such as
    /// `MILLIMETER/SECOND` or an exponentiated unit such as `MILLIMETER^3`.
    /// Numerator and denominator terms convert independently; exponent
    /// suffixes raise the per-term factor to that power.
    fn derive_compound(native: &str, target: &str, native_scale: Option<f64>) -> Self {
        let (native_num, native_den) = split_ratio(native);
        let (target_num, target_den) = split_ratio(target);

        let num_factor = term_factor(native_num, target_num);
        let den_factor = match (native_den, target_den) {
            (Some(n), Some(t)) => term_factor(n, t),
            _ => 1.0,
        };

        let mut conv = Self::identity();
        conv.scale(num_factor / den_factor);
        if let Some(scale) = native_scale {
            conv.scale(scale);
        }
        conv
    }

    /// True when `units` marks a three-space vector (contains `3D`).
    pub fn is_vector_units(units: Option<&str>) -> bool {
        units.map(|u| u.contains("3D")).unwrap_or(false)
    }
}

fn strip_kilo(unit: &str) -> (&str, bool) {
    if let Some(rest) = unit.strip_prefix("KILO") {
        (rest, true)
    } else {
        (unit, false)
    }
}

/// Splits a unit term on `/`, e.g. `MILLIMETER/SECOND` → (`MILLIMETER`,
/// `Some("SECOND")`); a non-ratio unit has no denominator.
fn split_ratio(unit: &str) -> (&str, Option<&str>) {
    match unit.split_once('/') {
        Some((num, den)) => (num, Some(den)),
        None => (unit, None),
    }
}

/// Splits an exponent suffix, e.g. `MILLIMETER^3` → (`MILLIMETER`, 3).
fn split_exponent(unit: &str) -> (&str, i32) {
    match unit.split_once('^') {
        Some((base, exp)) => (base, exp.parse().unwrap_or(1)),
        None => (unit, 1),
    }
}

/// The scalar factor to go from one base unit to another, ignoring offset
/// (only linear distance/speed-like units compound; temperature never does).
fn linear_factor(native_base: &str, target_base: &str) -> f64 {
    match (native_base, target_base) {
        ("INCH", "MILLIMETER") => 25.4,
        ("MILLIMETER", "INCH") => 1.0 / 25.4,
        ("FOOT", "MILLIMETER") => 304.8,
        ("MILLIMETER", "FOOT") => 1.0 / 304.8,
        ("MINUTE", "SECOND") => 60.0,
        ("SECOND", "MINUTE") => 1.0 / 60.0,
        ("HOUR", "SECOND") => 3600.0,
        ("SECOND", "HOUR") => 1.0 / 3600.0,
        _ => 1.0,
    }
}

/// Converts a single ratio term (numerator or denominator), honoring a
/// `KILO` prefix and a `^N` exponent on either side.
fn term_factor(native_term: &str, target_term: &str) -> f64 {
    let (native_exp_base, exp) = split_exponent(native_term);
    let (target_exp_base, _) = split_exponent(target_term);
    let (native_base, native_kilo) = strip_kilo(native_exp_base);
    let (target_base, _target_kilo) = strip_kilo(target_exp_base);

    let mut factor = if native_kilo { 1000.0 } else { 1.0 };
    factor *= linear_factor(native_base, target_base);
    factor.powi(exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fahrenheit_to_celsius_applies_offset_before_scale() {
        let conv = UnitConversion::derive(Some("CELSIUS"), Some("FAHRENHEIT"), None).unwrap();
        // 32F == 0C
        assert!((conv.convert(32.0) - 0.0).abs() < 1e-9);
        // 212F == 100C
        assert!((conv.convert(212.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn kilo_prefix_scales_by_a_thousand() {
        let conv = UnitConversion::derive(Some("WATT"), Some("KILOWATT"), None).unwrap();
        assert!((conv.convert(1.0) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn no_native_units_means_no_conversion() {
        assert!(UnitConversion::derive(Some("MILLIMETER"), None, None).is_none());
    }

    #[test]
    fn identical_units_means_no_conversion() {
        assert!(UnitConversion::derive(Some("COUNT"), Some("COUNT"), None).is_none());
    }

    #[test]
    fn vector_units_are_detected() {
        assert!(UnitConversion::is_vector_units(Some("MILLIMETER_3D")));
        assert!(!UnitConversion::is_vector_units(Some("MILLIMETER")));
    }

    #[test]
    fn compound_ratio_units_convert_numerator_and_denominator_independently() {
        // 1 inch/second -> 25.4 mm/second (denominator matches, no-op).
        let conv = UnitConversion::derive(Some("MILLIMETER/SECOND"), Some("INCH/SECOND"), None).unwrap();
        assert!((conv.convert(1.0) - 25.4).abs() < 1e-9);
    }

    #[test]
    fn compound_ratio_units_convert_denominator_too() {
        // 1 inch/minute -> 25.4 mm / 60s = 25.4/60 mm/second.
        let conv = UnitConversion::derive(Some("MILLIMETER/SECOND"), Some("INCH/MINUTE"), None).unwrap();
        assert!((conv.convert(1.0) - 25.4 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn exponent_suffix_raises_the_factor_to_that_power() {
        // 1 in^3 -> 25.4^3 mm^3.
        let conv = UnitConversion::derive(Some("MILLIMETER^3"), Some("INCH^3"), None).unwrap();
        assert!((conv.convert(1.0) - 25.4f64.powi(3)).abs() < 1e-6);
    }
}
