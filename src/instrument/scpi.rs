//! Common SCPI helpers.
//!
//! Number formatting for command arguments and parsing of numeric query
//! responses, shared by every instrument command set.

use crate::error::{BenchError, BenchResult};

/// Format a value the way C's `%.<precision>e` does: one leading digit,
/// `precision` fractional digits, signed exponent of at least two digits.
///
/// `format_exponential(14e6, 6)` gives `"1.400000e+07"`.
pub fn format_exponential(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }

    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => raw,
    }
}

/// Format a SCPI numeric argument (`%e`).
pub fn scpi_number(value: f64) -> String {
    format_exponential(value, 6)
}

/// SCPI boolean keyword.
pub fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// Parse a floating-point response from a SCPI query.
///
/// Leading/trailing whitespace is ignored. Anything else that is not a number
/// is a fatal [`BenchError::Parse`].
pub fn parse_f64_response(command: &str, response: &str) -> BenchResult<f64> {
    response.trim().parse::<f64>().map_err(|_| BenchError::Parse {
        command: command.to_string(),
        response: response.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_c_exponential_format() {
        assert_eq!(scpi_number(14e6), "1.400000e+07");
        assert_eq!(scpi_number(6000.0), "6.000000e+03");
        assert_eq!(scpi_number(5e-4), "5.000000e-04");
        assert_eq!(scpi_number(0.0), "0.000000e+00");
        assert_eq!(scpi_number(-90.0), "-9.000000e+01");
        assert_eq!(format_exponential(100.0, 18), "1.000000000000000000e+02");
        assert_eq!(format_exponential(1e-120, 2), "1.00e-120");
    }

    #[test]
    fn parses_scpi_numbers() {
        let cases = [
            ("+1.23456E-01", 0.123456),
            (" 9.9E+37\n", 9.9e37),
            ("-90", -90.0),
        ];
        for (input, expected) in cases {
            let parsed = parse_f64_response(":MEAS:VRMS? CHAN1", input).unwrap();
            assert_eq!(parsed, expected, "input {:?}", input);
        }
    }

    #[test]
    fn non_numeric_response_is_parse_error() {
        let err = parse_f64_response(":MEAS:VRMS? CHAN1", "no signal").unwrap_err();
        assert!(matches!(err, BenchError::Parse { .. }));
    }
}
