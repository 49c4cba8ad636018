//! Built-in function table for arithmetic expressions.
//!
//! Every function has a fixed arity. Arguments outside a function's domain
//! (logarithm of a non-positive number, zero width, ...) produce NaN rather
//! than an error; NaN then propagates through the rest of the expression.

use std::f64::consts::{E, PI};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e8;
/// Boltzmann constant, J/K.
pub const BOLTZMANN: f64 = 1.380_649e-23;
/// Avogadro constant, 1/mol.
pub const AVOGADRO: f64 = 6.022_140_76e23;

/// `(name, arity)` for every known function. Names are lowercase.
pub const FUNCTIONS: &[(&str, usize)] = &[
    ("power", 2),
    ("pow", 2),
    ("mod", 2),
    ("exp", 1),
    ("log", 1),
    ("ln", 1),
    ("sqrt", 1),
    ("abs", 1),
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("truncate", 1),
    ("floor", 1),
    ("ceiling", 1),
    ("round", 1),
    ("sign", 1),
    ("pi", 0),
    ("e", 0),
    ("c", 0),
    ("kb", 0),
    ("na", 0),
    ("sinc", 1),
    ("decay", 3),
    ("stretched", 4),
    ("gauss", 4),
    ("lorentz", 4),
    ("voigt", 5),
    ("foigt", 5),
];

/// Arity of a known function.
pub fn arity(name: &str) -> Option<usize> {
    FUNCTIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, arity)| *arity)
}

/// Apply a function to its arguments. Returns `None` for unknown names or a
/// wrong argument count.
pub fn apply(name: &str, args: &[f64]) -> Option<f64> {
    let value = match (name, args) {
        ("power" | "pow", [base, exponent]) => base.powf(*exponent),
        ("mod", [a, b]) => {
            if *b == 0.0 {
                f64::NAN
            } else {
                a % b
            }
        }
        ("exp", [x]) => x.exp(),
        ("log", [x]) => positive(*x, f64::log10),
        ("ln", [x]) => positive(*x, f64::ln),
        ("sqrt", [x]) => {
            if *x < 0.0 {
                f64::NAN
            } else {
                x.sqrt()
            }
        }
        ("abs", [x]) => x.abs(),
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("asin", [x]) => x.asin(),
        ("acos", [x]) => x.acos(),
        ("atan", [x]) => x.atan(),
        ("sinh", [x]) => x.sinh(),
        ("cosh", [x]) => x.cosh(),
        ("tanh", [x]) => x.tanh(),
        ("truncate", [x]) => x.trunc(),
        ("floor", [x]) => x.floor(),
        ("ceiling", [x]) => x.ceil(),
        ("round", [x]) => x.round_ties_even(),
        ("sign", [x]) => sign(*x),
        ("pi", []) => PI,
        ("e", []) => E,
        ("c", []) => SPEED_OF_LIGHT,
        ("kb", []) => BOLTZMANN,
        ("na", []) => AVOGADRO,
        ("sinc", [x]) => {
            if *x == 0.0 {
                f64::NAN
            } else {
                x.sin() / x
            }
        }
        ("decay", [x, amplitude, tau]) => decay(*x, *amplitude, *tau),
        ("stretched", [x, amplitude, b, c]) => stretched(*x, *amplitude, *b, *c),
        ("gauss", [x, amplitude, center, width]) => {
            amplitude * gauss_profile(*x, *center, *width)
        }
        ("lorentz", [x, amplitude, center, width]) => {
            amplitude * lorentz_profile(*x, *center, *width)
        }
        ("voigt" | "foigt", [x, amplitude, center, width, mix]) => {
            amplitude
                * (mix * gauss_profile(*x, *center, *width)
                    + (1.0 - mix) * lorentz_profile(*x, *center, *width))
        }
        _ => return None,
    };
    Some(value)
}

fn positive(x: f64, f: fn(f64) -> f64) -> f64 {
    if x <= 0.0 {
        f64::NAN
    } else {
        f(x)
    }
}

fn sign(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 {
        x
    } else {
        x.signum()
    }
}

fn decay(x: f64, amplitude: f64, tau: f64) -> f64 {
    if tau == 0.0 {
        return f64::NAN;
    }
    amplitude * (-x / tau).exp()
}

fn stretched(x: f64, amplitude: f64, b: f64, c: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    amplitude * (-x.powf(c) / b).exp()
}

/// Area-normalised Gaussian.
fn gauss_profile(x: f64, center: f64, width: f64) -> f64 {
    if width == 0.0 {
        return f64::NAN;
    }
    let z = (x - center) / width;
    (-z * z / 2.0).exp() / ((2.0 * PI).sqrt() * width)
}

/// Area-normalised Lorentzian.
fn lorentz_profile(x: f64, center: f64, width: f64) -> f64 {
    let dx = x - center;
    width / (PI * (dx * dx + width * width))
}
