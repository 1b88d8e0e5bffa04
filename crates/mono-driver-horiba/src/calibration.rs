//! Wavelength calibration and position persistence for the HR640.
//!
//! The HR640 controller has no energy-independent memory: the absolute
//! grating position lives in a two-line text file that is rewritten after
//! every move, and the mapping from raw grating position to true wavelength
//! is a per-instrument cubic polynomial read from a fixed-layout calibration
//! file. Losing the position file resets the absolute reference to an
//! undefined state; the file is the instrument's only persistent memory.
//!
//! Units: the polynomial operates in angstrom (`x = position_nm * 10`), the
//! rest of the stack speaks nanometers.

use anyhow::{Context, Result};
use mono_core::error::MonoError;
use std::fs;
use std::path::{Path, PathBuf};

/// Number of coefficients in the cubic calibration polynomial.
const COEFFICIENT_COUNT: usize = 4;
/// First line (0-based) of the coefficient block in the calibration file.
const COEFFICIENT_LINE_OFFSET: usize = 4;
/// Lines the coefficient block spans.
const COEFFICIENT_LINE_COUNT: usize = 4;

/// Newton iteration seed for the inverse, in angstrom.
const NEWTON_SEED: f64 = 5000.0;
/// Iteration cap for the inverse; exceeding it is a convergence error.
const NEWTON_MAX_ITERATIONS: u32 = 64;
/// Convergence tolerance on the residual, in angstrom.
const NEWTON_TOLERANCE: f64 = 1e-6;

/// Header line of the persisted position file.
pub const POSITION_FILE_HEADER: &str = "Absolute position for HR640 monochromator:";

// =============================================================================
// CalibrationCurve
// =============================================================================

/// Cubic calibration polynomial `f(x) = c0 + c1*x + c2*x^2 + c3*x^3` mapping
/// raw grating position to true wavelength, both in angstrom.
///
/// Loaded once at driver activation and immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationCurve {
    coeffs: [f64; 4],
}

impl CalibrationCurve {
    /// Build a curve from its four coefficients `[c0, c1, c2, c3]`.
    pub fn new(coeffs: [f64; 4]) -> Self {
        Self { coeffs }
    }

    /// The identity mapping in angstrom (`f(x) = x`). Useful for bench
    /// setups without a fitted calibration.
    pub fn identity() -> Self {
        Self::new([0.0, 1.0, 0.0, 0.0])
    }

    /// Load a curve from a fixed-layout calibration file.
    ///
    /// The coefficient block occupies lines 5-8; tokens are
    /// whitespace-delimited and the first four parseable floats are taken in
    /// order. Fewer than four numeric tokens is a
    /// [`MonoError::CalibrationParse`] and must abort driver activation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read calibration file {}", path.display()))?;

        let mut coeffs = [0.0; 4];
        let mut found = 0usize;
        for line in text
            .lines()
            .skip(COEFFICIENT_LINE_OFFSET)
            .take(COEFFICIENT_LINE_COUNT)
        {
            for token in line.split_whitespace() {
                if found == COEFFICIENT_COUNT {
                    break;
                }
                if let Ok(value) = token.parse::<f64>() {
                    coeffs[found] = value;
                    found += 1;
                }
            }
        }

        if found < COEFFICIENT_COUNT {
            return Err(MonoError::CalibrationParse(format!(
                "expected {} coefficients in {}, found {}",
                COEFFICIENT_COUNT,
                path.display(),
                found
            ))
            .into());
        }

        Ok(Self::new(coeffs))
    }

    /// The coefficients `[c0, c1, c2, c3]`.
    pub fn coefficients(&self) -> [f64; 4] {
        self.coeffs
    }

    /// Evaluate the polynomial at `x` (angstrom).
    fn eval(&self, x: f64) -> f64 {
        let [c0, c1, c2, c3] = self.coeffs;
        c0 + c1 * x + c2 * x * x + c3 * x * x * x
    }

    /// Derivative `f'(x)` (angstrom).
    fn slope(&self, x: f64) -> f64 {
        let [_, c1, c2, c3] = self.coeffs;
        c1 + 2.0 * c2 * x + 3.0 * c3 * x * x
    }

    /// Forward calibration: true wavelength (nm) at a raw grating position
    /// (nm).
    pub fn position_to_wavelength_nm(&self, position_nm: f64) -> f64 {
        self.eval(position_nm * 10.0) / 10.0
    }

    /// Inverse calibration: the raw grating position (nm) whose calibrated
    /// wavelength equals `wavelength_nm`.
    ///
    /// Newton iteration seeded at x = 5000 angstrom. Exactly one physically
    /// meaningful root is expected in the operating range; iteration is
    /// capped, and a zero or non-finite derivative ends it early, so an
    /// out-of-range target surfaces [`MonoError::CalibrationConvergence`]
    /// instead of looping or feeding the drive a NaN.
    pub fn wavelength_to_position_nm(&self, wavelength_nm: f64) -> Result<f64, MonoError> {
        let target_a = wavelength_nm * 10.0;
        let mut x = NEWTON_SEED;

        for _ in 0..NEWTON_MAX_ITERATIONS {
            let residual = self.eval(x) - target_a;
            if residual.abs() < NEWTON_TOLERANCE {
                return Ok(x / 10.0);
            }
            let slope = self.slope(x);
            if slope == 0.0 || !slope.is_finite() {
                break;
            }
            x -= residual / slope;
            if !x.is_finite() {
                break;
            }
        }

        Err(MonoError::CalibrationConvergence {
            target_nm: wavelength_nm,
            iterations: NEWTON_MAX_ITERATIONS,
        })
    }
}

// =============================================================================
// PositionFile
// =============================================================================

/// The persisted absolute position of the HR640 grating.
///
/// Two-line text file: a fixed human-readable header, then the position in
/// angstrom (nm × 10) at 3-decimal precision. Read once at activation,
/// rewritten after every successful move that changes position. Concurrent
/// writers across processes are not guarded.
#[derive(Debug, Clone)]
pub struct PositionFile {
    path: PathBuf,
}

impl PositionFile {
    /// Handle for the position file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted absolute position, in nm.
    pub fn load_nm(&self) -> Result<f64> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read position file {}", self.path.display()))?;

        let line = text.lines().nth(1).ok_or_else(|| {
            MonoError::CalibrationParse(format!(
                "position file {} is missing its value line",
                self.path.display()
            ))
        })?;

        let angstrom: f64 = line.trim().parse().map_err(|_| {
            MonoError::CalibrationParse(format!(
                "position file {} holds a non-numeric value {:?}",
                self.path.display(),
                line.trim()
            ))
        })?;

        Ok(angstrom / 10.0)
    }

    /// Overwrite the file with the given absolute position, in nm.
    ///
    /// Stored in angstrom, rounded to 3 decimals.
    pub fn save_nm(&self, position_nm: f64) -> Result<()> {
        let angstrom = (position_nm * 10.0 * 1000.0).round() / 1000.0;
        fs::write(&self.path, format!("{}\n{}", POSITION_FILE_HEADER, angstrom))
            .with_context(|| format!("Failed to write position file {}", self.path.display()))
    }
}
