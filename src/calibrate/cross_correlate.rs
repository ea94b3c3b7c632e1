use crate::error::CalibrationError;
use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

/// Translation between two images by FFT cross-correlation.
///
/// Returns `(dy, dx)` in pixels: the shift that registers `moving` onto
/// `reference`. If the content of `moving` sits 5 rows lower than in
/// `reference`, `dy` is -5. The integer peak is refined to sub-pixel
/// precision with a parabola through its neighbours.
pub fn cross_correlate(
    reference: &Array2<u16>,
    moving: &Array2<u16>,
) -> Result<(f64, f64), CalibrationError> {
    let _span = tracing::debug_span!("cross_correlate").entered();

    if reference.dim() != moving.dim() {
        return Err(CalibrationError::ShapeMismatch(reference.dim(), moving.dim()));
    }
    let (rows, cols) = reference.dim();
    if rows < 3 || cols < 3 {
        return Err(CalibrationError::ShapeMismatch(reference.dim(), moving.dim()));
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut a = to_complex(reference);
    let mut b = to_complex(moving);
    fft2(&mut planner, &mut a, rows, cols, false);
    fft2(&mut planner, &mut b, rows, cols, false);

    let mut cross: Vec<Complex<f64>> = a
        .iter()
        .zip(b.iter())
        .map(|(fa, fb)| fa * fb.conj())
        .collect();
    fft2(&mut planner, &mut cross, rows, cols, true);

    let (peak, _) = cross
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, c)| {
            if c.re > best_value {
                (i, c.re)
            } else {
                (best, best_value)
            }
        });
    let (pr, pc) = (peak / cols, peak % cols);

    let at = |r: usize, c: usize| cross[r * cols + c].re;
    let row_offset = parabolic(
        at((pr + rows - 1) % rows, pc),
        at(pr, pc),
        at((pr + 1) % rows, pc),
    );
    let col_offset = parabolic(
        at(pr, (pc + cols - 1) % cols),
        at(pr, pc),
        at(pr, (pc + 1) % cols),
    );

    Ok((
        signed(pr, rows) + row_offset,
        signed(pc, cols) + col_offset,
    ))
}

fn to_complex(image: &Array2<u16>) -> Vec<Complex<f64>> {
    let mean = image.iter().map(|&v| v as f64).sum::<f64>() / image.len() as f64;
    image
        .iter()
        .map(|&v| Complex::new(v as f64 - mean, 0.0))
        .collect()
}

/// In-place 2D FFT of a row-major buffer
fn fft2(
    planner: &mut FftPlanner<f64>,
    data: &mut Vec<Complex<f64>>,
    rows: usize,
    cols: usize,
    inverse: bool,
) {
    let (row_fft, col_fft) = if inverse {
        (planner.plan_fft_inverse(cols), planner.plan_fft_inverse(rows))
    } else {
        (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows))
    };

    row_fft.process(data);
    let mut transposed = transpose(data, rows, cols);
    col_fft.process(&mut transposed);
    *data = transpose(&transposed, cols, rows);
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

/// Peak index to a signed shift
fn signed(index: usize, len: usize) -> f64 {
    if index > len / 2 {
        index as f64 - len as f64
    } else {
        index as f64
    }
}

/// Vertex offset of the parabola through three equally spaced samples
fn parabolic(left: f64, center: f64, right: f64) -> f64 {
    let denominator = left - 2.0 * center + right;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    let offset = 0.5 * (left - right) / denominator;
    offset.clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(rows: usize, cols: usize, dy: f64, dx: f64) -> Array2<u16> {
        let centers = [(20.0, 24.0, 3.0), (40.0, 18.0, 4.0), (30.0, 44.0, 2.5)];
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let value: f64 = centers
                .iter()
                .map(|&(cr, cc, s)| {
                    let d2 = (r as f64 - cr - dy).powi(2) + (c as f64 - cc - dx).powi(2);
                    4000.0 * (-d2 / (2.0 * s * s)).exp()
                })
                .sum();
            (100.0 + value) as u16
        })
    }

    #[test]
    fn identical_images_have_no_shift() {
        let image = blobs(64, 64, 0.0, 0.0);
        let (dy, dx) = cross_correlate(&image, &image).unwrap();
        assert!(dy.abs() < 1e-6 && dx.abs() < 1e-6, "({dy}, {dx})");
    }

    #[test]
    fn recovers_integer_shift() {
        let reference = blobs(64, 64, 0.0, 0.0);
        let moving = blobs(64, 64, 5.0, -3.0);
        let (dy, dx) = cross_correlate(&reference, &moving).unwrap();
        assert!((dy + 5.0).abs() < 0.3, "dy = {dy}");
        assert!((dx - 3.0).abs() < 0.3, "dx = {dx}");
    }

    #[test]
    fn non_square_images() {
        let reference = blobs(48, 64, 0.0, 0.0);
        let moving = blobs(48, 64, -4.0, 6.0);
        let (dy, dx) = cross_correlate(&reference, &moving).unwrap();
        assert!((dy - 4.0).abs() < 0.3, "dy = {dy}");
        assert!((dx + 6.0).abs() < 0.3, "dx = {dx}");
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = blobs(32, 32, 0.0, 0.0);
        let b = blobs(32, 48, 0.0, 0.0);
        assert!(matches!(
            cross_correlate(&a, &b),
            Err(CalibrationError::ShapeMismatch(..))
        ));
    }
}
