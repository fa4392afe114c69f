/// Width used when no embedding width is known.
pub const DEFAULT_WIDTH: usize = 64;

/// Transformer sinusoidal encoding of one absolute position.
///
/// Component `i` is `sin(p / 10000^(2*floor(i/2)/width))` for even `i` and
/// the matching `cos` for odd `i`.
pub fn sinusoidal(position: usize, width: usize) -> Vec<f32> {
    let p = position as f64;
    (0..width)
        .map(|i| {
            let exponent = (2 * (i / 2)) as f64 / width as f64;
            let angle = p / 10_000f64.powf(exponent);
            if i % 2 == 0 {
                angle.sin() as f32
            } else {
                angle.cos() as f32
            }
        })
        .collect()
}

pub fn sinusoidal_rows(positions: &[usize], width: usize) -> Vec<Vec<f32>> {
    positions.iter().map(|&p| sinusoidal(p, width)).collect()
}
