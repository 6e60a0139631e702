//! Cosine similarity over embedding matrices.

use ndarray::{Array2, Axis};

/// L2-normalise each row in place. Zero rows stay zero.
pub fn normalize_rows(m: &mut Array2<f32>) {
    for mut row in m.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-12 {
            row.mapv_inplace(|v| v / norm);
        }
    }
}

/// `(sentences × keywords)` cosine matrix. Both inputs are normalised
/// copies, so callers may pass raw vectors.
pub fn cosine_matrix(sentences: &Array2<f32>, keywords: &Array2<f32>) -> Array2<f32> {
    let mut s = sentences.clone();
    let mut k = keywords.clone();
    normalize_rows(&mut s);
    normalize_rows(&mut k);
    s.dot(&k.t())
}

/// Round to `decimals` places, the precision score tables are stored at.
pub fn round_to(v: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (v * factor).round() / factor
}
