//! Distance functions for vector search

/// Cosine distance: `1 - (a.b)/(|a||b|)`. A zero norm on either side yields
/// the maximum distance of 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_product = norm_a.sqrt() * norm_b.sqrt();
    if norm_product == 0.0 {
        return 1.0;
    }

    1.0 - dot / norm_product
}

/// Euclidean (L2) distance
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Dot product similarity
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
