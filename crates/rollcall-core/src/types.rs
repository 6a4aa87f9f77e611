use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Box area in square pixels. Used to pick the dominant face when
    /// several unmatched faces share a frame.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector produced by the recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute Euclidean distance to another embedding.
    ///
    /// Dimensions are zipped; a length mismatch truncates to the shorter
    /// vector rather than panicking.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A single face observed in one frame: where it is and what it looks like.
/// Ephemeral — produced per frame, never persisted.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// An enrolled identity: a unique, non-empty name with up to two
/// reference embeddings built from the stored enrollment images.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding { values: vec![1.0, 2.0, 3.0] };
        let b = Embedding { values: vec![1.0, 2.0, 3.0] };
        assert!(a.euclidean_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_unit_apart() {
        let a = Embedding { values: vec![0.0, 0.0] };
        let b = Embedding { values: vec![3.0, 4.0] };
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_symmetric() {
        let a = Embedding { values: vec![0.5, -1.0, 2.0] };
        let b = Embedding { values: vec![-0.5, 1.5, 0.0] };
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        // Truncates to the shorter vector; must not panic.
        let a = Embedding { values: vec![1.0, 1.0, 1.0] };
        let b = Embedding { values: vec![1.0] };
        assert!(a.euclidean_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_area() {
        let b = BoundingBox { x: 10.0, y: 10.0, width: 4.0, height: 2.5, confidence: 0.9 };
        assert!((b.area() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_area_negative_dims() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: -4.0, height: 2.0, confidence: 0.9 };
        assert_eq!(b.area(), 0.0);
    }
}
