use crate::features::feature_name;
use crate::training::Sample;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub index: usize,
    pub name: String,
    /// Pearson correlation with the horizontal move target.
    pub correlation: f32,
    /// `|correlation|`.
    pub importance: f32,
}

/// Rank input features by how strongly they correlate with target column 0.
///
/// Columns with zero variance score 0. Ties keep index order.
pub fn feature_importance(samples: &[Sample]) -> Vec<FeatureImportance> {
    let Some(width) = samples.first().map(|s| s.input.len()) else {
        return Vec::new();
    };
    let targets: Vec<f64> = samples
        .iter()
        .map(|s| s.target.first().copied().unwrap_or(0.0) as f64)
        .collect();

    let mut ranked: Vec<FeatureImportance> = (0..width)
        .into_par_iter()
        .map(|index| {
            let column: Vec<f64> = samples
                .iter()
                .map(|s| s.input.get(index).copied().unwrap_or(0.0) as f64)
                .collect();
            let correlation = pearson(&column, &targets) as f32;
            FeatureImportance {
                index,
                name: feature_name(index),
                correlation,
                importance: correlation.abs(),
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance).then(a.index.cmp(&b.index)));
    ranked
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return 0.0;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(input: Vec<f32>, move_x: f32) -> Sample {
        Sample {
            input,
            target: vec![move_x, 0.0],
        }
    }

    #[test]
    fn strongest_correlation_ranks_first() {
        let samples: Vec<Sample> = (0..20)
            .map(|i| {
                let t = if i % 2 == 0 { 1.0 } else { -1.0 };
                // Column 0 constant, column 1 anti-correlated, column 2 weakly related.
                sample(vec![0.5, -t, (i % 3) as f32], t)
            })
            .collect();
        let ranked = feature_importance(&samples);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].index, 1);
        assert!((ranked[0].correlation + 1.0).abs() < 1e-6);
        assert_eq!(ranked[0].importance, 1.0);
        let constant = ranked.iter().find(|r| r.index == 0).unwrap();
        assert_eq!(constant.importance, 0.0);
        assert_eq!(ranked[2].index, 0);
    }

    #[test]
    fn names_come_from_feature_layout() {
        let ranked = feature_importance(&[sample(vec![0.0; 130], 0.0)]);
        assert_eq!(ranked.len(), 130);
        assert!(ranked.iter().any(|r| r.name == "ray_hit_59"));
        assert!(feature_importance(&[]).is_empty());
    }
}
