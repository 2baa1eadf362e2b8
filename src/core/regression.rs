//! 岭回归
//!
//! 特征维度固定为 4，截距通过中心化求得，正规方程用带主元的高斯消元求解。

/// 特征数
pub const FEATURES: usize = 4;

/// 拟合得到的线性模型
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeModel {
    pub weights: [f64; FEATURES],
    pub intercept: f64,
}

impl RidgeModel {
    /// 拟合 `(X, y)`，`alpha` 为 L2 正则系数
    ///
    /// 样本为空、含非有限值或方程奇异时返回 `None`。
    pub fn fit(samples: &[([f64; FEATURES], f64)], alpha: f64) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        if samples
            .iter()
            .any(|(x, y)| !y.is_finite() || x.iter().any(|v| !v.is_finite()))
        {
            return None;
        }

        let n = samples.len() as f64;
        let mut x_mean = [0.0; FEATURES];
        let mut y_mean = 0.0;
        for (x, y) in samples {
            for (mean, v) in x_mean.iter_mut().zip(x) {
                *mean += v / n;
            }
            y_mean += y / n;
        }

        // (XᵀX + αI) w = Xᵀy，X 与 y 均已中心化
        let mut a = [[0.0; FEATURES]; FEATURES];
        let mut b = [0.0; FEATURES];
        for (x, y) in samples {
            let xc: Vec<f64> = x.iter().zip(&x_mean).map(|(v, m)| v - m).collect();
            let yc = y - y_mean;
            for i in 0..FEATURES {
                for j in 0..FEATURES {
                    a[i][j] += xc[i] * xc[j];
                }
                b[i] += xc[i] * yc;
            }
        }
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += alpha;
        }

        let weights = solve(a, b)?;
        let intercept = y_mean
            - weights
                .iter()
                .zip(&x_mean)
                .map(|(w, m)| w * m)
                .sum::<f64>();

        Some(Self { weights, intercept })
    }

    pub fn predict(&self, x: &[f64; FEATURES]) -> f64 {
        self.intercept + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

fn solve(
    mut a: [[f64; FEATURES]; FEATURES],
    mut b: [f64; FEATURES],
) -> Option<[f64; FEATURES]> {
    for col in 0..FEATURES {
        let pivot = (col..FEATURES).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..FEATURES {
            let factor = a[row][col] / a[col][col];
            for k in col..FEATURES {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; FEATURES];
    for row in (0..FEATURES).rev() {
        let tail: f64 = ((row + 1)..FEATURES).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_feature_fit() {
        // 只有第一个特征变化：y = 10 - 2x
        let samples: Vec<_> = (0..3)
            .flat_map(|_| 1..=4)
            .map(|size| ([size as f64, 20.0, 10.0, 50.0], 10.0 - 2.0 * size as f64))
            .collect();
        let model = RidgeModel::fit(&samples, 1.0).unwrap();

        assert!((model.weights[0] + 1.875).abs() < 1e-9);
        assert!(model.weights[1..].iter().all(|w| w.abs() < 1e-12));
        assert!((model.intercept - 9.6875).abs() < 1e-9);
        assert!((model.predict(&[2.0, 20.0, 10.0, 50.0]) - 5.9375).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RidgeModel::fit(&[], 1.0).is_none());
        assert!(RidgeModel::fit(&[([f64::NAN, 0.0, 0.0, 0.0], 1.0)], 1.0).is_none());
    }

    #[test]
    fn test_solve_with_pivoting() {
        let a = [
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 2.0, 0.0],
            [0.0, 0.0, 0.0, 4.0],
        ];
        let x = solve(a, [3.0, 5.0, 4.0, 8.0]).unwrap();
        assert_eq!(x, [5.0, 3.0, 2.0, 2.0]);
    }
}
