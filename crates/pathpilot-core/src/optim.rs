use crate::matrix::Matrix;
use crate::nn::Network;

pub const BETA1: f32 = 0.9;
pub const BETA2: f32 = 0.999;
pub const EPSILON: f32 = 1e-8;

/// Per-parameter buffer shaped like a [`Network`]. Used for gradients and for
/// the Adam moments.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    weights: Vec<Matrix>,
    biases: Vec<Vec<f32>>,
}

impl Gradients {
    pub fn zeros_like(network: &Network) -> Self {
        Self {
            weights: network
                .layers()
                .iter()
                .map(|l| Matrix::zeros(l.weights.rows(), l.weights.cols()))
                .collect(),
            biases: network.layers().iter().map(|l| vec![0.0; l.bias.len()]).collect(),
        }
    }

    pub fn layer(&self, k: usize) -> (&Matrix, &[f32]) {
        (&self.weights[k], &self.biases[k])
    }

    pub fn layer_mut(&mut self, k: usize) -> (&mut Matrix, &mut [f32]) {
        (&mut self.weights[k], &mut self.biases[k])
    }

    pub fn reset(&mut self) {
        for w in &mut self.weights {
            w.fill(0.0);
        }
        for b in &mut self.biases {
            b.fill(0.0);
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for w in &mut self.weights {
            w.scale(factor);
        }
        for b in &mut self.biases {
            for v in b.iter_mut() {
                *v *= factor;
            }
        }
    }

    fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.weights
            .iter()
            .flat_map(|w| w.as_slice().iter().copied())
            .chain(self.biases.iter().flat_map(|b| b.iter().copied()))
    }

    pub fn is_finite(&self) -> bool {
        self.values().all(f32::is_finite)
    }

    /// L2 norm over every parameter.
    pub fn global_norm(&self) -> f32 {
        self.values().map(|g| g * g).sum::<f32>().sqrt()
    }

    /// Rescale so the global norm is at most `max_norm`. Returns the norm before
    /// clipping.
    pub fn clip_global_norm(&mut self, max_norm: f32) -> f32 {
        let norm = self.global_norm();
        if norm > max_norm && norm > 0.0 {
            self.scale(max_norm / norm);
        }
        norm
    }
}

/// Adam optimizer state. Owned by the trainer and never persisted.
#[derive(Clone, Debug)]
pub struct Adam {
    pub learning_rate: f32,
    m: Gradients,
    v: Gradients,
    step: u64,
}

impl Adam {
    pub fn new(network: &Network, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            m: Gradients::zeros_like(network),
            v: Gradients::zeros_like(network),
            step: 0,
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn reset(&mut self) {
        self.m.reset();
        self.v.reset();
        self.step = 0;
    }

    /// Apply one update. The step counter is global across epochs and the first
    /// update uses `t = 1`.
    pub fn step(&mut self, network: &mut Network, grads: &Gradients) {
        self.step += 1;
        let t = self.step as i32;
        let bc1 = 1.0 - BETA1.powi(t);
        let bc2 = 1.0 - BETA2.powi(t);
        let lr = self.learning_rate;

        let update = |p: &mut f32, g: f32, m: &mut f32, v: &mut f32| {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            let m_hat = *m / bc1;
            let v_hat = *v / bc2;
            *p -= lr * m_hat / (v_hat.sqrt() + EPSILON);
        };

        for (k, layer) in network.layers_mut().iter_mut().enumerate() {
            let (gw, gb) = grads.layer(k);
            let (mw, mb) = self.m.layer_mut(k);
            let (vw, vb) = self.v.layer_mut(k);
            for (((p, &g), m), v) in layer
                .weights
                .as_mut_slice()
                .iter_mut()
                .zip(gw.as_slice())
                .zip(mw.as_mut_slice())
                .zip(vw.as_mut_slice())
            {
                update(p, g, m, v);
            }
            for (((p, &g), m), v) in layer.bias.iter_mut().zip(gb).zip(mb).zip(vb) {
                update(p, g, m, v);
            }
        }
    }
}
