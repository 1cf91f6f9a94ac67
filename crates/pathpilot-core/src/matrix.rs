/// Dense row-major `rows × cols` matrix of `f32`.
///
/// For a layer's weights, `rows` is the input width and `cols` the output width,
/// so the element for input `j` and output `i` lives at `data[j * cols + i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap a flat row-major buffer. Returns `None` if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.rows && col < self.cols, "({row}, {col}) out of range");
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn at_mut(&mut self, row: usize, col: usize) -> &mut f32 {
        debug_assert!(row < self.rows && col < self.cols, "({row}, {col}) out of range");
        &mut self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// `out = bias + xᵀ · self`, i.e. one dense-layer pre-activation.
    pub fn vec_mul_add(&self, x: &[f32], bias: &[f32], out: &mut Vec<f32>) {
        debug_assert_eq!(x.len(), self.rows);
        debug_assert_eq!(bias.len(), self.cols);
        out.clear();
        out.extend_from_slice(bias);
        for (j, &xj) in x.iter().enumerate() {
            if xj == 0.0 {
                continue;
            }
            for (o, &w) in out.iter_mut().zip(self.row(j)) {
                *o += xj * w;
            }
        }
    }

    /// `out = self · d`, the gradient flowing back to the layer input.
    pub fn mul_vec(&self, d: &[f32], out: &mut Vec<f32>) {
        debug_assert_eq!(d.len(), self.cols);
        out.clear();
        out.extend((0..self.rows).map(|j| {
            self.row(j).iter().zip(d).map(|(w, di)| w * di).sum::<f32>()
        }));
    }

    /// `self += x ⊗ d` (outer product accumulate).
    pub fn add_outer(&mut self, x: &[f32], d: &[f32]) {
        debug_assert_eq!(x.len(), self.rows);
        debug_assert_eq!(d.len(), self.cols);
        let cols = self.cols;
        for (j, &xj) in x.iter().enumerate() {
            if xj == 0.0 {
                continue;
            }
            for (g, &di) in self.data[j * cols..(j + 1) * cols].iter_mut().zip(d) {
                *g += xj * di;
            }
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.data {
            *v *= factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_layer_addressing() {
        // 3 inputs, 2 outputs.
        let m = Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.at(2, 1), 6.0);
        assert_eq!(m.as_slice()[4], m.at(2, 0));

        let mut out = Vec::new();
        m.vec_mul_add(&[1.0, 0.0, -1.0], &[0.5, 0.5], &mut out);
        assert_eq!(out, vec![1.0 - 5.0 + 0.5, 2.0 - 6.0 + 0.5]);

        m.mul_vec(&[1.0, 1.0], &mut out);
        assert_eq!(out, vec![3.0, 7.0, 11.0]);
    }

    #[test]
    fn outer_product_accumulates() {
        let mut g = Matrix::zeros(2, 2);
        g.add_outer(&[1.0, 2.0], &[3.0, 4.0]);
        g.add_outer(&[1.0, 0.0], &[1.0, 1.0]);
        assert_eq!(g.as_slice(), &[4.0, 5.0, 6.0, 8.0]);
    }

    #[test]
    fn from_vec_rejects_bad_length() {
        assert!(Matrix::from_vec(2, 3, vec![0.0; 5]).is_none());
    }
}
