use ndarray::{ArrayD, Axis, Ix2, IxDyn};

use super::{
    conv::{self, ConvGeometry},
    tape::{Op, Var},
};
use crate::{MlErr, Result};

/// Computes the shape two operands broadcast to, aligning them from their last axis.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| {
        let offset = rank - s.len();
        if i < offset { 1 } else { s[i - offset] }
    };

    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}

/// Sums `x` over its broadcast axes until it has the given `shape`.
pub(crate) fn sum_to(x: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    if x.shape() == shape {
        return Ok(x.clone());
    }

    if x.ndim() < shape.len() {
        return Err(MlErr::shape("sum_to", x.shape(), shape));
    }

    let mut out = x.clone();
    while out.ndim() > shape.len() {
        out = out.sum_axis(Axis(0));
    }

    for (axis, &dim) in shape.iter().enumerate() {
        if dim == 1 && out.shape()[axis] != 1 {
            out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    if out.shape() != shape {
        return Err(MlErr::shape("sum_to", x.shape(), shape));
    }

    Ok(out)
}

/// Materializes `x` broadcast to `shape`.
pub(crate) fn broadcast_to(x: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    x.broadcast(IxDyn(shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| MlErr::shape("broadcast_to", x.shape(), shape))
}

fn to_matrix<'a>(
    x: &'a ArrayD<f32>,
    what: &'static str,
) -> Result<ndarray::ArrayView2<'a, f32>> {
    x.view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| MlErr::shape(what, x.shape(), &[0, 0]))
}

impl<'t> Var<'t> {
    fn binary<F>(self, rhs: Var<'t>, what: &'static str, op: Op, f: F) -> Result<Var<'t>>
    where
        F: FnOnce(&ArrayD<f32>, &ArrayD<f32>) -> ArrayD<f32>,
    {
        let (a, b) = (self.value(), rhs.value());
        if broadcast_shape(a.shape(), b.shape()).is_none() {
            return Err(MlErr::shape(what, b.shape(), a.shape()));
        }

        let value = f(&a, &b);
        Ok(self.tape.push(value, op))
    }

    fn unary<F>(self, op: Op, f: F) -> Var<'t>
    where
        F: FnOnce(&ArrayD<f32>) -> ArrayD<f32>,
    {
        let value = f(&self.value());
        self.tape.push(value, op)
    }

    /// Element-wise addition, broadcasting both operands.
    pub fn add(self, rhs: Var<'t>) -> Result<Var<'t>> {
        self.binary(rhs, "add", Op::Add(self.id, rhs.id), |a, b| a + b)
    }

    /// Element-wise subtraction, broadcasting both operands.
    pub fn sub(self, rhs: Var<'t>) -> Result<Var<'t>> {
        self.binary(rhs, "sub", Op::Sub(self.id, rhs.id), |a, b| a - b)
    }

    /// Element-wise multiplication, broadcasting both operands.
    pub fn mul(self, rhs: Var<'t>) -> Result<Var<'t>> {
        self.binary(rhs, "mul", Op::Mul(self.id, rhs.id), |a, b| a * b)
    }

    /// Element-wise division, broadcasting both operands.
    pub fn div(self, rhs: Var<'t>) -> Result<Var<'t>> {
        self.binary(rhs, "div", Op::Div(self.id, rhs.id), |a, b| a / b)
    }

    pub fn neg(self) -> Var<'t> {
        self.unary(Op::Neg(self.id), |a| -a)
    }

    /// Multiplies every element by a constant.
    pub fn scale(self, factor: f32) -> Var<'t> {
        self.unary(Op::Scale(self.id, factor), |a| a * factor)
    }

    /// Adds a constant to every element.
    pub fn add_scalar(self, value: f32) -> Var<'t> {
        self.unary(Op::AddScalar(self.id), |a| a + value)
    }

    /// Matrix product of two 2D variables.
    pub fn matmul(self, rhs: Var<'t>) -> Result<Var<'t>> {
        let (a, b) = (self.value(), rhs.value());
        let (a2, b2) = (to_matrix(&a, "matmul")?, to_matrix(&b, "matmul")?);
        if a2.ncols() != b2.nrows() {
            return Err(MlErr::shape("matmul", b.shape(), &[a2.ncols(), b2.ncols()]));
        }

        let value = a2.dot(&b2).into_dyn();
        Ok(self.tape.push(value, Op::MatMul(self.id, rhs.id)))
    }

    /// Transposes a 2D variable.
    pub fn t(self) -> Result<Var<'t>> {
        let a = self.value();
        let value = to_matrix(&a, "transpose")?
            .t()
            .as_standard_layout()
            .into_owned()
            .into_dyn();

        Ok(self.tape.push(value, Op::Transpose(self.id)))
    }

    /// Reinterprets the elements in row major order with a new shape.
    pub fn reshape(self, shape: &[usize]) -> Result<Var<'t>> {
        let a = self.value();
        if a.len() != shape.iter().product::<usize>() {
            return Err(MlErr::shape("reshape", a.shape(), shape));
        }

        let value = a.to_shape(IxDyn(shape))?.into_owned();
        Ok(self.tape.push(value, Op::Reshape(self.id)))
    }

    /// Sums every element into a zero dimensional variable.
    pub fn sum(self) -> Var<'t> {
        self.unary(Op::Sum(self.id), |a| ArrayD::from_elem(IxDyn(&[]), a.sum()))
    }

    /// Averages every element into a zero dimensional variable.
    pub fn mean(self) -> Var<'t> {
        let len = self.value().len().max(1);
        self.sum().scale(1. / len as f32)
    }

    /// Sums along `axis`, keeping it with length one.
    pub fn sum_axis(self, axis: usize) -> Result<Var<'t>> {
        let a = self.value();
        if axis >= a.ndim() {
            return Err(MlErr::shape("sum_axis", a.shape(), &[axis]));
        }

        let value = a.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        Ok(self.tape.push(value, Op::SumAxis(self.id)))
    }

    /// Averages along `axis`, keeping it with length one.
    pub fn mean_axis(self, axis: usize) -> Result<Var<'t>> {
        let len = self.value().shape().get(axis).copied().unwrap_or(1).max(1);
        Ok(self.sum_axis(axis)?.scale(1. / len as f32))
    }

    /// Repeats the variable along its unit axes until it has `shape`.
    pub fn broadcast_to(self, shape: &[usize]) -> Result<Var<'t>> {
        let value = broadcast_to(&self.value(), shape)?;
        Ok(self.tape.push(value, Op::BroadcastTo(self.id)))
    }

    /// Sums the variable over the axes it would be broadcast along to get `shape`.
    pub fn sum_to(self, shape: &[usize]) -> Result<Var<'t>> {
        let value = sum_to(&self.value(), shape)?;
        Ok(self.tape.push(value, Op::SumTo(self.id)))
    }

    /// Leaky rectifier, `x` if positive and `alpha * x` otherwise.
    pub fn leaky_relu(self, alpha: f32) -> Var<'t> {
        self.unary(Op::LeakyRelu(self.id, alpha), |a| {
            a.mapv(|x| if x > 0. { x } else { alpha * x })
        })
    }

    pub fn sigmoid(self) -> Var<'t> {
        self.unary(Op::Sigmoid(self.id), |a| a.mapv(sigmoid))
    }

    /// `ln(1 + e^x)`, computed without overflowing for large `|x|`.
    pub fn softplus(self) -> Var<'t> {
        self.unary(Op::Softplus(self.id), |a| a.mapv(softplus))
    }

    pub fn sqrt(self) -> Var<'t> {
        self.unary(Op::Sqrt(self.id), |a| a.mapv(f32::sqrt))
    }

    /// Element-wise square.
    pub fn square(self) -> Result<Var<'t>> {
        self.mul(self)
    }

    /// Unfolds an NHWC image into its convolution patch matrix.
    pub fn im2col(self, geom: ConvGeometry) -> Result<Var<'t>> {
        let value = conv::im2col(&self.value(), &geom)?;
        Ok(self.tape.push(value, Op::Im2Col(self.id, geom)))
    }

    /// Folds a convolution patch matrix back into an NHWC image.
    pub fn col2im(self, geom: ConvGeometry) -> Result<Var<'t>> {
        let value = conv::col2im(&self.value(), &geom)?;
        Ok(self.tape.push(value, Op::Col2Im(self.id, geom)))
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

pub fn softplus(x: f32) -> f32 {
    x.max(0.) + (-x.abs()).exp().ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Tape;
    use ndarray::array;

    #[test]
    fn broadcast_shapes_align_from_the_right() {
        assert_eq!(broadcast_shape(&[4, 3], &[3]), Some(vec![4, 3]));
        assert_eq!(broadcast_shape(&[4, 1], &[1, 5]), Some(vec![4, 5]));
        assert_eq!(broadcast_shape(&[2, 1, 1, 1], &[2, 8, 8, 1]), Some(vec![2, 8, 8, 1]));
        assert_eq!(broadcast_shape(&[], &[3, 2]), Some(vec![3, 2]));
        assert_eq!(broadcast_shape(&[4, 3], &[4]), None);
    }

    #[test]
    fn sum_to_reverses_broadcasting() {
        let x = ArrayD::from_elem(IxDyn(&[2, 3, 4]), 1.);
        assert_eq!(sum_to(&x, &[4]).unwrap(), ArrayD::from_elem(IxDyn(&[4]), 6.));
        assert_eq!(sum_to(&x, &[3, 1]).unwrap(), ArrayD::from_elem(IxDyn(&[3, 1]), 8.));
        assert_eq!(sum_to(&x, &[]).unwrap(), ArrayD::from_elem(IxDyn(&[]), 24.));
        assert!(sum_to(&x, &[5]).is_err());
    }

    #[test]
    fn incompatible_operands_are_rejected() {
        let tape = Tape::new();
        let a = tape.leaf(array![[1., 2., 3.]].into_dyn());
        let b = tape.leaf(array![1., 2.].into_dyn());

        assert!(matches!(a.add(b), Err(MlErr::ShapeMismatch { what: "add", .. })));
        assert!(matches!(a.matmul(a), Err(MlErr::ShapeMismatch { what: "matmul", .. })));
        assert!(a.reshape(&[2, 2]).is_err());
    }

    #[test]
    fn forward_values() {
        let tape = Tape::new();
        let a = tape.leaf(array![[1., -2.], [3., -4.]].into_dyn());
        let b = tape.leaf(array![[0.5, 1.], [2., 0.]].into_dyn());

        let ab = a.matmul(b).unwrap();
        assert_eq!(*ab.value(), array![[-3.5, 1.], [-6.5, 3.]].into_dyn());

        let lrelu = a.leaky_relu(0.1);
        assert_eq!(*lrelu.value(), array![[1., -0.2], [3., -0.4]].into_dyn());

        let rows = a.sum_axis(0).unwrap();
        assert_eq!(*rows.value(), array![[4., -6.]].into_dyn());

        assert_eq!(a.mean().item(), Some(-0.5));
        assert_eq!(*a.t().unwrap().value(), array![[1., 3.], [-2., -4.]].into_dyn());
    }

    #[test]
    fn matrix_views_borrow_only_two_dimensional_values() {
        let m = array![[1., 2., 3.], [4., 5., 6.]].into_dyn();
        let view = to_matrix(&m, "view").unwrap();
        assert_eq!(view.dim(), (2, 3));
        assert_eq!(view[[1, 2]], 6.);

        let flat = array![1., 2.].into_dyn();
        assert!(matches!(
            to_matrix(&flat, "view"),
            Err(MlErr::ShapeMismatch { what: "view", .. })
        ));
    }

    #[test]
    fn softplus_is_stable() {
        assert!((softplus(0.) - 2f32.ln()).abs() < 1e-6);
        assert_eq!(softplus(1000.), 1000.);
        assert!(softplus(-1000.) >= 0.);
        assert!(softplus(-1000.) < 1e-30);
    }
}
