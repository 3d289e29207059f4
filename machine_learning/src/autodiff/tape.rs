use std::{cell::RefCell, fmt, rc::Rc};

use ndarray::{ArrayD, IxDyn};

use super::conv::ConvGeometry;

/// The operation that produced a node. Operands are node ids on the same tape.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Leaf,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Scale(usize, f32),
    AddScalar(usize),
    MatMul(usize, usize),
    Transpose(usize),
    Reshape(usize),
    Sum(usize),
    SumAxis(usize),
    BroadcastTo(usize),
    SumTo(usize),
    LeakyRelu(usize, f32),
    Sigmoid(usize),
    Softplus(usize),
    Sqrt(usize),
    Im2Col(usize, ConvGeometry),
    Col2Im(usize, ConvGeometry),
}

impl Op {
    /// The operands this operation reads from.
    pub(crate) fn parents(&self) -> ([usize; 2], usize) {
        use Op::*;

        match *self {
            Leaf => ([0, 0], 0),
            Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) | MatMul(a, b) => ([a, b], 2),
            Neg(a)
            | Scale(a, _)
            | AddScalar(a)
            | Transpose(a)
            | Reshape(a)
            | Sum(a)
            | SumAxis(a)
            | BroadcastTo(a)
            | SumTo(a)
            | LeakyRelu(a, _)
            | Sigmoid(a)
            | Softplus(a)
            | Sqrt(a)
            | Im2Col(a, _)
            | Col2Im(a, _) => ([a, 0], 1),
        }
    }
}

struct Node {
    value: Rc<ArrayD<f32>>,
    op: Op,
}

/// An append-only record of tensor operations.
///
/// Every operation on a [`Var`] computes its value eagerly and pushes a node, parents always
/// living at lower ids than their children. Differentiating a node pushes the gradient
/// computation onto the same tape, so gradients can be differentiated again.
///
/// A tape is meant to live for a single forward/backward pass and be dropped afterwards.
#[derive(Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl Tape {
    /// Creates a new empty `Tape`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount of nodes recorded so far.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Returns whether the tape has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Records a new leaf holding `value`.
    ///
    /// Leaves are used both for trainable parameters and for plain constants, whether they
    /// receive a gradient only depends on what is asked for in [`Tape::gradients`].
    pub fn leaf(&self, value: ArrayD<f32>) -> Var<'_> {
        self.push(value, Op::Leaf)
    }

    /// Records a new leaf holding a zero dimensional tensor.
    pub fn scalar(&self, value: f32) -> Var<'_> {
        self.leaf(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub(crate) fn push(&self, value: ArrayD<f32>, op: Op) -> Var<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = nodes.len();
        nodes.push(Node {
            value: Rc::new(value),
            op,
        });

        Var { tape: self, id }
    }

    pub(crate) fn value(&self, id: usize) -> Rc<ArrayD<f32>> {
        Rc::clone(&self.nodes.borrow()[id].value)
    }

    pub(crate) fn op(&self, id: usize) -> Op {
        self.nodes.borrow()[id].op.clone()
    }

    pub(crate) fn var(&self, id: usize) -> Var<'_> {
        Var { tape: self, id }
    }
}

/// A handle to a node recorded on a [`Tape`].
#[derive(Clone, Copy)]
pub struct Var<'t> {
    pub(crate) tape: &'t Tape,
    pub(crate) id: usize,
}

impl<'t> Var<'t> {
    /// Returns the tape this variable lives in.
    pub fn tape(&self) -> &'t Tape {
        self.tape
    }

    /// Returns the id of this variable's node.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the computed value of this variable.
    pub fn value(&self) -> Rc<ArrayD<f32>> {
        self.tape.value(self.id)
    }

    /// Returns the shape of this variable's value.
    pub fn shape(&self) -> Vec<usize> {
        self.value().shape().to_vec()
    }

    /// Returns the value of a variable holding a single element.
    ///
    /// # Returns
    /// `None` if the value has more than one element.
    pub fn item(&self) -> Option<f32> {
        let value = self.value();
        (value.len() == 1).then(|| value.iter().copied().sum())
    }
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.id)
            .field("shape", &self.shape())
            .finish()
    }
}
