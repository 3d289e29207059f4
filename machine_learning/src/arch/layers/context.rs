use std::{cell::RefCell, rc::Rc};

use rand::Rng;

use crate::{
    arch::Mode,
    params::{BoundParams, NormState, ParamSet},
};

/// The state layers register into while a network is being built.
pub struct Init<'a, R: Rng> {
    pub params: &'a mut ParamSet,
    pub norms: &'a mut NormState,
    rng: Rc<RefCell<R>>,
}

impl<'a, R: Rng> Init<'a, R> {
    /// Creates a new `Init`.
    ///
    /// # Arguments
    /// * `params` - Where trainable tensors get registered.
    /// * `norms` - Where normalization statistics get registered.
    /// * `rng` - The source of randomness for weight initialization.
    pub fn new(params: &'a mut ParamSet, norms: &'a mut NormState, rng: Rc<RefCell<R>>) -> Self {
        Self { params, norms, rng }
    }

    /// Returns a handle to the shared random number generator.
    pub fn rng(&self) -> Rc<RefCell<R>> {
        Rc::clone(&self.rng)
    }
}

/// What a layer can see during a forward pass.
pub struct Forward<'a, 't> {
    pub params: &'a BoundParams<'t>,
    pub norms: &'a mut NormState,
    pub mode: Mode,
}

impl<'a, 't> Forward<'a, 't> {
    pub fn new(params: &'a BoundParams<'t>, norms: &'a mut NormState, mode: Mode) -> Self {
        Self {
            params,
            norms,
            mode,
        }
    }
}
