use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::{
    MlErr, Result,
    autodiff::{Tape, Var},
    initialization::ParamGen,
};

/// Identifies a tensor registered in a [`ParamSet`].
///
/// Keys are only meaningful for the set that handed them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamKey(usize);

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    shape: Vec<usize>,
    offset: usize,
    len: usize,
}

/// The trainable parameters of a single network.
///
/// Every tensor lives in one contiguous buffer in registration order, so the whole set can be
/// handed to an optimizer as a single slice. Tensors are identified by `"<network>/<name>"`.
#[derive(Debug, Clone)]
pub struct ParamSet {
    network: String,
    values: Vec<f32>,
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl ParamSet {
    /// Creates a new empty `ParamSet`.
    ///
    /// # Arguments
    /// * `network` - The prefix of every identifier in this set.
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            values: Vec::new(),
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the name of the network owning this set.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Registers a new tensor and fills it with values from `param_gen`.
    ///
    /// # Arguments
    /// * `name` - The name of the tensor, relative to the network.
    /// * `shape` - The shape of the tensor.
    /// * `param_gen` - The generator of the initial values.
    ///
    /// # Returns
    /// The key of the new tensor, or an error if the name is taken or the generator was
    /// exhausted.
    pub fn register(
        &mut self,
        name: &str,
        shape: &[usize],
        param_gen: &mut dyn ParamGen,
    ) -> Result<ParamKey> {
        let name = format!("{}/{name}", self.network);
        if self.index.contains_key(&name) {
            return Err(MlErr::DuplicateParam(name));
        }

        let len = shape.iter().product();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let sample = param_gen
                .sample(len - values.len())
                .ok_or_else(|| MlErr::ExhaustedParamGen { name: name.clone() })?;

            values.extend(sample);
        }

        let key = ParamKey(self.slots.len());
        self.index.insert(name.clone(), key.0);
        self.slots.push(Slot {
            name,
            shape: shape.to_vec(),
            offset: self.values.len(),
            len,
        });
        self.values.extend(values);

        Ok(key)
    }

    /// Returns the total amount of scalars in this set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether there are no scalars in this set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the amount of tensors registered in this set.
    pub fn n_tensors(&self) -> usize {
        self.slots.len()
    }

    /// Looks up a tensor by its full identifier.
    pub fn key(&self, name: &str) -> Result<ParamKey> {
        self.index
            .get(name)
            .map(|&i| ParamKey(i))
            .ok_or_else(|| MlErr::UnknownParam(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The flat buffer holding every tensor.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// The flat buffer holding every tensor, for optimizers to update in place.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Returns a view of a single tensor.
    pub fn tensor(&self, key: ParamKey) -> Result<ArrayViewD<'_, f32>> {
        let slot = self.slot(key)?;
        let data = &self.values[slot.offset..slot.offset + slot.len];
        Ok(ArrayViewD::from_shape(IxDyn(&slot.shape), data)?)
    }

    /// Overwrites a tensor by its full identifier.
    ///
    /// # Arguments
    /// * `name` - The full identifier of the tensor.
    /// * `shape` - The shape of `data`, which must match the registered one.
    /// * `data` - The new values in row major order.
    pub fn assign(&mut self, name: &str, shape: &[usize], data: &[f32]) -> Result<()> {
        let key = self.key(name)?;
        let slot = self.slot(key)?;
        if slot.shape != shape || slot.len != data.len() {
            return Err(MlErr::shape("assign", shape, &slot.shape));
        }

        let offset = slot.offset;
        self.values[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Iterates over every tensor as `(identifier, shape, values)` in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize], &[f32])> {
        self.slots.iter().map(|slot| {
            let data = &self.values[slot.offset..slot.offset + slot.len];
            (slot.name.as_str(), slot.shape.as_slice(), data)
        })
    }

    fn slot(&self, key: ParamKey) -> Result<&Slot> {
        self.slots
            .get(key.0)
            .ok_or_else(|| MlErr::UnknownParam(format!("{}/#{}", self.network, key.0)))
    }
}

/// A parameter set recorded onto a tape as leaves.
///
/// Binding happens once per pass, so every forward call in that pass reads the same variables
/// and gradients flow back to a single leaf per tensor.
pub struct BoundParams<'t> {
    network: String,
    vars: Vec<Var<'t>>,
}

impl<'t> BoundParams<'t> {
    /// Returns the variable bound to `key`.
    pub fn get(&self, key: ParamKey) -> Result<Var<'t>> {
        self.vars
            .get(key.0)
            .copied()
            .ok_or_else(|| MlErr::UnknownParam(format!("{}/#{}", self.network, key.0)))
    }

    /// The bound variables in registration order.
    pub fn vars(&self) -> &[Var<'t>] {
        &self.vars
    }

    /// Differentiates `output` with respect to every bound tensor.
    ///
    /// # Returns
    /// The gradient laid out exactly like the set's flat buffer.
    pub fn flat_gradient(&self, output: Var<'t>) -> Result<Vec<f32>> {
        let tape = output.tape();
        let grads = tape.gradients(output, &self.vars)?;

        let len = grads.iter().map(|g| g.value().len()).sum();
        let mut flat = Vec::with_capacity(len);
        for g in grads {
            flat.extend(g.value().iter().copied());
        }

        Ok(flat)
    }
}

impl Tape {
    /// Records every tensor of `params` as a leaf on this tape.
    pub fn bind(&self, params: &ParamSet) -> Result<BoundParams<'_>> {
        let mut vars = Vec::with_capacity(params.slots.len());
        for slot in &params.slots {
            let data = params.values[slot.offset..slot.offset + slot.len].to_vec();
            let value = ArrayD::from_shape_vec(IxDyn(&slot.shape), data)?;
            vars.push(self.leaf(value));
        }

        Ok(BoundParams {
            network: params.network.clone(),
            vars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::ConstParamGen;

    fn set() -> ParamSet {
        let mut params = ParamSet::new("net");
        let mut ones = ConstParamGen::new(1., usize::MAX);
        params.register("dense_0/kernel", &[2, 3], &mut ones).unwrap();
        let mut twos = ConstParamGen::new(2., usize::MAX);
        params.register("dense_0/bias", &[3], &mut twos).unwrap();
        params
    }

    #[test]
    fn tensors_are_laid_out_in_registration_order() {
        let params = set();
        assert_eq!(params.len(), 9);
        assert_eq!(params.n_tensors(), 2);
        assert_eq!(params.values(), &[1., 1., 1., 1., 1., 1., 2., 2., 2.]);

        let names: Vec<_> = params.iter().map(|(name, ..)| name).collect();
        assert_eq!(names, ["net/dense_0/kernel", "net/dense_0/bias"]);

        let bias = params.tensor(params.key("net/dense_0/bias").unwrap()).unwrap();
        assert_eq!(bias.shape(), &[3]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut params = set();
        let mut zeros = ConstParamGen::new(0., usize::MAX);
        assert_eq!(
            params.register("dense_0/bias", &[3], &mut zeros),
            Err(MlErr::DuplicateParam("net/dense_0/bias".into()))
        );
    }

    #[test]
    fn exhausted_generators_are_reported() {
        let mut params = ParamSet::new("net");
        let mut zeros = ConstParamGen::new(0., 3);
        assert!(matches!(
            params.register("w", &[2, 2], &mut zeros),
            Err(MlErr::ExhaustedParamGen { .. })
        ));
    }

    #[test]
    fn assign_checks_names_and_shapes() {
        let mut params = set();
        params.assign("net/dense_0/bias", &[3], &[5., 6., 7.]).unwrap();
        assert_eq!(&params.values()[6..], &[5., 6., 7.]);

        assert!(params.assign("net/dense_0/bias", &[1, 3], &[0.; 3]).is_err());
        assert!(matches!(
            params.assign("net/dense_1/bias", &[3], &[0.; 3]),
            Err(MlErr::UnknownParam(_))
        ));
    }

    #[test]
    fn flat_gradient_follows_the_buffer_layout() {
        let params = set();
        let tape = Tape::new();
        let bound = tape.bind(&params).unwrap();

        let kernel = bound.get(params.key("net/dense_0/kernel").unwrap()).unwrap();
        let bias = bound.get(params.key("net/dense_0/bias").unwrap()).unwrap();
        let x = tape.leaf(ndarray::array![[1., 2.]].into_dyn());

        let y = x.matmul(kernel).unwrap().add(bias).unwrap().sum();
        let grad = bound.flat_gradient(y).unwrap();

        assert_eq!(grad, vec![1., 1., 1., 2., 2., 2., 1., 1., 1.]);
    }
}
