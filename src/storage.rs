//! Backing memory for [`Variable`]s.
//!
//! `Storage` maps a variable's identity to a `{value, gradient}` pair. Both
//! members are allocated on first mutable access and reused while the
//! variable's shape is unchanged. When the shape changes:
//! - preservable slots with the same element count are reshaped in place,
//! - every other slot is replaced by a fresh zero tensor.
//!
//! Operators that write one slot while reading others use the
//! `take_*` / `restore_*` pair: the written tensor is moved out, the
//! computation reads through `&Storage`, and the tensor is moved back.

use std::collections::HashMap;

use crate::{Error, Result, Tensor, Variable, VariableId};

#[derive(Debug, Clone)]
struct Entry {
    preservable: bool,
    trainable: bool,
    value: Option<Tensor>,
    gradient: Option<Tensor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Value,
    Gradient,
}

impl Slot {
    fn name(self) -> &'static str {
        match self {
            Slot::Value => "value",
            Slot::Gradient => "gradient",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Storage {
    entries: HashMap<VariableId, Entry>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of variables with at least one allocated member.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.entries.contains_key(&var.id())
    }

    /// Read the value of `var`.
    ///
    /// Fails with `Unallocated` if nothing was written yet, and with
    /// `ShapeMismatch` if the variable was re-shaped since the last write.
    pub fn value(&self, var: &Variable) -> Result<&Tensor> {
        self.read(var, Slot::Value)
    }

    pub fn gradient(&self, var: &Variable) -> Result<&Tensor> {
        self.read(var, Slot::Gradient)
    }

    /// Value of `var`, allocating or reconciling its shape first.
    pub fn value_mut(&mut self, var: &Variable) -> &mut Tensor {
        let slot = self.slot_mut(var, Slot::Value);
        reconcile(slot, var)
    }

    pub fn gradient_mut(&mut self, var: &Variable) -> &mut Tensor {
        let slot = self.slot_mut(var, Slot::Gradient);
        reconcile(slot, var)
    }

    /// Move the value of `var` out of storage (allocating it if needed).
    ///
    /// Must be paired with [`Storage::restore_value`].
    pub fn take_value(&mut self, var: &Variable) -> Tensor {
        self.take(var, Slot::Value)
    }

    pub fn take_gradient(&mut self, var: &Variable) -> Tensor {
        self.take(var, Slot::Gradient)
    }

    pub fn restore_value(&mut self, var: &Variable, tensor: Tensor) {
        *self.slot_mut(var, Slot::Value) = Some(tensor);
    }

    pub fn restore_gradient(&mut self, var: &Variable, tensor: Tensor) {
        *self.slot_mut(var, Slot::Gradient) = Some(tensor);
    }

    /// Overwrite the value of `var` from a raw buffer.
    pub fn assign_value(&mut self, var: &Variable, values: &[f32]) -> Result<()> {
        if values.len() != var.element_count() {
            return Err(Error::InvalidShape(format!(
                "variable {} {} needs {} values, got {}",
                var.id(),
                var.shape(),
                var.element_count(),
                values.len()
            )));
        }
        self.value_mut(var).data_mut().copy_from_slice(values);
        Ok(())
    }

    /// Overwrite every element of the value of `var` from a generator.
    pub fn assign_value_with(&mut self, var: &Variable, mut generator: impl FnMut() -> f32) {
        for v in self.value_mut(var).data_mut() {
            *v = generator();
        }
    }

    /// Store a whole tensor as the value of `var`, reshaping it to the
    /// variable's shape.
    pub fn insert_value(&mut self, var: &Variable, mut tensor: Tensor) -> Result<()> {
        tensor.reshape(var.shape().clone())?;
        self.restore_value(var, tensor);
        Ok(())
    }

    /// `(value, gradient)` of a trainable variable, for in-place updates.
    pub fn parameter_mut(&mut self, var: &Variable) -> Result<(&mut [f32], &[f32])> {
        let id = var.id();
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(Error::Unallocated { id, slot: "value" })?;
        let value = entry
            .value
            .as_mut()
            .ok_or(Error::Unallocated { id, slot: "value" })?;
        let gradient = entry.gradient.as_ref().ok_or(Error::Unallocated {
            id,
            slot: "gradient",
        })?;
        if value.element_count() != gradient.element_count() {
            return Err(Error::ShapeMismatch {
                expected: value.shape().clone(),
                got: gradient.shape().clone(),
            });
        }
        Ok((value.data_mut(), gradient.data()))
    }

    /// Values of every trainable entry, ordered by variable creation.
    pub fn trainable_values(&self) -> Vec<(VariableId, &Tensor)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.trainable)
            .filter_map(|(id, e)| e.value.as_ref().map(|v| (*id, v)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Release every entry whose variable is not preservable.
    ///
    /// Called before a batch-size change so per-batch buffers are rebuilt at
    /// the new size while weights and running statistics survive.
    pub fn drop_non_preservable(&mut self) {
        self.entries.retain(|_, e| e.preservable);
    }

    fn read(&self, var: &Variable, slot: Slot) -> Result<&Tensor> {
        let id = var.id();
        let unallocated = Error::Unallocated {
            id,
            slot: slot.name(),
        };
        let entry = self.entries.get(&id).ok_or(unallocated.clone())?;
        let tensor = match slot {
            Slot::Value => entry.value.as_ref(),
            Slot::Gradient => entry.gradient.as_ref(),
        }
        .ok_or(unallocated)?;
        if tensor.shape() != var.shape() {
            return Err(Error::ShapeMismatch {
                expected: var.shape().clone(),
                got: tensor.shape().clone(),
            });
        }
        Ok(tensor)
    }

    fn slot_mut(&mut self, var: &Variable, slot: Slot) -> &mut Option<Tensor> {
        let entry = self.entries.entry(var.id()).or_insert_with(|| Entry {
            preservable: var.is_preservable(),
            trainable: var.is_trainable(),
            value: None,
            gradient: None,
        });
        match slot {
            Slot::Value => &mut entry.value,
            Slot::Gradient => &mut entry.gradient,
        }
    }

    fn take(&mut self, var: &Variable, slot: Slot) -> Tensor {
        let cell = self.slot_mut(var, slot);
        reconcile(cell, var);
        match cell.take() {
            Some(t) => t,
            None => Tensor::zeros(var.shape().clone()),
        }
    }
}

fn reconcile<'a>(cell: &'a mut Option<Tensor>, var: &Variable) -> &'a mut Tensor {
    let reusable = match cell {
        Some(t) if t.shape() == var.shape() => true,
        Some(t) if var.is_preservable() && t.element_count() == var.element_count() => {
            t.reshape(var.shape().clone()).is_ok()
        }
        _ => false,
    };
    if !reusable {
        *cell = Some(Tensor::zeros(var.shape().clone()));
    }
    cell.get_or_insert_with(|| Tensor::zeros(var.shape().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn shape(dims: &[usize]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn reading_unwritten_slot_is_an_error() {
        let storage = Storage::new();
        let v = Variable::new(shape(&[2]));
        assert!(matches!(
            storage.value(&v),
            Err(Error::Unallocated { slot: "value", .. })
        ));
    }

    #[test]
    fn value_and_gradient_allocate_independently() {
        let mut storage = Storage::new();
        let v = Variable::new(shape(&[2, 3]));
        storage.value_mut(&v).fill(1.0);
        assert!(storage.value(&v).is_ok());
        assert!(storage.gradient(&v).is_err());

        let g = storage.gradient_mut(&v);
        assert_eq!(g.dims(), &[2, 3]);
        assert!(g.data().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn buffer_is_reused_while_shape_is_unchanged() {
        let mut storage = Storage::new();
        let v = Variable::new(shape(&[4]));
        storage.assign_value(&v, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(storage.value_mut(&v).data(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(storage.assign_value(&v, &[1.0]).is_err());
    }

    #[test]
    fn non_preservable_slot_reallocates_on_shape_change() {
        let mut storage = Storage::new();
        let mut v = Variable::new(shape(&[2, 2]));
        storage.assign_value(&v, &[1.0; 4]).unwrap();

        v.set_shape(shape(&[4, 1]));
        assert!(matches!(
            storage.value(&v),
            Err(Error::ShapeMismatch { .. })
        ));
        let t = storage.value_mut(&v);
        assert_eq!(t.dims(), &[4, 1]);
        assert_eq!(t.data(), &[0.0; 4]);
    }

    #[test]
    fn preservable_slot_reshapes_when_count_matches() {
        let mut storage = Storage::new();
        let mut v = Variable::preservable(shape(&[2, 2]));
        storage.assign_value(&v, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        v.set_shape(shape(&[4]));
        assert_eq!(storage.value_mut(&v).data(), &[1.0, 2.0, 3.0, 4.0]);

        v.set_shape(shape(&[3]));
        assert_eq!(storage.value_mut(&v).data(), &[0.0; 3]);
        assert_eq!(storage.value(&v).unwrap().dims(), &[3]);
    }

    #[test]
    fn drop_non_preservable_keeps_weights() {
        let mut storage = Storage::new();
        let w = Variable::trainable(shape(&[2]));
        let stat = Variable::preservable(shape(&[2]));
        let act = Variable::new(shape(&[8, 2]));
        storage.value_mut(&w);
        storage.value_mut(&stat);
        storage.value_mut(&act);

        storage.drop_non_preservable();
        assert!(storage.contains(&w));
        assert!(storage.contains(&stat));
        assert!(!storage.contains(&act));
    }

    #[test]
    fn take_and_restore_allow_reads_of_other_slots() {
        let mut storage = Storage::new();
        let a = Variable::new(shape(&[3]));
        let b = Variable::new(shape(&[3]));
        storage.assign_value(&a, &[1.0, 2.0, 3.0]).unwrap();

        let mut out = storage.take_value(&b);
        for (o, x) in out.data_mut().iter_mut().zip(storage.value(&a).unwrap().data()) {
            *o = 2.0 * x;
        }
        storage.restore_value(&b, out);
        assert_eq!(storage.value(&b).unwrap().data(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn parameter_mut_requires_both_members() {
        let mut storage = Storage::new();
        let w = Variable::trainable(shape(&[2]));
        storage.assign_value(&w, &[1.0, 1.0]).unwrap();
        assert!(storage.parameter_mut(&w).is_err());

        storage.gradient_mut(&w).fill(0.5);
        let (value, grad) = storage.parameter_mut(&w).unwrap();
        for (v, g) in value.iter_mut().zip(grad) {
            *v -= g;
        }
        assert_eq!(storage.value(&w).unwrap().data(), &[0.5, 0.5]);
    }

    #[test]
    fn trainable_values_are_ordered_and_filtered() {
        let mut storage = Storage::new();
        let w1 = Variable::trainable(shape(&[1]));
        let act = Variable::new(shape(&[1]));
        let w2 = Variable::trainable(shape(&[1]));
        storage.value_mut(&w2);
        storage.value_mut(&act);
        storage.value_mut(&w1);

        let ids: Vec<_> = storage.trainable_values().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![w1.id(), w2.id()]);
    }
}
