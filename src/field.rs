use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};




/**
 * Value written to field entries that have no donor: ghost cells without a
 * neighbor, and resampled cells outside every candidate block.
 */
pub const SENTINEL: f64 = f64::MIN;




/**
 * Where field values live on a grid block.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Centering {
    Point,
    Cell,
}




/**
 * A multi-component array of field values. Tuples are stored contiguously in
 * the row-major order of the owning block's cell (or point) index space, so
 * the value of component `c` at tuple `n` lives at `data[n * num_components
 * + c]`.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    centering: Centering,
    num_components: usize,
    data: Vec<f64>,
}




// ============================================================================
impl Field {

    /**
     * Create a field of `len` tuples, with every component set to `value`.
     */
    pub fn filled(centering: Centering, num_components: usize, len: usize, value: f64) -> Self {
        assert!(num_components > 0, "a field must have at least one component");
        Self {
            centering,
            num_components,
            data: vec![value; len * num_components],
        }
    }

    /**
     * Wrap an existing buffer. Fails if the buffer length is not a multiple
     * of the component count.
     */
    pub fn from_vec(centering: Centering, num_components: usize, data: Vec<f64>) -> Result<Self> {
        if num_components == 0 || data.len() % num_components != 0 {
            return Err(Error::FieldMismatch {
                name: String::new(),
                reason: format!("{} values cannot be split into {}-component tuples", data.len(), num_components),
            });
        }
        Ok(Self { centering, num_components, data })
    }

    pub fn centering(&self) -> Centering {
        self.centering
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    /**
     * Return the number of tuples in this field.
     */
    pub fn len(&self) -> usize {
        self.data.len() / self.num_components
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn component(&self, index: usize, component: usize) -> f64 {
        self.data[index * self.num_components + component]
    }

    pub fn set_component(&mut self, index: usize, component: usize, value: f64) {
        self.data[index * self.num_components + component] = value
    }

    /**
     * Return all the components of one tuple.
     */
    pub fn tuple(&self, index: usize) -> &[f64] {
        let n = self.num_components;
        &self.data[index * n..(index + 1) * n]
    }

    pub fn tuple_mut(&mut self, index: usize) -> &mut [f64] {
        let n = self.num_components;
        &mut self.data[index * n..(index + 1) * n]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}
