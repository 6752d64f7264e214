//! Model parameters and training results.
//!
//! A [`Model`] is an ordered sequence of parameter [`Tensor`]s. The worker never interprets the
//! parameters beyond what is needed to compute the difference between the global model it
//! received and the model it trained, which is what gets reported to the service.

use std::{iter::FromIterator, slice};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors related to the shape of tensors and models.
pub enum ModelError {
    #[error("tensor of shape {shape:?} requires {expected} values, got {actual}")]
    InvalidTensor {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("tensor of shape {0:?} has more elements than can be addressed")]
    ShapeOverflow(Vec<usize>),
    #[error("models have a different number of tensors: {0} vs {1}")]
    TensorCountMismatch(usize, usize),
    #[error("tensor {index} has shape {left:?} in one model and {right:?} in the other")]
    ShapeMismatch {
        index: usize,
        left: Vec<usize>,
        right: Vec<usize>,
    },
    #[error("failed to encode or decode model: {0}")]
    Encoding(String),
}

/// A dense `f32` tensor in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor.
    ///
    /// # Errors
    /// Fails if the number of values does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(ModelError::InvalidTensor {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a one dimensional tensor.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Create a tensor filled with zeros.
    ///
    /// # Errors
    /// Fails if the number of elements overflows `usize`.
    pub fn zeros(shape: Vec<usize>) -> Result<Self, ModelError> {
        let len = element_count(&shape)?;
        Ok(Self {
            shape,
            data: vec![0.0; len],
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that the tensor's shape and data agree. Deserialized tensors are not validated
    /// on construction so this must be called on anything received from the network.
    pub fn validate(&self) -> Result<(), ModelError> {
        let expected = element_count(&self.shape)?;
        if expected == self.data.len() {
            Ok(())
        } else {
            Err(ModelError::InvalidTensor {
                shape: self.shape.clone(),
                expected,
                actual: self.data.len(),
            })
        }
    }
}

fn element_count(shape: &[usize]) -> Result<usize, ModelError> {
    shape
        .iter()
        .try_fold(1_usize, |n, d| n.checked_mul(*d))
        .ok_or_else(|| ModelError::ShapeOverflow(shape.to_vec()))
}

/// The parameters of a model, as an ordered sequence of tensors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Model(Vec<Tensor>);

impl Model {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.0
    }

    pub fn tensors_mut(&mut self) -> &mut [Tensor] {
        &mut self.0
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.0
    }

    pub fn iter(&self) -> slice::Iter<'_, Tensor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.0.iter().map(Tensor::len).sum()
    }

    /// Check that `other` has the same number of tensors, with the same shapes.
    pub fn check_compatible(&self, other: &Model) -> Result<(), ModelError> {
        if self.len() != other.len() {
            return Err(ModelError::TensorCountMismatch(self.len(), other.len()));
        }
        for (index, (left, right)) in self.iter().zip(other.iter()).enumerate() {
            if left.shape != right.shape {
                return Err(ModelError::ShapeMismatch {
                    index,
                    left: left.shape.clone(),
                    right: right.shape.clone(),
                });
            }
        }
        Ok(())
    }

    /// Compute `self - updated`, tensor by tensor. This is the update a worker reports after
    /// training `updated` from the global model `self`.
    ///
    /// # Errors
    /// Fails if the two models are not compatible.
    pub fn diff(&self, updated: &Model) -> Result<Model, ModelError> {
        self.check_compatible(updated)?;
        let tensors = self
            .iter()
            .zip(updated.iter())
            .map(|(original, updated)| Tensor {
                shape: original.shape.clone(),
                data: original
                    .data
                    .iter()
                    .zip(updated.data.iter())
                    .map(|(o, u)| o - u)
                    .collect(),
            })
            .collect();
        Ok(Model(tensors))
    }

    /// Serialize the model into its wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        bincode::serialize(self).map_err(|e| ModelError::Encoding(e.to_string()))
    }

    /// Deserialize and validate a model from its wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let model: Model =
            bincode::deserialize(bytes).map_err(|e| ModelError::Encoding(e.to_string()))?;
        for tensor in model.iter() {
            tensor.validate()?;
        }
        Ok(model)
    }
}

impl FromIterator<Tensor> for Model {
    fn from_iter<I: IntoIterator<Item = Tensor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Model {
    type Item = &'a Tensor;
    type IntoIter = slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The parameters produced by training a cycle's model locally.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingResult {
    pub parameters: Model,
}

impl TrainingResult {
    pub fn new(parameters: Model) -> Self {
        Self { parameters }
    }
}

impl From<Model> for TrainingResult {
    fn from(parameters: Model) -> Self {
        Self::new(parameters)
    }
}
