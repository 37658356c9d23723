//! Hidden-state adapters for speculative decoding.
//!
//! Draft and target models expose hidden states in their own native layout:
//! Eagle-3 style drafts consume a concatenation of several target layers,
//! some architectures emit pre-norm activations, others post-norm. The
//! rejection-sampling step consumes one shared layout, so every architecture
//! that participates in speculative decoding declares how to get there.
//!
//! An adapter is plain data (a list of [`HiddenStateStep`]s) so it can be
//! declared in a registration table, validated at startup, and compared
//! between architectures before any tensor is touched.

use candle_core::{DType, Tensor, D};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("hidden state width mismatch: expected {expected}, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("invalid adapter step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },
    #[error("adapter produces {produced:?}, but declares {declared:?}")]
    LayoutMismatch {
        produced: SharedLayout,
        declared: SharedLayout,
    },
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Normalization state of a hidden-state vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormConvention {
    /// Raw residual-stream activations.
    None,
    /// Unit root-mean-square along the hidden dimension.
    RmsNorm,
    /// Zero mean, unit variance along the hidden dimension.
    LayerNorm,
}

/// One transform applied along the last (hidden) dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HiddenStateStep {
    Identity,
    /// Keep `len` features starting at `start`.
    Narrow { start: usize, len: usize },
    /// Split the hidden dimension into `chunks` equal parts and average them.
    /// Used to fold concatenated multi-layer states into one layer width.
    ChunkMean { chunks: usize },
    RmsNorm {
        #[serde(default = "default_eps")]
        eps: f64,
    },
    Scale { factor: f64 },
}

fn default_eps() -> f64 {
    1e-6
}

/// Width and normalization the rejection sampler consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedLayout {
    pub width: usize,
    pub norm: NormConvention,
}

/// Declared mapping from an architecture's native hidden states to the
/// shared layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenStateAdapter {
    pub native_width: usize,
    pub native_norm: NormConvention,
    #[serde(default)]
    pub steps: Vec<HiddenStateStep>,
    pub shared: SharedLayout,
}

impl HiddenStateAdapter {
    /// Adapter that passes states through unchanged.
    pub fn identity(width: usize, norm: NormConvention) -> Self {
        Self {
            native_width: width,
            native_norm: norm,
            steps: Vec::new(),
            shared: SharedLayout { width, norm },
        }
    }

    pub fn with_steps(
        native_width: usize,
        native_norm: NormConvention,
        steps: Vec<HiddenStateStep>,
        shared: SharedLayout,
    ) -> Self {
        Self {
            native_width,
            native_norm,
            steps,
            shared,
        }
    }

    /// Hidden size of one model layer as this adapter expects it. States
    /// concatenated from several layers are folded by leading `ChunkMean`
    /// steps, so those divide the native width.
    pub fn layer_width(&self) -> usize {
        let mut width = self.native_width;
        for step in &self.steps {
            match *step {
                HiddenStateStep::Identity => {}
                HiddenStateStep::ChunkMean { chunks } if chunks > 0 => width /= chunks,
                _ => break,
            }
        }
        width
    }

    /// Walk the steps symbolically and return the layout they produce.
    pub fn produced_layout(&self) -> Result<SharedLayout, AdapterError> {
        let mut width = self.native_width;
        let mut norm = self.native_norm;
        if width == 0 {
            return Err(AdapterError::InvalidStep {
                index: 0,
                reason: "native width must be positive".to_string(),
            });
        }
        for (index, step) in self.steps.iter().enumerate() {
            match *step {
                HiddenStateStep::Identity => {}
                HiddenStateStep::Narrow { start, len } => {
                    if len == 0 || start + len > width {
                        return Err(AdapterError::InvalidStep {
                            index,
                            reason: format!("narrow {start}..{} out of width {width}", start + len),
                        });
                    }
                    width = len;
                    norm = NormConvention::None;
                }
                HiddenStateStep::ChunkMean { chunks } => {
                    if chunks == 0 || width % chunks != 0 {
                        return Err(AdapterError::InvalidStep {
                            index,
                            reason: format!("width {width} not divisible into {chunks} chunks"),
                        });
                    }
                    width /= chunks;
                    norm = NormConvention::None;
                }
                HiddenStateStep::RmsNorm { eps } => {
                    if !(eps > 0.0) {
                        return Err(AdapterError::InvalidStep {
                            index,
                            reason: format!("rms_norm eps must be positive, got {eps}"),
                        });
                    }
                    norm = NormConvention::RmsNorm;
                }
                HiddenStateStep::Scale { factor } => {
                    if !factor.is_finite() {
                        return Err(AdapterError::InvalidStep {
                            index,
                            reason: "scale factor must be finite".to_string(),
                        });
                    }
                    if factor != 1.0 {
                        norm = NormConvention::None;
                    }
                }
            }
        }
        Ok(SharedLayout { width, norm })
    }

    /// Check that the steps produce the declared shared layout.
    pub fn validate(&self) -> Result<(), AdapterError> {
        let produced = self.produced_layout()?;
        if produced != self.shared {
            return Err(AdapterError::LayoutMismatch {
                produced,
                declared: self.shared,
            });
        }
        Ok(())
    }

    /// Apply the adapter to `xs`, whose last dimension is the hidden size.
    /// Steps are checked first, so an unvalidated adapter fails with
    /// [`AdapterError::InvalidStep`] instead of reaching the tensor ops.
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor, AdapterError> {
        self.produced_layout()?;
        let actual = xs.dim(D::Minus1)?;
        if actual != self.native_width {
            return Err(AdapterError::WidthMismatch {
                expected: self.native_width,
                actual,
            });
        }
        let mut out = xs.clone();
        for step in &self.steps {
            out = apply_step(&out, step)?;
        }
        Ok(out)
    }
}

fn apply_step(xs: &Tensor, step: &HiddenStateStep) -> Result<Tensor, AdapterError> {
    let out = match *step {
        HiddenStateStep::Identity => xs.clone(),
        HiddenStateStep::Narrow { start, len } => xs.narrow(D::Minus1, start, len)?,
        HiddenStateStep::ChunkMean { chunks } => {
            let dims = xs.dims();
            let width = dims[dims.len() - 1];
            let mut shape = dims[..dims.len() - 1].to_vec();
            shape.push(chunks);
            shape.push(width / chunks);
            let chunk_dim = shape.len() - 2;
            xs.reshape(shape)?.mean(chunk_dim)?
        }
        HiddenStateStep::RmsNorm { eps } => rms_normalize(xs, eps)?,
        HiddenStateStep::Scale { factor } => xs.affine(factor, 0.0)?,
    };
    Ok(out)
}

/// Parameter-free RMS normalization, computed in f32.
fn rms_normalize(xs: &Tensor, eps: f64) -> candle_core::Result<Tensor> {
    let dtype = xs.dtype();
    let x = xs.to_dtype(DType::F32)?;
    let mean_sq = x.sqr()?.mean_keepdim(D::Minus1)?;
    let denom = mean_sq.affine(1.0, eps)?.sqrt()?;
    x.broadcast_div(&denom)?.to_dtype(dtype)
}
