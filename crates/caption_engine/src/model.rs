use candle_core::{Result, Tensor};

/// Per-timestep interface of the attention captioning model.
///
/// The solver drives this contract step by step under teacher forcing; the
/// layers behind it (attention, recurrent cell, projections) are owned by the
/// implementor. All batch-shaped inputs are row-truncatable: the solver passes
/// only the first `n` rows of features/state once the active batch shrinks to
/// `n`, so implementations must not assume a fixed batch size across calls.
///
/// Shapes, for batch size B, spatial locations L, feature width D, hidden H:
/// - features: `[B, L, D]` (raw and normalized)
/// - projected features: `[B, L, P]`
/// - recurrent state: hidden `[B, H]`, cell `[B, H]`
/// - step output: logits `[B, V]`, attention weights `[B, L]`
pub trait CaptionModel {
    /// Normalize raw features once per batch, before projection.
    fn normalize_features(&self, features: &Tensor) -> Result<Tensor>;

    /// Project normalized features into the attention space. Computed once
    /// per batch and reused across timesteps.
    fn project_features(&self, features: &Tensor) -> Result<Tensor>;

    /// Initial recurrent state derived from the normalized features.
    fn initial_state(&self, features: &Tensor) -> Result<(Tensor, Tensor)>;

    /// One recurrent step: consume the ground-truth tokens for this timestep
    /// and produce next-token logits, the attention weight map, and the
    /// updated state.
    #[allow(clippy::type_complexity)]
    fn step(
        &self,
        features: &Tensor,
        features_proj: &Tensor,
        tokens: &Tensor,
        hidden: &Tensor,
        cell: &Tensor,
    ) -> Result<(Tensor, Tensor, (Tensor, Tensor))>;

    /// Number of spatial attention locations L. Used by the coverage
    /// regularizer target `seq_len / L`.
    fn spatial_locations(&self) -> usize;
}
