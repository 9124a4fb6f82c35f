//! Optimizers with durable moment state.
//!
//! candle-nn's bundled optimizers keep their moments private, which makes
//! exact training resumption impossible; these implementations hold every
//! moment in a dedicated `VarMap` so checkpoints round-trip bit-identically
//! through safetensors. Moments are named after the parameter they belong to
//! (`exp_avg.{param}` / `exp_avg_sq.{param}`), so restoring is keyed by name
//! and independent of parameter enumeration order.

use std::path::Path;

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{DType, Var};
use candle_nn::{Init, VarMap};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use caption_engine::SolverError;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const RMSPROP_ALPHA: f64 = 0.99;
const RMSPROP_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Rmsprop,
}

impl OptimizerKind {
    /// Parse a configured update-rule name. Unsupported names are a fatal
    /// config error.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "adam" => Ok(Self::Adam),
            "rmsprop" => Ok(Self::Rmsprop),
            other => {
                Err(SolverError::Config(format!("unsupported optimizer '{}'", other)).into())
            }
        }
    }
}

/// Adam / RMSprop over a model's parameter `VarMap`.
///
/// The bias-correction step counter is serialized with the checkpoint
/// metadata, not with the moment tensors.
pub struct SolverOptimizer {
    kind: OptimizerKind,
    vars: Vec<Var>,
    state: VarMap,
    /// First moments; empty for RMSprop.
    exp_avg: Vec<Var>,
    /// Second moments (Adam) / running squared average (RMSprop).
    exp_avg_sq: Vec<Var>,
    lr: f64,
    steps: usize,
}

impl SolverOptimizer {
    pub fn new(kind: OptimizerKind, params: &VarMap, lr: f64) -> Result<Self> {
        // Stable parameter order regardless of map iteration order.
        let mut named: Vec<(String, Var)> = {
            let data = params.data().lock().expect("Failed to lock VarMap");
            data.iter().map(|(n, v)| (n.clone(), v.clone())).collect()
        };
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let state = VarMap::new();
        let mut exp_avg = Vec::new();
        let mut exp_avg_sq = Vec::new();
        for (name, var) in &named {
            if kind == OptimizerKind::Adam {
                exp_avg.push(state_var(&state, &format!("exp_avg.{}", name), var)?);
            }
            exp_avg_sq.push(state_var(&state, &format!("exp_avg_sq.{}", name), var)?);
        }
        Ok(Self {
            kind,
            vars: named.into_iter().map(|(_, v)| v).collect(),
            state,
            exp_avg,
            exp_avg_sq,
            lr,
            steps: 0,
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Restore the bias-correction counter when resuming from a checkpoint.
    pub fn set_steps(&mut self, steps: usize) {
        self.steps = steps;
    }

    /// Apply one update from the gradients of a backward pass.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.steps += 1;
        match self.kind {
            OptimizerKind::Adam => self.step_adam(grads),
            OptimizerKind::Rmsprop => self.step_rmsprop(grads),
        }
    }

    fn step_adam(&mut self, grads: &GradStore) -> Result<()> {
        let t = self.steps as f64;
        let bias1 = 1.0 - ADAM_BETA1.powf(t);
        let bias2 = 1.0 - ADAM_BETA2.powf(t);
        for ((var, m), v) in self.vars.iter().zip(&self.exp_avg).zip(&self.exp_avg_sq) {
            if let Some(grad) = grads.get(var) {
                let next_m = ((m.as_tensor() * ADAM_BETA1)? + (grad * (1.0 - ADAM_BETA1))?)?;
                let next_v =
                    ((v.as_tensor() * ADAM_BETA2)? + (grad.sqr()? * (1.0 - ADAM_BETA2))?)?;
                m.set(&next_m)?;
                v.set(&next_v)?;

                let m_hat = (next_m / bias1)?;
                let v_hat = (next_v / bias2)?;
                let update = (m_hat * self.lr)?.div(&(v_hat.sqrt()? + ADAM_EPS)?)?;
                var.set(&(var.as_tensor() - update)?)?;
            }
        }
        Ok(())
    }

    fn step_rmsprop(&mut self, grads: &GradStore) -> Result<()> {
        for (var, sq) in self.vars.iter().zip(&self.exp_avg_sq) {
            if let Some(grad) = grads.get(var) {
                let next_sq =
                    ((sq.as_tensor() * RMSPROP_ALPHA)? + (grad.sqr()? * (1.0 - RMSPROP_ALPHA))?)?;
                sq.set(&next_sq)?;

                let update = (grad * self.lr)?.div(&(next_sq.sqrt()? + RMSPROP_EPS)?)?;
                var.set(&(var.as_tensor() - update)?)?;
            }
        }
        Ok(())
    }

    /// Persist every moment tensor as safetensors.
    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.state.save(path.as_ref())?;
        Ok(())
    }

    /// Restore moment tensors in place, keyed by name. Missing names or
    /// shape mismatches fail hard.
    pub fn load_state<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.state.load(path.as_ref())?;
        Ok(())
    }
}

fn state_var(state: &VarMap, name: &str, like: &Var) -> Result<Var> {
    state.get(
        like.dims(),
        name,
        Init::Const(0.0),
        DType::F32,
        like.device(),
    )?;
    let data = state.data().lock().expect("Failed to lock VarMap");
    Ok(data
        .get(name)
        .expect("state var was just inserted")
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn param_map(name: &str, values: &[f32]) -> (VarMap, Var) {
        let varmap = VarMap::new();
        varmap
            .get(values.len(), name, Init::Const(0.0), DType::F32, &Device::Cpu)
            .unwrap();
        let var = varmap
            .data()
            .lock()
            .unwrap()
            .get(name)
            .unwrap()
            .clone();
        var.set(&Tensor::new(values, &Device::Cpu).unwrap()).unwrap();
        (varmap, var)
    }

    fn quadratic_grads(var: &Var) -> GradStore {
        // loss = sum(x^2), dloss/dx = 2x
        let loss = var.as_tensor().sqr().unwrap().sum_all().unwrap();
        loss.backward().unwrap()
    }

    #[test]
    fn parse_rejects_unknown_rule() {
        assert_eq!(OptimizerKind::parse("adam").unwrap(), OptimizerKind::Adam);
        assert_eq!(OptimizerKind::parse("rmsprop").unwrap(), OptimizerKind::Rmsprop);
        let err = OptimizerKind::parse("sgd").unwrap_err();
        assert!(err.to_string().contains("unsupported optimizer"));
    }

    #[test]
    fn adam_moves_parameters_against_gradient() -> Result<()> {
        let (varmap, var) = param_map("w", &[1.0, -2.0]);
        let mut opt = SolverOptimizer::new(OptimizerKind::Adam, &varmap, 0.1)?;

        opt.step(&quadratic_grads(&var))?;
        let values = var.as_tensor().to_vec1::<f32>()?;
        assert!(values[0] < 1.0);
        assert!(values[1] > -2.0);
        assert_eq!(opt.steps(), 1);
        Ok(())
    }

    #[test]
    fn rmsprop_moves_parameters_against_gradient() -> Result<()> {
        let (varmap, var) = param_map("w", &[0.5, -0.5]);
        let mut opt = SolverOptimizer::new(OptimizerKind::Rmsprop, &varmap, 0.01)?;

        opt.step(&quadratic_grads(&var))?;
        let values = var.as_tensor().to_vec1::<f32>()?;
        assert!(values[0] < 0.5);
        assert!(values[1] > -0.5);
        Ok(())
    }

    #[test]
    fn moment_state_roundtrips_through_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("optim.safetensors");

        let (varmap, var) = param_map("w", &[1.0, 2.0, 3.0]);
        let mut opt = SolverOptimizer::new(OptimizerKind::Adam, &varmap, 0.05)?;
        opt.step(&quadratic_grads(&var))?;
        opt.step(&quadratic_grads(&var))?;
        opt.save_state(&path)?;

        let expected_m = opt.exp_avg[0].as_tensor().to_vec1::<f32>()?;
        let expected_v = opt.exp_avg_sq[0].as_tensor().to_vec1::<f32>()?;

        let (fresh_map, _fresh_var) = param_map("w", &[1.0, 2.0, 3.0]);
        let mut restored = SolverOptimizer::new(OptimizerKind::Adam, &fresh_map, 0.05)?;
        restored.load_state(&path)?;
        restored.set_steps(opt.steps());

        assert_eq!(restored.exp_avg[0].as_tensor().to_vec1::<f32>()?, expected_m);
        assert_eq!(restored.exp_avg_sq[0].as_tensor().to_vec1::<f32>()?, expected_v);
        assert_eq!(restored.steps(), 2);
        Ok(())
    }
}
