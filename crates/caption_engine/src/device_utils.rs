use anyhow::Result;
use candle_core::Device;

/// Resolve a configured compute-device identifier.
///
/// Accepts `cpu` or `cuda:N`. A CUDA request on a host without CUDA support
/// falls back to CPU with a warning rather than failing the run.
pub fn parse_device(spec: &str) -> Result<Device> {
    if spec == "cpu" {
        return Ok(Device::Cpu);
    }
    if let Some(ordinal) = spec.strip_prefix("cuda:") {
        let ordinal: usize = ordinal
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid device ordinal in '{}'", spec))?;
        return Ok(match Device::new_cuda(ordinal) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("cuda:{} unavailable ({}), falling back to CPU", ordinal, e);
                Device::Cpu
            }
        });
    }
    anyhow::bail!("unrecognized device '{}', expected 'cpu' or 'cuda:N'", spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu() {
        assert!(matches!(parse_device("cpu").unwrap(), Device::Cpu));
    }

    #[test]
    fn rejects_unknown_spec() {
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());
    }
}
