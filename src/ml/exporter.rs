// ============================================================
// Layer 5 — Exporter
// ============================================================
// Rebuilds a model from a run directory's config.json and
// re-serialises it, optionally with the weights of the latest
// checkpoint inlined as `params`.
//
// Building the model (rather than copying config.json) means
// an export only succeeds for documents this build can load.
// Export never needs a GPU, so it runs on the NdArray backend.

use anyhow::{bail, Result};

use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{BasecallModel, ModelConfig};

type ExportBackend = burn::backend::NdArray;

pub fn export_model(ckpt_manager: &CheckpointManager, include_weights: bool) -> Result<ModelConfig> {
    let device = Default::default();
    let cfg    = ckpt_manager.load_config()?;
    let mut model: BasecallModel<ExportBackend> = cfg.init(&device)?;

    if include_weights {
        let epoch = ckpt_manager.latest_epoch();
        if epoch == 0 {
            bail!("No checkpoints in '{}' to export weights from", ckpt_manager.dir().display());
        }
        model = ckpt_manager.load_and_align(epoch, model, &device)?;
        tracing::info!("Exporting weights from epoch {}", epoch);
    }

    let mut exported = model.to_config(include_weights)?;
    exported.extra = cfg.extra;
    Ok(exported)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    use crate::domain::alphabet::Alphabet;
    use crate::ml::model::HeadConfig;

    fn write_run(dir: &std::path::Path) -> (CheckpointManager, ModelConfig) {
        let mut extra = Map::new();
        extra.insert("training".into(), json!({ "epochs": 1 }));
        let cfg = ModelConfig {
            model:   HeadConfig::Ctc,
            labels:  Alphabet::default(),
            encoder: json!({
                "type": "serial",
                "sublayers": [
                    { "type": "convolution", "insize": 1, "size": 5, "winlen": 3, "padding": 1 },
                    { "type": "permute", "dims": [2, 0, 1] }
                ]
            }),
            extra,
        };
        let manager = CheckpointManager::new(dir);
        manager.save_config(&cfg).unwrap();
        (manager, cfg)
    }

    #[test]
    fn test_export_structure_only() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _) = write_run(dir.path());
        let exported = export_model(&manager, false).unwrap();
        assert!(exported.encoder["sublayers"][0].get("params").is_none());
        assert_eq!(exported.extra["training"]["epochs"], 1);
    }

    #[test]
    fn test_export_with_weights_uses_latest_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, cfg) = write_run(dir.path());
        assert!(export_model(&manager, true).is_err());

        let device = Default::default();
        let model: BasecallModel<ExportBackend> = cfg.init(&device).unwrap();
        manager.save(&model, 2).unwrap();

        let exported = export_model(&manager, true).unwrap();
        let conv = &exported.encoder["sublayers"][0];
        assert_eq!(conv["params"]["W"].as_array().map(Vec::len), Some(5));
        let expected = model.export_params().unwrap();
        let w = crate::ml::params::ParamTensor::from_json(&conv["params"]["W"]).unwrap();
        assert_eq!(Some(&w), expected.get("encoder.0.W"));
    }
}
