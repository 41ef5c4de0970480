//! Model catalog, download and storage management

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MurmurError, Result};

const GGML_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";
const TDRZ_BASE_URL: &str = "https://huggingface.co/akashmjn/tinydiarize-whisper.cpp/resolve/main";

/// Base ggml model flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum GgmlModel {
    #[strum(serialize = "tiny")]
    Tiny,
    #[strum(serialize = "tiny.en")]
    TinyEn,
    #[strum(serialize = "base")]
    Base,
    #[strum(serialize = "base.en")]
    BaseEn,
    #[strum(serialize = "small")]
    Small,
    #[strum(serialize = "small.en")]
    SmallEn,
    /// English-only small model with tinydiarize speaker-turn support.
    #[strum(serialize = "small.en-tdrz")]
    SmallEnTdrz,
    #[strum(serialize = "medium")]
    Medium,
    #[strum(serialize = "medium.en")]
    MediumEn,
    #[strum(serialize = "large-v1")]
    LargeV1,
    #[strum(serialize = "large-v2")]
    LargeV2,
    #[strum(serialize = "large-v3")]
    LargeV3,
    #[strum(serialize = "large-v3-turbo")]
    LargeV3Turbo,
}

/// Optional weight quantization, orthogonal to the model flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
pub enum Quantization {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "q5_0")]
    Q5_0,
    #[strum(serialize = "q5_1")]
    Q5_1,
    #[strum(serialize = "q8_0")]
    Q8_0,
}

impl GgmlModel {
    /// On-disk filename, e.g. `ggml-base.en-q5_1.bin`.
    pub fn filename(&self, quant: Quantization) -> String {
        match quant {
            Quantization::None => format!("ggml-{}.bin", self),
            quant => format!("ggml-{}-{}.bin", self, quant),
        }
    }

    /// Download URL on HuggingFace. The tinydiarize flavor lives in its own
    /// repository and ships unquantized.
    pub fn url(&self, quant: Quantization) -> String {
        if *self == GgmlModel::SmallEnTdrz {
            return format!("{}/{}", TDRZ_BASE_URL, self.filename(Quantization::None));
        }
        format!("{}/{}", GGML_BASE_URL, self.filename(quant))
    }

    /// Approximate download size in bytes, for display purposes.
    pub fn approx_size(&self, quant: Quantization) -> u64 {
        let base_mb: u64 = match self {
            GgmlModel::Tiny | GgmlModel::TinyEn => 75,
            GgmlModel::Base | GgmlModel::BaseEn => 142,
            GgmlModel::Small | GgmlModel::SmallEn | GgmlModel::SmallEnTdrz => 466,
            GgmlModel::Medium | GgmlModel::MediumEn => 1500,
            GgmlModel::LargeV1 | GgmlModel::LargeV2 | GgmlModel::LargeV3 => 2900,
            GgmlModel::LargeV3Turbo => 1600,
        };
        let scaled_mb = match quant {
            Quantization::None => base_mb,
            Quantization::Q5_0 | Quantization::Q5_1 => base_mb * 2 / 5,
            Quantization::Q8_0 => base_mb * 11 / 20,
        };
        scaled_mb * 1024 * 1024
    }

    pub fn description(&self) -> &'static str {
        match self {
            GgmlModel::Tiny => "Tiny model, fastest, lowest accuracy",
            GgmlModel::TinyEn => "Tiny English-only model",
            GgmlModel::Base => "Base model, good balance of speed and accuracy",
            GgmlModel::BaseEn => "Base English-only model",
            GgmlModel::Small => "Small model, good accuracy",
            GgmlModel::SmallEn => "Small English-only model",
            GgmlModel::SmallEnTdrz => "Small English-only model with speaker-turn detection",
            GgmlModel::Medium => "Medium model, high accuracy",
            GgmlModel::MediumEn => "Medium English-only model",
            GgmlModel::LargeV1 => "Large v1 model",
            GgmlModel::LargeV2 => "Large v2 model, improved accuracy",
            GgmlModel::LargeV3 => "Large v3 model, most accurate",
            GgmlModel::LargeV3Turbo => "Large v3 Turbo model, faster large model",
        }
    }
}

/// Downloads ggml models into the platform data directory and keeps track of
/// what is available locally.
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("dev.murmur", "", "murmur").ok_or_else(|| {
            MurmurError::Configuration("failed to resolve platform data directories".to_string())
        })?;
        Ok(Self {
            models_dir: project_dirs.data_dir().join("models"),
        })
    }

    /// A manager rooted at an explicit directory instead of the platform
    /// default.
    pub fn with_dir(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn path_for(&self, model: GgmlModel, quant: Quantization) -> PathBuf {
        self.models_dir.join(model.filename(quant))
    }

    pub fn is_downloaded(&self, model: GgmlModel, quant: Quantization) -> bool {
        self.path_for(model, quant).exists()
    }

    async fn ensure_models_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.models_dir).await?;
        Ok(())
    }

    /// Download a model without progress reporting.
    pub async fn download(&self, model: GgmlModel, quant: Quantization) -> Result<PathBuf> {
        self.download_with_progress(model, quant, |_, _| {}).await
    }

    /// Download a model, streaming it to a temporary file that is renamed
    /// into place once complete. `progress` receives
    /// `(downloaded_bytes, total_bytes)` per chunk.
    pub async fn download_with_progress<F>(
        &self,
        model: GgmlModel,
        quant: Quantization,
        mut progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u64, Option<u64>),
    {
        self.ensure_models_dir().await?;

        let model_path = self.path_for(model, quant);
        let url = model.url(quant);
        debug!("downloading model {} from {}", model, url);

        let response = reqwest::get(&url)
            .await
            .map_err(|e| MurmurError::Model(format!("failed to start download: {}", e)))?;
        if !response.status().is_success() {
            return Err(MurmurError::Model(format!(
                "failed to download model {}: HTTP {}",
                model,
                response.status()
            )));
        }

        let total_size = response.content_length();
        let temp_path = model_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;

        use futures_util::StreamExt;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| MurmurError::Model(format!("download interrupted: {}", e)))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total_size);
        }

        file.flush().await?;
        drop(file);
        fs::rename(&temp_path, &model_path).await?;

        info!("downloaded model {} to {:?}", model, model_path);
        Ok(model_path)
    }

    /// Every model flavor/quantization combination present on disk.
    pub fn list_downloaded(&self) -> Vec<(GgmlModel, Quantization)> {
        let mut downloaded = Vec::new();
        for model in GgmlModel::iter() {
            for quant in Quantization::iter() {
                if self.is_downloaded(model, quant) {
                    downloaded.push((model, quant));
                }
            }
        }
        downloaded
    }

    pub async fn delete(&self, model: GgmlModel, quant: Quantization) -> Result<()> {
        let model_path = self.path_for(model, quant);
        if model_path.exists() {
            fs::remove_file(&model_path).await?;
            info!("deleted model {} at {:?}", model, model_path);
        }
        Ok(())
    }

    /// Pick a downloaded model to use when the caller did not name one:
    /// preferred flavors unquantized first, then anything available.
    pub fn find_default(&self) -> Option<PathBuf> {
        const PREFERRED: [GgmlModel; 6] = [
            GgmlModel::Base,
            GgmlModel::BaseEn,
            GgmlModel::Small,
            GgmlModel::SmallEn,
            GgmlModel::Tiny,
            GgmlModel::TinyEn,
        ];

        for model in PREFERRED {
            if self.is_downloaded(model, Quantization::None) {
                return Some(self.path_for(model, Quantization::None));
            }
        }

        self.list_downloaded()
            .first()
            .map(|&(model, quant)| self.path_for(model, quant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn model_names_round_trip_through_strum() {
        assert_eq!(GgmlModel::from_str("base").unwrap(), GgmlModel::Base);
        assert_eq!(GgmlModel::from_str("base.en").unwrap(), GgmlModel::BaseEn);
        assert_eq!(
            GgmlModel::from_str("small.en-tdrz").unwrap(),
            GgmlModel::SmallEnTdrz
        );
        assert!(GgmlModel::from_str("gigantic").is_err());
        assert_eq!(GgmlModel::LargeV3Turbo.to_string(), "large-v3-turbo");
    }

    #[test]
    fn filenames_carry_the_quantization_suffix() {
        assert_eq!(
            GgmlModel::Base.filename(Quantization::None),
            "ggml-base.bin"
        );
        assert_eq!(
            GgmlModel::BaseEn.filename(Quantization::Q5_1),
            "ggml-base.en-q5_1.bin"
        );
    }

    #[test]
    fn tdrz_model_downloads_from_its_own_repository() {
        let url = GgmlModel::SmallEnTdrz.url(Quantization::Q8_0);
        assert!(url.starts_with(TDRZ_BASE_URL));
        assert!(url.ends_with("ggml-small.en-tdrz.bin"));

        let url = GgmlModel::Medium.url(Quantization::Q5_0);
        assert!(url.starts_with(GGML_BASE_URL));
        assert!(url.ends_with("ggml-medium-q5_0.bin"));
    }

    #[test]
    fn default_pick_prefers_base_flavors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path());
        assert!(manager.find_default().is_none());

        std::fs::write(
            manager.path_for(GgmlModel::Tiny, Quantization::None),
            b"stub",
        )
        .unwrap();
        std::fs::write(
            manager.path_for(GgmlModel::Base, Quantization::None),
            b"stub",
        )
        .unwrap();

        let picked = manager.find_default().unwrap();
        assert_eq!(picked, manager.path_for(GgmlModel::Base, Quantization::None));
    }

    #[test]
    fn list_downloaded_reports_flavor_and_quantization() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path());
        std::fs::write(
            manager.path_for(GgmlModel::Small, Quantization::Q8_0),
            b"stub",
        )
        .unwrap();

        let downloaded = manager.list_downloaded();
        assert_eq!(downloaded, vec![(GgmlModel::Small, Quantization::Q8_0)]);
    }
}
