//! Model acquisition, warm-up and the inference seam.
//!
//! [`ModelLoader`] turns a [`ModelSource`] into a ready [`ModelHandle`]: remote
//! artifacts are fetched once into a local cache, the backend is constructed
//! from the cached file, and a single warm-up pass forces the backend to
//! allocate its working memory before the real-time loop starts. A failed load
//! leaves the loader in [`ModelStatus::Unavailable`] and is never retried
//! implicitly.

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::tensor::{HostTensor, TensorError, TensorLedger};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference backend failed: {0}")]
    Backend(String),
    #[error("backend expects input shape {expected:?}, got {actual:?}")]
    InputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// One forward pass of the detection network.
///
/// Implementations receive a `[1, S, S, 3]` input and return the raw
/// `[1, 4 + C, N]` output leased from `ledger`. Any device-side buffers must
/// be dropped before `forward` returns.
pub trait InferenceBackend: Send {
    fn forward(
        &mut self,
        input: &HostTensor,
        ledger: &Arc<TensorLedger>,
    ) -> Result<HostTensor, InferenceError>;

    /// Short description used in log lines.
    fn describe(&self) -> String {
        "inference backend".to_string()
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn forward(
        &mut self,
        input: &HostTensor,
        ledger: &Arc<TensorLedger>,
    ) -> Result<HostTensor, InferenceError> {
        (**self).forward(input, ledger)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Remote(String),
    Local(PathBuf),
}

impl FromStr for ModelSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(ModelSource::Remote(s.to_string()))
        } else if let Some(path) = s.strip_prefix("file://") {
            Ok(ModelSource::Local(PathBuf::from(path)))
        } else {
            Ok(ModelSource::Local(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Remote(url) => f.write_str(url),
            ModelSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to download model from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("model server responded with {status} for {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("model artifact {0} does not exist")]
    Missing(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load model graph: {0}")]
    Parse(String),
    #[error("warm-up inference failed: {0}")]
    WarmUp(#[source] InferenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Idle,
    Loading,
    Ready,
    /// Terminal: the recognition loop must not start.
    Unavailable(String),
}

/// Loaded, warmed-up network owned by the recognition loop.
pub struct ModelHandle<B: InferenceBackend> {
    backend: B,
    source: ModelSource,
    input_size: u32,
}

impl<B: InferenceBackend> ModelHandle<B> {
    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn forward(
        &mut self,
        input: &HostTensor,
        ledger: &Arc<TensorLedger>,
    ) -> Result<HostTensor, InferenceError> {
        self.backend.forward(input, ledger)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tear the model down. Dropping the handle has the same effect.
    pub fn release(self) {
        drop(self);
    }
}

impl<B: InferenceBackend> Drop for ModelHandle<B> {
    fn drop(&mut self) {
        info!("Released model {} ({})", self.source, self.backend.describe());
    }
}

pub struct ModelLoader {
    cache_dir: PathBuf,
    status: ModelStatus,
}

impl ModelLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            status: ModelStatus::Idle,
        }
    }

    /// `<user cache dir>/signcam/models`, falling back to the temp dir.
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("signcam")
            .join("models")
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache location used for a remote artifact.
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let extension = url
            .rsplit('/')
            .next()
            .and_then(|name| name.split(['?', '#']).next())
            .and_then(|name| Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        self.cache_dir.join(format!("{}{extension}", &digest[..24]))
    }

    /// Resolve `source` to a local file, downloading it when not yet cached.
    pub fn resolve(&self, source: &ModelSource) -> Result<PathBuf, ModelError> {
        match source {
            ModelSource::Local(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(ModelError::Missing(path.clone()))
                }
            }
            ModelSource::Remote(url) => {
                let target = self.cached_path(url);
                if target.is_file() {
                    debug!("Using cached model {} for {url}", target.display());
                    return Ok(target);
                }
                download(url, &target)?;
                Ok(target)
            }
        }
    }

    /// Resolve, construct and warm up a model.
    ///
    /// `build` constructs the backend from the resolved artifact path.
    pub fn load<B, F>(
        &mut self,
        source: &ModelSource,
        input_size: u32,
        ledger: &Arc<TensorLedger>,
        build: F,
    ) -> Result<ModelHandle<B>, ModelError>
    where
        B: InferenceBackend,
        F: FnOnce(&Path) -> Result<B, ModelError>,
    {
        let span = tracing::info_span!("model.load", source = %source, input_size);
        let _guard = span.enter();
        self.status = ModelStatus::Loading;
        let started = Instant::now();

        let result = self.resolve(source).and_then(|path| {
            let mut backend = build(&path)?;
            warm_up(&mut backend, input_size, ledger)?;
            Ok(backend)
        });

        match result {
            Ok(backend) => {
                info!(
                    "Model ready: {} in {:.2}s",
                    backend.describe(),
                    started.elapsed().as_secs_f32()
                );
                self.status = ModelStatus::Ready;
                Ok(ModelHandle {
                    backend,
                    source: source.clone(),
                    input_size,
                })
            }
            Err(err) => {
                error!("Model unavailable: {err}");
                self.status = ModelStatus::Unavailable(err.to_string());
                Err(err)
            }
        }
    }
}

/// Run one throw-away inference so lazy allocations happen before the loop.
fn warm_up<B: InferenceBackend>(
    backend: &mut B,
    input_size: u32,
    ledger: &Arc<TensorLedger>,
) -> Result<(), ModelError> {
    let s = input_size as usize;
    let input = ledger.zeros(vec![1, s, s, 3]);
    let output = backend.forward(&input, ledger).map_err(ModelError::WarmUp)?;
    debug!("Warm-up output shape {:?}", output.shape());
    Ok(())
}

fn download(url: &str, target: &Path) -> Result<(), ModelError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ModelError::Io { path, source }
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    info!("Downloading model from {url}");
    let download_err = |source| ModelError::Download {
        url: url.to_string(),
        source,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(download_err)?;
    let response = client.get(url).send().map_err(download_err)?;
    if !response.status().is_success() {
        return Err(ModelError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let bytes = response.bytes().map_err(download_err)?;

    let partial = target.with_extension("part");
    let mut file = fs::File::create(&partial).map_err(io_err(&partial))?;
    file.write_all(&bytes).map_err(io_err(&partial))?;
    file.sync_all().map_err(io_err(&partial))?;
    fs::rename(&partial, target).map_err(io_err(target))?;
    info!("Cached {} bytes at {}", bytes.len(), target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingBackend {
        calls: usize,
        fail: bool,
    }

    impl InferenceBackend for CountingBackend {
        fn forward(
            &mut self,
            input: &HostTensor,
            ledger: &Arc<TensorLedger>,
        ) -> Result<HostTensor, InferenceError> {
            self.calls += 1;
            assert_eq!(input.shape().len(), 4);
            if self.fail {
                return Err(InferenceError::Backend("boom".into()));
            }
            Ok(ledger.zeros(vec![1, 5, 2]))
        }
    }

    fn model_file(dir: &Path) -> PathBuf {
        let path = dir.join("hands.pt");
        fs::write(&path, b"graph").unwrap();
        path
    }

    #[test]
    fn source_parsing() {
        assert_eq!(
            "https://x.test/m.pt".parse::<ModelSource>().unwrap(),
            ModelSource::Remote("https://x.test/m.pt".into())
        );
        assert_eq!(
            "file:///tmp/m.pt".parse::<ModelSource>().unwrap(),
            ModelSource::Local(PathBuf::from("/tmp/m.pt"))
        );
    }

    #[test]
    fn load_runs_exactly_one_warm_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_file(dir.path());
        let ledger = TensorLedger::new();
        let mut loader = ModelLoader::new(dir.path().join("cache"));
        let handle = loader
            .load(&ModelSource::Local(path), 8, &ledger, |_| {
                Ok(CountingBackend {
                    calls: 0,
                    fail: false,
                })
            })
            .unwrap();
        assert_eq!(handle.backend().calls, 1);
        assert_eq!(loader.status(), &ModelStatus::Ready);
        assert_eq!(ledger.snapshot().live(), 0);
    }

    #[test]
    fn missing_artifact_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TensorLedger::new();
        let mut loader = ModelLoader::new(dir.path());
        let mut built = false;
        let result = loader.load(
            &ModelSource::Local(dir.path().join("nope.pt")),
            8,
            &ledger,
            |_| {
                built = true;
                Ok(CountingBackend {
                    calls: 0,
                    fail: false,
                })
            },
        );
        assert!(matches!(result, Err(ModelError::Missing(_))));
        assert!(!built);
        assert!(matches!(loader.status(), ModelStatus::Unavailable(_)));
    }

    #[test]
    fn warm_up_failure_marks_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_file(dir.path());
        let ledger = TensorLedger::new();
        let mut loader = ModelLoader::new(dir.path());
        let result = loader.load(&ModelSource::Local(path), 8, &ledger, |_| {
            Ok(CountingBackend {
                calls: 0,
                fail: true,
            })
        });
        assert!(matches!(result, Err(ModelError::WarmUp(_))));
        assert!(matches!(loader.status(), ModelStatus::Unavailable(_)));
        assert_eq!(ledger.snapshot().live(), 0);
    }

    #[test]
    fn cached_remote_artifact_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModelLoader::new(dir.path());
        let url = "https://models.invalid/hands/best.pt?v=3";
        let cached = loader.cached_path(url);
        assert_eq!(cached.extension().unwrap(), "pt");
        fs::write(&cached, b"graph").unwrap();
        let resolved = loader
            .resolve(&ModelSource::Remote(url.to_string()))
            .unwrap();
        assert_eq!(resolved, cached);
    }

    #[test]
    fn unreachable_remote_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModelLoader::new(dir.path());
        let err = loader
            .resolve(&ModelSource::Remote("http://127.0.0.1:9/model.pt".into()))
            .unwrap_err();
        assert!(matches!(err, ModelError::Download { .. }));
        assert!(!loader.cached_path("http://127.0.0.1:9/model.pt").exists());
    }
}
