use anyhow::Result;
use floorcast_core::{DeviceKind, ModelLike};
use std::{future::Future, sync::Arc};
use tokio::sync::OnceCell;

use crate::styles::StyleCatalog;

/// Lazily initialized, process-wide model.
///
/// Set at most once and read-only afterwards; the model is released when the
/// last clone is dropped.
#[derive(Clone, Default)]
pub struct ModelHandle {
    inner: Arc<OnceCell<Arc<dyn ModelLike>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is already loaded with `model`.
    pub fn loaded(model: Arc<dyn ModelLike>) -> Self {
        Self {
            inner: Arc::new(OnceCell::new_with(Some(model))),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn ModelLike>> {
        self.inner.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.initialized()
    }

    /// Runs `init` unless a model is already present. A failed `init` leaves
    /// the handle empty.
    pub async fn load_with<F, Fut>(&self, init: F) -> Result<Arc<dyn ModelLike>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn ModelLike>>>,
    {
        self.inner.get_or_try_init(init).await.cloned()
    }
}

/// Fixed inference parameters, set at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceSettings {
    pub steps: usize,
    pub guidance_scale: f64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            steps: 20,
            guidance_scale: 7.5,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub model: ModelHandle,
    pub device: DeviceKind,
    pub settings: InferenceSettings,
    pub styles: Arc<StyleCatalog>,
}

impl AppState {
    /// State with an empty style catalog.
    pub fn new(model: ModelHandle, device: DeviceKind, settings: InferenceSettings) -> Self {
        Self {
            model,
            device,
            settings,
            styles: Arc::new(StyleCatalog::new()),
        }
    }

    pub fn with_styles(mut self, styles: StyleCatalog) -> Self {
        self.styles = Arc::new(styles);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floorcast_core::InferenceRequest;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Blank;

    impl ModelLike for Blank {
        fn run(&self, _request: InferenceRequest) -> Result<DynamicImage> {
            Ok(DynamicImage::new_rgb8(1, 1))
        }
    }

    #[tokio::test]
    async fn starts_empty() {
        let handle = ModelHandle::new();
        assert!(!handle.is_loaded());
        assert!(handle.get().is_none());
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let handle = ModelHandle::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            handle
                .load_with(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Blank) as Arc<dyn ModelLike>)
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn failed_load_leaves_handle_empty() {
        let handle = ModelHandle::new();
        let result = handle
            .load_with(|| async { Err(anyhow::anyhow!("weights unavailable")) })
            .await;
        assert!(result.is_err());
        assert!(!handle.is_loaded());

        handle
            .load_with(|| async { Ok(Arc::new(Blank) as Arc<dyn ModelLike>) })
            .await
            .unwrap();
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn clones_share_the_model() {
        let handle = ModelHandle::new();
        let clone = handle.clone();
        handle
            .load_with(|| async { Ok(Arc::new(Blank) as Arc<dyn ModelLike>) })
            .await
            .unwrap();
        assert!(clone.is_loaded());
    }
}
