use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike, ModelVariant};

/// Options shared by every loader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    pub device_map: DeviceMap,
    /// Output width in pixels, a multiple of 8.
    pub width: usize,
    /// Output height in pixels, a multiple of 8.
    pub height: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            device_map: DeviceMap::default(),
            width: 512,
            height: 512,
        }
    }
}

pub trait Loader {
    type Model: ModelLike;

    /// Fetches `repo_id` from the hub and builds the model on the mapped device.
    fn load(
        repo_id: String,
        variant: ModelVariant,
        api: Api,
        options: LoadOptions,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
