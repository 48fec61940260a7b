use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, DynamicImage};
use tracing::info;

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                info!("Running on CPU, to run on GPU(metal), build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                info!("Running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Resizes an image to (width, height) and converts it into a (1, 3, height, width)
/// f32 tensor scaled to [-1, 1], the range the VAE encoder expects.
pub fn image_to_tensor(img: &DynamicImage, width: usize, height: usize) -> Result<Tensor> {
    let img = img
        .resize_exact(width as u32, height as u32, FilterType::CatmullRom)
        .to_rgb8()
        .into_raw();
    let tensor = Tensor::from_vec(img, (height, width, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?;
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn forced_cpu_selects_cpu() {
        let device = select_best_device(DeviceMap::ForceCpu).unwrap();
        assert!(device.is_cpu());
    }

    #[test]
    fn image_to_tensor_resizes_and_scales() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb([255, 255, 255])));
        let tensor = image_to_tensor(&img, 64, 32).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 32, 64]);
        let max = tensor.flatten_all().unwrap().max(0).unwrap().to_scalar::<f32>().unwrap();
        assert!((max - 1.0).abs() < 1e-4);
    }

    #[test]
    fn tensor_to_image_rejects_non_rgb() {
        let tensor = Tensor::zeros((1, 4, 4), DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }

    #[test]
    fn tensor_to_image_keeps_dimensions() {
        let tensor = Tensor::zeros((3, 16, 24), DType::U8, &Device::Cpu).unwrap();
        let img = tensor_to_image(&tensor).unwrap();
        assert_eq!((img.width(), img.height()), (24, 16));
    }
}
