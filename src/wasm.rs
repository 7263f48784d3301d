//! WebAssembly bindings for the CTIF converter

use image::DynamicImage;
use wasm_bindgen::prelude::*;

use crate::{ColorspaceKind, Converter, DitherMode, Platform, ResizeMode};

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[wasm_bindgen]
pub struct WasmConverter {
    platform: Platform,
    colorspace: ColorspaceKind,
    optimization_level: u32,
    width: u32,
    height: u32,
    ignore_aspect_ratio: bool,
    fast_resize: bool,
    sampling_resolution: u32,
    dither_mode: DitherMode,
    dither_type: Option<String>,
    dither_level: f32,
    seed: Option<u64>,
}

#[wasm_bindgen]
impl WasmConverter {
    /// Create a converter for a platform name such as `oc-tier3` or `cc`.
    #[wasm_bindgen(constructor)]
    pub fn new(platform: &str) -> Result<WasmConverter, JsValue> {
        Ok(WasmConverter {
            platform: platform.parse().map_err(js_error)?,
            colorspace: ColorspaceKind::default(),
            optimization_level: 1,
            width: 0,
            height: 0,
            ignore_aspect_ratio: false,
            fast_resize: false,
            sampling_resolution: 0,
            dither_mode: DitherMode::default(),
            dither_type: None,
            dither_level: 1.0,
            seed: None,
        })
    }

    #[wasm_bindgen]
    pub fn set_colorspace(&mut self, name: &str) -> Result<(), JsValue> {
        self.colorspace = name.parse().map_err(js_error)?;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn set_optimization_level(&mut self, level: u32) {
        self.optimization_level = level;
    }

    #[wasm_bindgen]
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    #[wasm_bindgen]
    pub fn set_ignore_aspect_ratio(&mut self, enabled: bool) {
        self.ignore_aspect_ratio = enabled;
    }

    #[wasm_bindgen]
    pub fn set_fast_resize(&mut self, enabled: bool) {
        self.fast_resize = enabled;
    }

    #[wasm_bindgen]
    pub fn set_sampling_resolution(&mut self, resolution: u32) {
        self.sampling_resolution = resolution;
    }

    /// `type_name` may be empty for the mode's default kernel.
    #[wasm_bindgen]
    pub fn set_dither(&mut self, mode: &str, type_name: &str, level: f32) -> Result<(), JsValue> {
        self.dither_mode = mode.parse().map_err(js_error)?;
        self.dither_type = (!type_name.is_empty()).then(|| type_name.to_string());
        self.dither_level = level;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn set_seed(&mut self, seed: u32) {
        self.seed = Some(seed as u64);
    }

    /// Convert RGBA pixels. Returns `{ data, preview, width, height }` where
    /// `data` is the CTIF stream and `preview` is RGBA at the output size.
    #[wasm_bindgen]
    pub fn convert(&self, image_data: &[u8], width: u32, height: u32) -> Result<js_sys::Object, JsValue> {
        let img = image::RgbaImage::from_raw(width, height, image_data.to_vec())
            .ok_or_else(|| JsValue::from_str("Invalid image dimensions"))?;
        let dynamic_img = DynamicImage::ImageRgba8(img);

        // no external resampler in the browser
        let resize_mode = if self.fast_resize { ResizeMode::Speed } else { ResizeMode::QualityNative };
        let mut converter = Converter::new(self.platform)
            .with_colorspace(self.colorspace)
            .with_optimization_level(self.optimization_level)
            .with_threads(1)
            .with_size(self.width, self.height)
            .with_ignore_aspect_ratio(self.ignore_aspect_ratio)
            .with_resize_mode(resize_mode)
            .with_sampling_resolution(self.sampling_resolution)
            .with_dither(self.dither_mode, self.dither_type.as_deref(), self.dither_level);
        if let Some(seed) = self.seed {
            converter = converter.with_seed(seed);
        }

        let conversion = converter.convert(&dynamic_img).map_err(js_error)?;
        let (out_w, out_h) = conversion.preview.dimensions();
        let preview = DynamicImage::ImageRgb8(conversion.preview).to_rgba8();

        let result = js_sys::Object::new();
        js_sys::Reflect::set(&result, &"data".into(), &js_sys::Uint8Array::from(&conversion.data[..]))?;
        js_sys::Reflect::set(&result, &"preview".into(), &js_sys::Uint8ClampedArray::from(preview.as_raw().as_slice()))?;
        js_sys::Reflect::set(&result, &"width".into(), &out_w.into())?;
        js_sys::Reflect::set(&result, &"height".into(), &out_h.into())?;

        Ok(result)
    }
}

/// Platform names accepted by [`WasmConverter::new`].
#[wasm_bindgen]
pub fn platforms() -> Vec<String> {
    Platform::ALL.iter().map(|p| p.name().to_string()).collect()
}

/// Dither kernel names accepted by `set_dither`.
#[wasm_bindgen]
pub fn dither_types() -> Vec<String> {
    crate::dither::catalog_names()
}
