//! Integration Tests
//!
//! End-to-end tests for the restoration pipeline: dispatcher, weight cache
//! and mock engine backend.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::ImageFormat;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use revivia::dispatch::{DEFAULT_ENGINE_CACHE_CAPACITY, MAX_OUTPUT_PIXELS};
use revivia::engine::FaceBox;
use revivia::imaging::{decode_image, encode_image};
use revivia::weights::{FetchError, WeightFetcher, FACE_WEIGHTS_URL};
use revivia::{
    Dispatcher, InferenceOptions, InferenceRequest, MockBackend, ModelFamily, ModelId, PixelBuffer,
    PixelLayout, RevivError, WeightCache,
};

/// Fetcher that writes the URL as the file body and remembers every call
#[derive(Default)]
struct RecordingFetcher {
    urls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    fail: bool,
}

impl RecordingFetcher {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

impl WeightFetcher for RecordingFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail {
            return Err(FetchError::Timeout(Duration::from_secs(600)));
        }
        std::fs::write(dest, url.as_bytes())?;
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    weights_dir: PathBuf,
    fetcher: Arc<RecordingFetcher>,
    backend: Arc<MockBackend>,
    dispatcher: Dispatcher,
}

fn harness_with(fetcher: RecordingFetcher, backend: MockBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let weights_dir = dir.path().join("realesrgan_weights");
    let fetcher = Arc::new(fetcher);
    let backend = Arc::new(backend);
    let dispatcher = Dispatcher::new(WeightCache::new(&weights_dir, fetcher.clone()), backend.clone());
    Harness {
        _dir: dir,
        weights_dir,
        fetcher,
        backend,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(RecordingFetcher::default(), MockBackend::new())
}

/// Deterministic test photo
fn photo(width: u32, height: u32, layout: PixelLayout) -> PixelBuffer {
    PixelBuffer::from_fn(width, height, layout, |x, y| {
        [(x * 17 % 256) as u8, (y * 31 % 256) as u8, ((x ^ y) * 5 % 256) as u8, (255 - x % 256) as u8]
    })
}

// === Dispatch Tests ===

#[test]
fn test_x2_model_doubles_dimensions() {
    let h = harness();
    let request = InferenceRequest::new("RealESRGAN_x2plus", photo(64, 48, PixelLayout::Rgb)).with_outscale(2.0);
    let restored = h.dispatcher.restore(request).unwrap();

    assert_eq!(restored.image.dimensions(), (128, 96));
    assert_eq!(restored.model, ModelId::RealEsrganX2Plus);
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h.weights_dir.join("RealESRGAN_x2plus.pth").is_file());
}

#[test]
fn test_default_outscale_on_x2_model_resamples_to_x4() {
    let h = harness();
    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x2plus", photo(10, 6, PixelLayout::Rgb)))
        .unwrap();
    assert_eq!(restored.image.dimensions(), (40, 24));
    assert_eq!(restored.outscale, 4.0);
}

#[test]
fn test_unknown_model_touches_nothing() {
    let h = harness();
    let err = h
        .dispatcher
        .restore(InferenceRequest::new("unknown-model-xyz", photo(8, 8, PixelLayout::Rgb)))
        .unwrap_err();

    assert_eq!(err.error_code(), "UNKNOWN_MODEL");
    assert_eq!(h.fetcher.calls(), 0);
    assert!(!h.weights_dir.exists());
    assert_eq!(h.backend.networks_built(), 0);
}

#[test]
fn test_invalid_options_rejected_before_download() {
    let h = harness();
    let request = InferenceRequest::new("realesr-general-x4v3", photo(8, 8, PixelLayout::Rgb)).with_denoise_strength(1.5);
    let err = h.dispatcher.restore(request).unwrap_err();

    assert!(matches!(err, RevivError::InvalidParameter { .. }));
    assert_eq!(h.fetcher.calls(), 0);
}

#[test]
fn test_oversized_outscale_is_rejected_not_allocated() {
    let h = harness();
    let request = InferenceRequest::new("RealESRGAN_x4plus", photo(4, 4, PixelLayout::Rgb)).with_outscale(1.0e12);
    let err = h.dispatcher.restore(request).unwrap_err();

    match &err {
        RevivError::InvalidParameter { param, expected, .. } => {
            assert_eq!(param, "outscale");
            assert!(expected.contains(&MAX_OUTPUT_PIXELS.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.backend.networks_built(), 0);
}

#[test]
fn test_bsrgan_family_not_implemented() {
    let h = harness();
    let request = InferenceRequest::new("BSRGAN", photo(8, 8, PixelLayout::Rgb)).with_family(ModelFamily::Bsrgan);
    let err = h.dispatcher.restore(request).unwrap_err();

    assert_eq!(err.error_code(), "NOT_IMPLEMENTED");
    assert_eq!(h.fetcher.calls(), 0);
}

// === Weight Cache Tests ===

#[test]
fn test_cached_weights_are_not_fetched() {
    let h = harness();
    std::fs::create_dir_all(&h.weights_dir).unwrap();
    std::fs::write(h.weights_dir.join("RealESRGAN_x4plus.pth"), b"placed by hand").unwrap();

    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
        .unwrap();
    assert_eq!(restored.image.dimensions(), (32, 32));
    assert_eq!(h.fetcher.calls(), 0);
}

#[test]
fn test_full_denoise_strength_uses_single_file() {
    let h = harness();
    let request = InferenceRequest::new("realesr-general-x4v3", photo(8, 8, PixelLayout::Rgb)).with_denoise_strength(1.0);
    h.dispatcher.restore(request).unwrap();

    let urls = h.fetcher.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("/realesr-general-x4v3.pth"));
}

#[test]
fn test_partial_denoise_strength_blends_companion() {
    let h = harness();
    let request = InferenceRequest::new("realesr-general-x4v3", photo(8, 8, PixelLayout::Rgb)).with_denoise_strength(0.3);
    h.dispatcher.restore(request).unwrap();

    let urls = h.fetcher.urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[1].ends_with("/realesr-general-wdn-x4v3.pth"));

    let descriptor = revivia::describe("realesr-general-x4v3").unwrap();
    let resolved = h.dispatcher.weights().resolve(descriptor, None, 0.3).unwrap();
    let [a, b] = resolved.blend.unwrap();
    approx::assert_relative_eq!(a, 0.3);
    approx::assert_relative_eq!(b, 0.7);
    assert_eq!(h.fetcher.calls(), 2);
}

#[test]
fn test_concurrent_requests_download_once() {
    let h = harness_with(RecordingFetcher::slow(Duration::from_millis(50)), MockBackend::new());
    let dispatcher = Arc::new(h.dispatcher);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                dispatcher
                    .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
                    .map(|r| r.image.dimensions())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), (32, 32));
    }
    assert_eq!(h.fetcher.calls(), 1);
}

#[test]
fn test_corrupted_download_is_refetched() {
    let h = harness();
    h.dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
        .unwrap();
    std::fs::write(h.weights_dir.join("RealESRGAN_x4plus.pth"), b"truncated").unwrap();

    // A fresh process: nothing verified yet
    let dispatcher = Dispatcher::new(WeightCache::new(&h.weights_dir, h.fetcher.clone()), h.backend.clone());
    dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
        .unwrap();
    assert_eq!(h.fetcher.calls(), 2);
}

#[test]
fn test_missing_model_path_is_weights_unavailable() {
    let h = harness();
    let missing = h.weights_dir.join("custom/RealESRGAN_x4plus.pth");
    let request = InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)).with_model_path(&missing);
    let err = h.dispatcher.restore(request).unwrap_err();

    assert_eq!(err.error_code(), "WEIGHTS_UNAVAILABLE");
    assert_eq!(h.fetcher.calls(), 0);
    assert_eq!(h.backend.networks_built(), 0);
}

#[test]
fn test_unreachable_sources_are_weights_unavailable() {
    let h = harness_with(RecordingFetcher::failing(), MockBackend::new());
    let err = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRNet_x4plus", photo(8, 8, PixelLayout::Rgb)))
        .unwrap_err();

    match &err {
        RevivError::WeightsUnavailable { model, attempts } => {
            assert_eq!(model, "RealESRNet_x4plus");
            assert_eq!(attempts.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
}

// === Engine Tests ===

#[test]
fn test_engine_cache_reuses_networks() {
    let h = harness();
    for _ in 0..3 {
        h.dispatcher
            .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
            .unwrap();
    }
    assert_eq!(h.backend.networks_built(), 1);
    assert_eq!(h.dispatcher.cached_engines(), 1);

    // Different blend coefficients are a different network
    for strength in [0.2, 0.8] {
        let request = InferenceRequest::new("realesr-general-x4v3", photo(8, 8, PixelLayout::Rgb)).with_denoise_strength(strength);
        h.dispatcher.restore(request).unwrap();
    }
    assert_eq!(h.backend.networks_built(), 3);
}

#[test]
fn test_engine_cache_is_bounded() {
    let h = harness();
    for i in 0..20 {
        let request = InferenceRequest::new("realesr-general-x4v3", photo(4, 4, PixelLayout::Rgb))
            .with_denoise_strength(i as f32 / 20.0);
        h.dispatcher.restore(request).unwrap();
    }
    assert_eq!(h.backend.networks_built(), 20);
    assert_eq!(h.dispatcher.cached_engines(), DEFAULT_ENGINE_CACHE_CAPACITY);

    let dispatcher = Dispatcher::new(WeightCache::new(&h.weights_dir, h.fetcher.clone()), h.backend.clone())
        .with_engine_cache_capacity(2);
    for strength in [0.1, 0.2, 0.1, 0.3, 0.1] {
        let request = InferenceRequest::new("realesr-general-x4v3", photo(4, 4, PixelLayout::Rgb))
            .with_denoise_strength(strength);
        dispatcher.restore(request).unwrap();
    }
    assert_eq!(dispatcher.cached_engines(), 2);
    // 0.1 stays cached because it keeps being used
    assert_eq!(h.backend.networks_built(), 20 + 3);
}

#[test]
fn test_engine_cache_can_be_disabled() {
    let h = harness();
    let dispatcher = Dispatcher::new(WeightCache::new(&h.weights_dir, h.fetcher.clone()), h.backend.clone())
        .with_engine_cache(false);
    for _ in 0..2 {
        dispatcher
            .restore(InferenceRequest::new("RealESRGAN_x4plus", photo(8, 8, PixelLayout::Rgb)))
            .unwrap();
    }
    assert_eq!(h.backend.networks_built(), 2);
    assert_eq!(dispatcher.cached_engines(), 0);
}

#[test]
fn test_out_of_memory_then_tiled_retry() {
    let h = harness_with(RecordingFetcher::default(), MockBackend::new().with_memory_limit(40 * 40));
    let image = photo(64, 64, PixelLayout::Rgb);

    let err = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image.clone()))
        .unwrap_err();
    match &err {
        RevivError::ResourceExhausted { hint, .. } => assert!(hint.contains("--tile 400"), "{}", hint),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());

    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image).with_tile(16))
        .unwrap();
    assert_eq!(restored.image.dimensions(), (256, 256));
}

#[test]
fn test_tiled_and_whole_passes_agree() {
    let h = harness();
    let image = photo(37, 29, PixelLayout::Rgb);
    let whole = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image.clone()))
        .unwrap();
    let tiled = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image).with_tile(12))
        .unwrap();
    assert_eq!(tiled.image, whole.image);
}

#[test]
fn test_bgr_input_stays_bgr() {
    let h = harness();
    let image = photo(12, 9, PixelLayout::Bgr);
    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image.clone()))
        .unwrap();

    assert_eq!(restored.image.layout(), PixelLayout::Bgr);
    for (x, y) in [(0, 0), (11, 8), (5, 4)] {
        assert_eq!(restored.image.pixel(x * 4 + 2, y * 4 + 2), image.pixel(x, y));
    }
}

#[test]
fn test_alpha_survives() {
    let h = harness();
    let image = photo(12, 9, PixelLayout::Rgba);
    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image.clone()))
        .unwrap();

    assert_eq!(restored.image.layout(), PixelLayout::Rgba);
    assert_eq!(restored.image.pixel(11 * 4, 8 * 4)[3], image.pixel(11, 8)[3]);
    assert_eq!(restored.image.pixel(3, 0)[3], image.pixel(0, 0)[3]);
}

#[test]
fn test_face_enhance_pastes_restored_faces() {
    let face = FaceBox {
        x: 4,
        y: 4,
        width: 8,
        height: 8,
        score: 0.9,
    };
    let h = harness_with(RecordingFetcher::default(), MockBackend::new().with_faces(vec![face], [0, 255, 0]));
    let image = PixelBuffer::from_fn(16, 16, PixelLayout::Rgb, |_, _| [0, 0, 0, 0]);
    let restored = h
        .dispatcher
        .restore(InferenceRequest::new("RealESRGAN_x4plus", image).with_face_enhance(true))
        .unwrap();

    assert!(h.fetcher.urls().iter().any(|u| u == FACE_WEIGHTS_URL));
    assert_eq!(h.backend.face_restorers_built(), 1);
    let center = restored.image.pixel(32, 32);
    assert!(center[1] >= 254 && center[0] <= 1, "{:?}", center);
    assert_eq!(restored.image.pixel(1, 1), &[0, 0, 0]);
}

// === Encoded I/O Tests ===

#[test]
fn test_restore_encoded_png() {
    let h = harness();
    let bytes = encode_image(&photo(20, 10, PixelLayout::Rgba), ImageFormat::Png).unwrap();
    let output = h
        .dispatcher
        .restore_encoded(&bytes, "scan.png", ModelFamily::RealEsrgan, "RealESRGAN_x4plus", InferenceOptions::default())
        .unwrap();

    assert_eq!(output.file_name, "scan-upscaled.png");
    assert_eq!(output.format, ImageFormat::Png);
    assert_eq!(output.dimensions, (80, 40));

    let decoded = decode_image(&output.bytes).unwrap();
    assert_eq!(decoded.format, ImageFormat::Png);
    assert_eq!(decoded.buffer.dimensions(), (80, 40));
    assert_eq!(decoded.buffer.layout(), PixelLayout::Rgba);
}

#[test]
fn test_restore_encoded_jpeg_keeps_container() {
    let h = harness();
    let bytes = encode_image(&photo(16, 16, PixelLayout::Rgb), ImageFormat::Jpeg).unwrap();
    let output = h
        .dispatcher
        .restore_encoded(&bytes, "portrait.jpg", ModelFamily::RealEsrgan, "RealESRGAN_x2plus", InferenceOptions {
            outscale: 2.0,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(output.file_name, "portrait-upscaled.jpg");
    assert_eq!(output.dimensions, (32, 32));

    let decoded = decode_image(&output.bytes).unwrap();
    assert_eq!(decoded.format, ImageFormat::Jpeg);
    assert_eq!(decoded.buffer.dimensions(), (32, 32));
}

#[test]
fn test_restore_encoded_names_output_after_container() {
    let h = harness();
    let bytes = encode_image(&photo(8, 8, PixelLayout::Rgb), ImageFormat::Png).unwrap();
    let output = h
        .dispatcher
        .restore_encoded(&bytes, "photo.jpg", ModelFamily::RealEsrgan, "RealESRGAN_x4plus", InferenceOptions::default())
        .unwrap();

    assert_eq!(output.format, ImageFormat::Png);
    assert_eq!(output.file_name, "photo-upscaled.png");
}

#[test]
fn test_restore_encoded_rejects_garbage() {
    let h = harness();
    let err = h
        .dispatcher
        .restore_encoded(b"not an image", "x.png", ModelFamily::RealEsrgan, "RealESRGAN_x4plus", InferenceOptions::default())
        .unwrap_err();
    assert_eq!(err.error_code(), "DECODE_ERROR");
    assert_eq!(h.fetcher.calls(), 0);
}

#[test]
fn test_dispatcher_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Dispatcher>();
}
