//! Generation orchestration.
//!
//! One logical background request fans out into four concurrent viewpoint
//! calls joined as a batch: every member must succeed or the whole batch
//! fails, and a failed batch is retried in full. Inpainting is a single
//! call with no retry.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use stagecraft_contracts::requests::{BackgroundRequest, InpaintRequest};

use crate::composite;
use crate::normalize;
use crate::prompt;
use crate::remote::SceneModelClient;

/// Whole-batch retry: `max_retries` additional attempts after the first,
/// with a delay of `backoff_unit * 2^attempt` before retry `attempt`.
/// Defaults give 3 attempts total with 2 s and 4 s delays, no jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_unit * 2u32.saturating_pow(attempt)
    }
}

/// Run the four-viewpoint batch for a background request. Returns the four
/// flattened JPEG results in viewpoint order, or the last attempt's error
/// after retries are exhausted. Failures are not classified: transport
/// errors, content blocks and malformed payloads all retry identically.
pub fn generate_batch(
    client: &dyn SceneModelClient,
    request: &BackgroundRequest,
    policy: RetryPolicy,
) -> Result<Vec<Vec<u8>>> {
    let staged = normalize::stage_subject(&request.base_image)?;
    let instructions: Vec<String> = prompt::viewpoint_variants(&request.prompt)
        .into_iter()
        .map(|variant| prompt::background_instruction(&variant, &request.negative_prompt))
        .collect();

    let mut last_error = None;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            thread::sleep(policy.delay_before(attempt));
        }
        match run_batch(client, &staged, &instructions) {
            Ok(images) => return Ok(images),
            Err(err) => {
                eprintln!(
                    "generation attempt {}/{} failed: {err:#}",
                    attempt + 1,
                    policy.max_retries + 1
                );
                last_error = Some(err);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("After multiple retries, the AI could not generate images.")))
}

fn run_batch(
    client: &dyn SceneModelClient,
    staged: &[u8],
    instructions: &[String],
) -> Result<Vec<Vec<u8>>> {
    let results: Vec<Result<Vec<u8>>> = thread::scope(|scope| {
        let handles: Vec<_> = instructions
            .iter()
            .map(|instruction| {
                scope.spawn(move || -> Result<Vec<u8>> {
                    let image = client.generate(staged, instruction)?;
                    composite::flatten_to_jpeg(&image.bytes)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("viewpoint worker panicked")))
            })
            .collect()
    });

    let mut images = Vec::with_capacity(results.len());
    for result in results {
        images.push(result?);
    }
    Ok(images)
}

/// Run a single inpainting call. The subject image is dropped from the
/// payload when the combined instruction asks for a removal, so a stale
/// subject reference cannot steer the fill.
pub fn inpaint(client: &dyn SceneModelClient, request: &InpaintRequest) -> Result<Vec<u8>> {
    let instruction = prompt::inpaint_instruction(
        &request.prompt,
        &request.subject_name,
        &request.negative_prompt,
    );
    let subject = if prompt::is_removal_instruction(&request.prompt) {
        None
    } else {
        request.subject_image.as_deref()
    };
    let image = client.inpaint(&request.base_image, &request.mask, subject, &instruction)?;
    composite::flatten_to_jpeg(&image.bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::bail;
    use image::{Rgba, RgbaImage};
    use stagecraft_contracts::palette::{BrushColor, RegionInstructions};
    use stagecraft_contracts::suggestions::SceneAnalysis;

    use super::*;
    use crate::normalize::encode_png_rgba;
    use crate::remote::ImageBytes;

    fn tiny_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(8, 8, Rgba([10, 200, 30, 255]));
        encode_png_rgba(&img).expect("test png encodes")
    }

    /// Fails its first `failures` generate calls, succeeds afterwards.
    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
        result: Vec<u8>,
    }

    impl FlakyClient {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                result: tiny_png(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SceneModelClient for FlakyClient {
        fn analyze(&self, _: &[u8], _: &str) -> Result<SceneAnalysis> {
            bail!("not used")
        }

        fn enhance(&self, _: &str) -> Result<String> {
            bail!("not used")
        }

        fn generate(&self, _: &[u8], _: &str) -> Result<ImageBytes> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                bail!("simulated outage #{call}");
            }
            Ok(ImageBytes {
                bytes: self.result.clone(),
                mime_type: Some("image/png".to_string()),
            })
        }

        fn inpaint(&self, _: &[u8], _: &[u8], _: Option<&[u8]>, _: &str) -> Result<ImageBytes> {
            bail!("not used")
        }
    }

    /// Records whether a subject image was attached to the inpaint call.
    #[derive(Default)]
    struct RecordingClient {
        saw_subject: Mutex<Option<bool>>,
    }

    impl SceneModelClient for RecordingClient {
        fn analyze(&self, _: &[u8], _: &str) -> Result<SceneAnalysis> {
            bail!("not used")
        }

        fn enhance(&self, _: &str) -> Result<String> {
            bail!("not used")
        }

        fn generate(&self, _: &[u8], _: &str) -> Result<ImageBytes> {
            bail!("not used")
        }

        fn inpaint(
            &self,
            _: &[u8],
            _: &[u8],
            subject: Option<&[u8]>,
            _: &str,
        ) -> Result<ImageBytes> {
            *self.saw_subject.lock().expect("lock") = Some(subject.is_some());
            Ok(ImageBytes {
                bytes: tiny_png(),
                mime_type: Some("image/png".to_string()),
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_unit: Duration::from_millis(1),
        }
    }

    fn background_request() -> BackgroundRequest {
        BackgroundRequest::new(tiny_png(), "木桌場景", "文字", "蛋糕刀").expect("valid request")
    }

    fn inpaint_request(instruction: &str, subject: Option<Vec<u8>>) -> InpaintRequest {
        let mut regions = RegionInstructions::new();
        regions.register(BrushColor::Red);
        regions.set_instruction(BrushColor::Red, instruction);
        InpaintRequest::new(tiny_png(), tiny_png(), false, &regions, subject, "", "杯子")
            .expect("valid request")
    }

    #[test]
    fn default_delays_are_two_then_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before(2), Duration::from_secs(4));
    }

    #[test]
    fn batch_succeeds_on_the_third_attempt() -> Result<()> {
        // Two full batches of 4 fail, the third succeeds.
        let client = FlakyClient::new(8);
        let images = generate_batch(&client, &background_request(), fast_policy())?;
        assert_eq!(images.len(), 4);
        assert_eq!(client.calls(), 12);
        Ok(())
    }

    #[test]
    fn exhausted_retries_surface_the_last_error() {
        let client = FlakyClient::new(usize::MAX);
        let err = generate_batch(&client, &background_request(), fast_policy()).unwrap_err();
        assert!(err.to_string().contains("simulated outage"));
        // Three attempts of four calls each, nothing more.
        assert_eq!(client.calls(), 12);
    }

    #[test]
    fn one_failing_viewpoint_fails_the_whole_batch() {
        // Every batch has exactly one failure: call indices 3, 7, 11 fail.
        struct OneBadViewpoint {
            calls: AtomicUsize,
        }
        impl SceneModelClient for OneBadViewpoint {
            fn analyze(&self, _: &[u8], _: &str) -> Result<SceneAnalysis> {
                bail!("not used")
            }
            fn enhance(&self, _: &str) -> Result<String> {
                bail!("not used")
            }
            fn generate(&self, _: &[u8], _: &str) -> Result<ImageBytes> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call % 4 == 3 {
                    bail!("viewpoint blocked");
                }
                Ok(ImageBytes {
                    bytes: tiny_png(),
                    mime_type: None,
                })
            }
            fn inpaint(&self, _: &[u8], _: &[u8], _: Option<&[u8]>, _: &str) -> Result<ImageBytes> {
                bail!("not used")
            }
        }

        let client = OneBadViewpoint {
            calls: AtomicUsize::new(0),
        };
        let err = generate_batch(&client, &background_request(), fast_policy()).unwrap_err();
        assert!(err.to_string().contains("viewpoint blocked"));
    }

    #[test]
    fn inpaint_keeps_the_subject_for_additive_edits() -> Result<()> {
        let client = RecordingClient::default();
        inpaint(&client, &inpaint_request("加上蒸氣", Some(tiny_png())))?;
        assert_eq!(*client.saw_subject.lock().expect("lock"), Some(true));
        Ok(())
    }

    #[test]
    fn inpaint_drops_the_subject_on_removal() -> Result<()> {
        let client = RecordingClient::default();
        inpaint(&client, &inpaint_request("移除這個杯子", Some(tiny_png())))?;
        assert_eq!(*client.saw_subject.lock().expect("lock"), Some(false));
        Ok(())
    }

    #[test]
    fn results_come_back_as_flattened_jpeg() -> Result<()> {
        let client = FlakyClient::new(0);
        let images = generate_batch(&client, &background_request(), fast_policy())?;
        for image in images {
            let decoded = image::load_from_memory(&image)?;
            assert_eq!((decoded.width(), decoded.height()), (8, 8));
        }
        Ok(())
    }
}
