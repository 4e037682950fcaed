//! Well-known keys, tags and names shared by the blur pipeline stages.

/// Input/output key carrying an artifact identifier between stages.
pub const KEY_IMAGE_URI: &str = "uri";

/// Tag attached to the stage whose result is the pipeline's final output.
///
/// Query the scheduler by this tag to find every historical output,
/// independent of the run name.
pub const TAG_OUTPUT: &str = "output";

/// Unique work name used for the image manipulation pipeline.
pub const IMAGE_MANIPULATION_WORK_NAME: &str = "image_manipulation_work";

/// Directory (relative to the application data root) holding intermediate artifacts.
pub const OUTPUT_PATH: &str = "blur_filter_outputs";

/// File suffix of intermediate artifacts removed by the cleanup stage.
pub const OUTPUT_SUFFIX: &str = ".png";

/// Title used when the final image is published.
pub const SAVED_IMAGE_TITLE: &str = "Blurred Image";

/// Maximum serialized size of a [`Data`](crate::data::Data) payload.
///
/// Payloads are persisted alongside task records, so they are kept small:
/// stages pass artifact identifiers, never artifact bytes.
pub const MAX_DATA_BYTES: usize = 10 * 1024;
