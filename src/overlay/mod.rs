//! Overlay assets
//!
//! Resolves the overlay half of a stream request into local inputs for the
//! command builder.

pub mod fetch;

pub use fetch::{AssetFetcher, HttpFetcher, LocalFetcher, OverlayFetcher};

use crate::ffmpeg::OverlayInputs;
use crate::stream::{OverlaySpec, StreamArtifacts, StreamId};
use crate::utils::SupervisorResult;
use std::path::{Path, PathBuf};

/// Fetch the overlay image (if any) and pair it with the overlay text
///
/// Returns the inputs for the command builder plus the local image path the
/// stream must clean up on stop.
pub async fn resolve(
    fetcher: &dyn AssetFetcher,
    work_dir: &Path,
    id: &StreamId,
    spec: &OverlaySpec,
) -> SupervisorResult<(OverlayInputs, Option<PathBuf>)> {
    if spec.is_empty() {
        return Ok((OverlayInputs::default(), None));
    }

    let image = match &spec.image {
        Some(location) => {
            let dest = StreamArtifacts::overlay_path(work_dir, id, location);
            fetcher.fetch(location, &dest).await?;
            Some(dest)
        }
        None => None,
    };

    let inputs = OverlayInputs {
        image: image.clone(),
        text: spec.text.clone().filter(|t| !t.is_empty()),
    };
    Ok((inputs, image))
}
