//! Capture request descriptions.

use super::{OutputTarget, PreviewTarget, StillTarget};
use serde::{Deserialize, Serialize};

/// Autofocus behaviour requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutofocusMode {
    Off,
    Auto,
    ContinuousVideo,
    #[default]
    ContinuousPicture,
}

/// Request template, mirroring how platforms tune defaults per use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestTemplate {
    /// Repeating request feeding a preview target.
    Preview,
    /// Single-shot request feeding a still target.
    StillCapture,
}

/// Description of one exposure plus requested device parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<OutputTarget>,
    pub autofocus: AutofocusMode,
}

impl CaptureRequest {
    /// Repeating preview request.
    pub fn preview(target: &PreviewTarget, autofocus: AutofocusMode) -> Self {
        Self {
            template: RequestTemplate::Preview,
            targets: vec![OutputTarget::Preview(*target)],
            autofocus,
        }
    }

    /// Single-shot still request.
    pub fn still(target: &StillTarget, autofocus: AutofocusMode) -> Self {
        Self {
            template: RequestTemplate::StillCapture,
            targets: vec![OutputTarget::Still(*target)],
            autofocus,
        }
    }

    #[inline]
    pub fn is_repeating(&self) -> bool {
        self.template == RequestTemplate::Preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ImageFormat, Resolution, SurfaceId};

    #[test]
    fn test_request_templates() {
        let preview = PreviewTarget::new(SurfaceId::new(1), Resolution::new(640, 480));
        let req = CaptureRequest::preview(&preview, AutofocusMode::default());
        assert!(req.is_repeating());
        assert_eq!(req.autofocus, AutofocusMode::ContinuousPicture);

        let still = StillTarget {
            size: Resolution::new(1920, 1080),
            format: ImageFormat::Jpeg,
            max_images: 2,
        };
        let req = CaptureRequest::still(&still, AutofocusMode::Auto);
        assert!(!req.is_repeating());
        assert!(req.targets[0].is_still());
    }
}
