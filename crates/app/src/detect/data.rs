use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the submitted image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Single detection as emitted by the inference worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub class_id: i64,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Payload returned to callers of `POST /api/detect`.
///
/// The worker may also emit `success` and `count` alongside `detections`;
/// both are redundant and dropped on parse.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
}

/// Error body shape shared by the server and the client transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_payload_parses_with_extra_fields() {
        let raw = r#"{
            "success": true,
            "count": 1,
            "detections": [{
                "class": "helmet",
                "class_id": 0,
                "confidence": 0.91,
                "bbox": {"x1": 10.0, "y1": 20.0, "x2": 110.0, "y2": 220.0}
            }]
        }"#;
        let parsed: DetectionResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.detections.len(), 1);
        let det = &parsed.detections[0];
        assert_eq!(det.class, "helmet");
        assert_eq!(det.class_id, 0);
        assert!((det.confidence - 0.91).abs() < f32::EPSILON);
        assert_eq!(det.bbox.x2, 110.0);
    }

    #[test]
    fn error_body_omits_absent_details() {
        let body = serde_json::to_string(&ErrorBody::new("No image provided")).expect("json");
        assert_eq!(body, r#"{"error":"No image provided"}"#);
    }
}
