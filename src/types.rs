//! Request and response types for every session operation.
//!
//! Each operation has one request struct. [`RequestType`] is the closed set of
//! journal tags and [`Request`] the matching tagged union used when a journaled
//! call is reconstructed.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use video_predictor::ObjectId;

use crate::mask::Mask;

pub type SessionId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSessionRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddPointsRequest {
    pub session_id: SessionId,
    pub frame_index: usize,
    pub object_id: ObjectId,
    /// `[x, y]` pixel coordinates.
    pub points: Vec<[f32; 2]>,
    /// 1 for a foreground click, 0 for background.
    pub labels: Vec<i32>,
    #[serde(default = "default_clear_old_points")]
    pub clear_old_points: bool,
}

fn default_clear_old_points() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMaskRequest {
    pub session_id: SessionId,
    pub frame_index: usize,
    pub object_id: ObjectId,
    pub mask: Mask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClearPointsInFrameRequest {
    pub session_id: SessionId,
    pub frame_index: usize,
    pub object_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClearPointsInVideoRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveObjectRequest {
    pub session_id: SessionId,
    pub object_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagateInVideoRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub start_frame_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateDataValue {
    pub object_id: ObjectId,
    pub mask: Mask,
}

/// Masks of every tracked object on one global frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagateDataResponse {
    pub frame_index: usize,
    pub results: Vec<PropagateDataValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearPointsInVideoResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveObjectResponse {
    pub results: Vec<PropagateDataResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub success: bool,
}

/// Journal tag of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestType {
    StartSession,
    AddPoints,
    AddMask,
    ClearPointsInFrame,
    ClearPointsInVideo,
    RemoveObject,
    PropagateInVideo,
    CloseSession,
}

impl RequestType {
    pub const ALL: [RequestType; 8] = [
        Self::StartSession,
        Self::AddPoints,
        Self::AddMask,
        Self::ClearPointsInFrame,
        Self::ClearPointsInVideo,
        Self::RemoveObject,
        Self::PropagateInVideo,
        Self::CloseSession,
    ];

    /// Type tag stored in the journal's `request_type` field.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::StartSession => "StartSessionRequest",
            Self::AddPoints => "AddPointsRequest",
            Self::AddMask => "AddMaskRequest",
            Self::ClearPointsInFrame => "ClearPointsInFrameRequest",
            Self::ClearPointsInVideo => "ClearPointsInVideoRequest",
            Self::RemoveObject => "RemoveObjectRequest",
            Self::PropagateInVideo => "PropagateInVideoRequest",
            Self::CloseSession => "CloseSessionRequest",
        }
    }

    /// Operation name stored in the journal's `method` field.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::StartSession => "start_session",
            Self::AddPoints => "add_points",
            Self::AddMask => "add_mask",
            Self::ClearPointsInFrame => "clear_points_in_frame",
            Self::ClearPointsInVideo => "clear_points_in_video",
            Self::RemoveObject => "remove_object",
            Self::PropagateInVideo => "propagate_in_video",
            Self::CloseSession => "close_session",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|request_type| request_type.tag() == tag)
    }

    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|request_type| request_type.method() == method)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A request struct that can be journaled and reconstructed.
pub trait Operation: Serialize + DeserializeOwned + Into<Request> {
    const REQUEST_TYPE: RequestType;
}

macro_rules! operations {
    ($($variant:ident($request:ty)),+ $(,)?) => {
        /// Any reconstructed request, one variant per operation.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Request {
            $($variant($request),)+
        }

        impl Request {
            #[must_use]
            pub fn request_type(&self) -> RequestType {
                match self {
                    $(Self::$variant(_) => RequestType::$variant,)+
                }
            }

            /// Decodes the journaled fields of a request of the given type.
            ///
            /// Unknown fields are rejected. A `"type"` key is tolerated only when it
            /// names the same operation. Nested masks are validated as part of the
            /// same decode.
            pub fn decode(request_type: RequestType, data: Value) -> Result<Self, RequestDecodeError> {
                match request_type {
                    $(RequestType::$variant => decode_fields::<$request>(data).map(Self::$variant),)+
                }
            }

            /// Serializes the request fields in their journaled form.
            pub fn to_data(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(Self::$variant(request) => serde_json::to_value(request),)+
                }
            }
        }

        $(
            impl Operation for $request {
                const REQUEST_TYPE: RequestType = RequestType::$variant;
            }

            impl From<$request> for Request {
                fn from(request: $request) -> Self {
                    Self::$variant(request)
                }
            }
        )+
    };
}

operations! {
    StartSession(StartSessionRequest),
    AddPoints(AddPointsRequest),
    AddMask(AddMaskRequest),
    ClearPointsInFrame(ClearPointsInFrameRequest),
    ClearPointsInVideo(ClearPointsInVideoRequest),
    RemoveObject(RemoveObjectRequest),
    PropagateInVideo(PropagateInVideoRequest),
    CloseSession(CloseSessionRequest),
}

impl Request {
    #[must_use]
    pub fn method(&self) -> &'static str {
        self.request_type().method()
    }

    /// Session the request targets, if it targets an existing one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::StartSession(_) => None,
            Self::AddPoints(request) => Some(&request.session_id),
            Self::AddMask(request) => Some(&request.session_id),
            Self::ClearPointsInFrame(request) => Some(&request.session_id),
            Self::ClearPointsInVideo(request) => Some(&request.session_id),
            Self::RemoveObject(request) => Some(&request.session_id),
            Self::PropagateInVideo(request) => Some(&request.session_id),
            Self::CloseSession(request) => Some(&request.session_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestDecodeError {
    #[error("{request_type} data must be a JSON object")]
    NotAnObject { request_type: RequestType },

    #[error("{request_type} data carries type {found}")]
    TypeMismatch {
        request_type: RequestType,
        found: String,
    },

    #[error("invalid {request_type} data: {source}")]
    Schema {
        request_type: RequestType,
        #[source]
        source: serde_json::Error,
    },
}

fn decode_fields<R: Operation>(mut data: Value) -> Result<R, RequestDecodeError> {
    let request_type = R::REQUEST_TYPE;
    let Value::Object(fields) = &mut data else {
        return Err(RequestDecodeError::NotAnObject { request_type });
    };

    if let Some(tag) = fields.remove("type") {
        if tag.as_str() != Some(request_type.method()) {
            return Err(RequestDecodeError::TypeMismatch {
                request_type,
                found: tag.to_string(),
            });
        }
    }

    serde_json::from_value(data).map_err(|source| RequestDecodeError::Schema {
        request_type,
        source,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::mask::{encode, BinaryMask};

    #[test]
    fn tags_and_methods_resolve_both_ways() {
        for request_type in RequestType::ALL {
            assert_eq!(RequestType::from_tag(request_type.tag()), Some(request_type));
            assert_eq!(
                RequestType::from_method(request_type.method()),
                Some(request_type)
            );
        }
        assert_eq!(RequestType::from_tag("ResizeVideoRequest"), None);
        assert_eq!(RequestType::from_tag("start_session"), None);
    }

    #[test]
    fn decode_builds_the_matching_variant() {
        let request = Request::decode(
            RequestType::AddPoints,
            json!({
                "session_id": "s-1",
                "frame_index": 4,
                "object_id": 2,
                "points": [[10.0, 12.5]],
                "labels": [1],
            }),
        )
        .expect("add points should decode");

        assert_eq!(
            request,
            Request::AddPoints(AddPointsRequest {
                session_id: "s-1".to_string(),
                frame_index: 4,
                object_id: 2,
                points: vec![[10.0, 12.5]],
                labels: vec![1],
                clear_old_points: true,
            })
        );
        assert_eq!(request.method(), "add_points");
        assert_eq!(request.session_id(), Some("s-1"));
    }

    #[test]
    fn decode_accepts_matching_type_key_only() {
        let request = Request::decode(
            RequestType::CloseSession,
            json!({"type": "close_session", "session_id": "s-1"}),
        )
        .expect("matching type key should be accepted");
        assert_eq!(
            request,
            Request::CloseSession(CloseSessionRequest {
                session_id: "s-1".to_string(),
            })
        );

        let error = Request::decode(
            RequestType::CloseSession,
            json!({"type": "start_session", "session_id": "s-1"}),
        )
        .expect_err("mismatched type key must fail");
        assert_matches!(error, RequestDecodeError::TypeMismatch { .. });
    }

    #[test]
    fn decode_rejects_unknown_and_missing_fields() {
        let error = Request::decode(
            RequestType::RemoveObject,
            json!({"session_id": "s-1", "object_id": 1, "frame_index": 3}),
        )
        .expect_err("unknown field must fail");
        assert_matches!(
            error,
            RequestDecodeError::Schema {
                request_type: RequestType::RemoveObject,
                ..
            }
        );

        let error = Request::decode(RequestType::RemoveObject, json!({"session_id": "s-1"}))
            .expect_err("missing field must fail");
        assert!(error.to_string().contains("object_id"));

        let error = Request::decode(RequestType::RemoveObject, json!(["s-1", 1]))
            .expect_err("array data must fail");
        assert_matches!(error, RequestDecodeError::NotAnObject { .. });
    }

    #[test]
    fn decode_validates_nested_mask() {
        let mask = encode(&BinaryMask::from_fn(4, 4, |row, col| row == col));
        let request = Request::decode(
            RequestType::AddMask,
            json!({
                "session_id": "s-1",
                "frame_index": 0,
                "object_id": 7,
                "mask": mask,
            }),
        )
        .expect("add mask should decode");
        let Request::AddMask(request) = request else {
            panic!("expected add mask request");
        };
        assert_eq!(request.mask, mask);

        let error = Request::decode(
            RequestType::AddMask,
            json!({
                "session_id": "s-1",
                "frame_index": 0,
                "object_id": 7,
                "mask": {"size": [4, 4], "counts": "9"},
            }),
        )
        .expect_err("mask that does not cover 4x4 must fail");
        assert_matches!(error, RequestDecodeError::Schema { .. });
    }

    #[test]
    fn journaled_data_omits_absent_session_id_and_type_key() {
        let request = Request::from(StartSessionRequest {
            path: "videos/clip.mp4".to_string(),
            session_id: None,
        });

        assert_eq!(
            request.to_data().expect("request should serialize"),
            json!({"path": "videos/clip.mp4"})
        );
    }
}
