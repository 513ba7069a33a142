use crate::{
    model_service::{ModelError, ModelService},
    preprocess::{normalize_image, stack_batch, PreprocessError},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

/// Strictly above this the image counts as a dog; at or below it is a cat.
const DOG_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Cat,
    Dog,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Cat => write!(f, "cat"),
            Label::Dog => write!(f, "dog"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Prediction {
    pub probability: f32,
    pub label: Label,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("failed to read upload: {0}")]
    Upload(#[from] MultipartError),
    #[error("upload carried no file field")]
    MissingFile,
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("model returned no probability for the uploaded image")]
    EmptyPrediction,
}

/// Every failure on the predict path collapses into the same generic payload;
/// the cause only appears in the server logs.
impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        tracing::error!("Prediction error: {}", self);
        Json(ErrorBody {
            error: "prediction failed",
        })
        .into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, PredictError> {
    let field = multipart
        .next_field()
        .await?
        .ok_or(PredictError::MissingFile)?;
    let image_data = field.bytes().await?;

    let normalized = normalize_image(&image_data)?;
    let batch = stack_batch(&[normalized])?;

    let probabilities = state.model_service.predict(batch).await?;
    let probability = *probabilities.first().ok_or(PredictError::EmptyPrediction)?;
    let label = if probability > DOG_THRESHOLD {
        Label::Dog
    } else {
        Label::Cat
    };

    tracing::info!(
        "Prediction generated: label={}, prob={:.3}",
        label,
        probability
    );

    Ok(Json(Prediction { probability, label }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::app_router;
    use crate::telemetry::Metrics;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use image::{DynamicImage, Rgb, RgbImage};
    use ndarray::Array4;
    use std::io::Cursor;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "catdog-test-boundary";

    #[derive(Clone)]
    struct FixedModelService {
        probability: f32,
    }

    #[async_trait]
    impl ModelService for FixedModelService {
        async fn predict(&self, _batch: Array4<f32>) -> Result<Vec<f32>, ModelError> {
            Ok(vec![self.probability])
        }
    }

    #[derive(Clone)]
    struct FailingModelService;

    #[async_trait]
    impl ModelService for FailingModelService {
        async fn predict(&self, batch: Array4<f32>) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::MalformedOutput {
                expected: batch.dim().0,
                got: vec![3, 1000],
            })
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 48, Rgb([180, 120, 40]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    fn multipart_request(file_content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"pet.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(file_content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn predict_json<M: ModelService>(
        model_service: M,
        request: Request<Body>,
    ) -> serde_json::Value {
        let router = app_router(model_service, Arc::new(Metrics::new()));
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn high_probability_is_labelled_dog() {
        let body = predict_json(
            FixedModelService { probability: 0.7 },
            multipart_request(&png_bytes()),
        )
        .await;

        assert_eq!(body["probability"].as_f64().unwrap(), 0.7);
        assert_eq!(body["label"], "dog");
    }

    #[tokio::test]
    async fn low_probability_is_labelled_cat() {
        let body = predict_json(
            FixedModelService { probability: 0.3 },
            multipart_request(&png_bytes()),
        )
        .await;

        assert_eq!(body["probability"].as_f64().unwrap(), 0.3);
        assert_eq!(body["label"], "cat");
    }

    #[tokio::test]
    async fn threshold_probability_is_labelled_cat() {
        let body = predict_json(
            FixedModelService { probability: 0.5 },
            multipart_request(&png_bytes()),
        )
        .await;

        assert_eq!(body["label"], "cat");
    }

    #[tokio::test]
    async fn unparseable_upload_answers_generic_error() {
        let body = predict_json(
            FixedModelService { probability: 0.9 },
            multipart_request(b"not an image"),
        )
        .await;

        assert_eq!(body, serde_json::json!({"error": "prediction failed"}));
    }

    #[tokio::test]
    async fn upload_without_file_field_answers_generic_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!("--{BOUNDARY}--\r\n")))
            .unwrap();

        let body = predict_json(FixedModelService { probability: 0.9 }, request).await;

        assert_eq!(body, serde_json::json!({"error": "prediction failed"}));
    }

    #[tokio::test]
    async fn oversized_upload_answers_generic_error() {
        let oversized = vec![0u8; 11 * 1024 * 1024];

        let body = predict_json(
            FixedModelService { probability: 0.9 },
            multipart_request(&oversized),
        )
        .await;

        assert_eq!(body, serde_json::json!({"error": "prediction failed"}));
    }

    #[tokio::test]
    async fn model_failure_answers_generic_error() {
        let body = predict_json(FailingModelService, multipart_request(&png_bytes())).await;

        assert_eq!(body, serde_json::json!({"error": "prediction failed"}));
    }
}
