use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};

use crate::error::ClassificationError;
use crate::pipeline::classification::classifier::{Classification, Classifier};
use crate::pipeline::classification::trace_layer::ClassifyTraceLayer;
use crate::pipeline::extraction::ImageRegion;

/// Adapts a [`Classifier`] to a tower service.
#[derive(Clone)]
pub struct ClassifierService {
    inner: Arc<dyn Classifier>,
}

impl ClassifierService {
    pub fn new(inner: Arc<dyn Classifier>) -> Self {
        Self { inner }
    }
}

impl Service<Arc<ImageRegion>> for ClassifierService {
    type Response = Classification;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, region: Arc<ImageRegion>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(inner.classify(&region))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ClassificationError::InferenceFailed(format!(
                        "{} panicked",
                        inner.name()
                    )))
                });
            outcome.map_err(BoxError::from)
        })
    }
}

pub struct ClassifierBuilder {
    classifier: Arc<dyn Classifier>,
    timeout: Option<Duration>,
    concurrency: usize,
}

impl ClassifierBuilder {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            timeout: None,
            concurrency: 1,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> ClassifierHandle {
        let service = ServiceBuilder::new()
            .layer(ClassifyTraceLayer::new(self.classifier.name()))
            .option_layer(self.timeout.map(TimeoutLayer::new))
            .concurrency_limit(self.concurrency)
            .service(ClassifierService::new(self.classifier));

        ClassifierHandle {
            service: BoxCloneService::new(service),
            timeout: self.timeout,
        }
    }
}

/// Cheap to clone; each clone can carry one classification to completion.
#[derive(Clone)]
pub struct ClassifierHandle {
    service: BoxCloneService<Arc<ImageRegion>, Classification, BoxError>,
    timeout: Option<Duration>,
}

impl ClassifierHandle {
    pub async fn classify(
        mut self,
        region: Arc<ImageRegion>,
    ) -> Result<Classification, ClassificationError> {
        let timeout = self.timeout;
        let service = self
            .service
            .ready()
            .await
            .map_err(|e| into_classification_error(e, timeout))?;
        service
            .call(region)
            .await
            .map_err(|e| into_classification_error(e, timeout))
    }
}

fn into_classification_error(err: BoxError, timeout: Option<Duration>) -> ClassificationError {
    if err.is::<Elapsed>() {
        return ClassificationError::Timeout(timeout.unwrap_or_default());
    }
    match err.downcast::<ClassificationError>() {
        Ok(err) => *err,
        Err(other) => ClassificationError::InferenceFailed(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::classification::classifier::Label;
    use crate::tracking::AnchorId;
    use async_trait::async_trait;
    use image::RgbImage;
    use nalgebra::Point2;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Returns a fixed outcome after an optional delay, counting calls.
    pub(crate) struct FixedClassifier {
        pub outcome: Result<Classification, ClassificationError>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub(crate) fn label(label: &str) -> Self {
            Self {
                outcome: Ok(Classification::new(Label::new(label), 0.9)),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(err: ClassificationError) -> Self {
            Self {
                outcome: Err(err),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _region: &ImageRegion,
        ) -> Result<Classification, ClassificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }

        fn name(&self) -> &'static str {
            "FixedClassifier"
        }
    }

    struct PanickingClassifier;

    #[async_trait]
    impl Classifier for PanickingClassifier {
        async fn classify(
            &self,
            _region: &ImageRegion,
        ) -> Result<Classification, ClassificationError> {
            panic!("model exploded");
        }

        fn name(&self) -> &'static str {
            "PanickingClassifier"
        }
    }

    pub(crate) fn region() -> Arc<ImageRegion> {
        Arc::new(ImageRegion {
            anchor_id: AnchorId::new(),
            frame_id: Uuid::new_v4(),
            image: RgbImage::new(4, 4),
            source_quad: [Point2::origin(); 4],
        })
    }

    #[tokio::test]
    async fn passes_label_through_stack() {
        let handle = ClassifierBuilder::new(Arc::new(FixedClassifier::label("Island")))
            .timeout(Some(Duration::from_secs(1)))
            .concurrency(2)
            .build();
        let classification = handle.classify(region()).await.unwrap();
        assert_eq!(classification.label, Label::new("Island"));
    }

    #[tokio::test]
    async fn preserves_classifier_error() {
        let handle = ClassifierBuilder::new(Arc::new(FixedClassifier::failing(
            ClassificationError::ModelUnavailable("no weights".to_string()),
        )))
        .build();
        assert_eq!(
            handle.classify(region()).await.unwrap_err(),
            ClassificationError::ModelUnavailable("no weights".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inference_times_out() {
        let mut slow = FixedClassifier::label("Island");
        slow.delay = Duration::from_secs(10);
        let handle = ClassifierBuilder::new(Arc::new(slow))
            .timeout(Some(Duration::from_millis(50)))
            .build();
        assert_eq!(
            handle.classify(region()).await.unwrap_err(),
            ClassificationError::Timeout(Duration::from_millis(50))
        );
    }

    #[tokio::test]
    async fn panic_becomes_inference_failure() {
        let handle = ClassifierBuilder::new(Arc::new(PanickingClassifier)).build();
        assert!(matches!(
            handle.classify(region()).await,
            Err(ClassificationError::InferenceFailed(_))
        ));
    }
}
