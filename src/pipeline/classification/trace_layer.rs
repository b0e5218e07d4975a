use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{BoxError, Service};
use tower_layer::Layer;
use tracing::{debug, warn};

use crate::pipeline::classification::classifier::Classification;
use crate::pipeline::extraction::ImageRegion;

/// Logs latency and outcome of every classification passing through.
#[derive(Debug, Clone)]
pub struct ClassifyTraceLayer {
    classifier: &'static str,
}

impl ClassifyTraceLayer {
    pub fn new(classifier: &'static str) -> Self {
        Self { classifier }
    }
}

impl<S> Layer<S> for ClassifyTraceLayer {
    type Service = ClassifyTrace<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClassifyTrace {
            inner,
            classifier: self.classifier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyTrace<S> {
    inner: S,
    classifier: &'static str,
}

impl<S> Service<Arc<ImageRegion>> for ClassifyTrace<S>
where
    S: Service<Arc<ImageRegion>, Response = Classification, Error = BoxError>,
    S::Future: Send + 'static,
{
    type Response = Classification;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, region: Arc<ImageRegion>) -> Self::Future {
        let anchor_id = region.anchor_id;
        let classifier = self.classifier;
        let start = Instant::now();
        let future = self.inner.call(region);

        Box::pin(async move {
            let result = future.await;
            let elapsed_us = start.elapsed().as_micros() as u64;
            match &result {
                Ok(classification) => debug!(
                    "{} classified anchor {} as '{}' ({:.2}) in {}us",
                    classifier,
                    anchor_id,
                    classification.label,
                    classification.confidence,
                    elapsed_us
                ),
                Err(e) => warn!(
                    "{} failed on anchor {} after {}us: {}",
                    classifier, anchor_id, elapsed_us, e
                ),
            }
            result
        })
    }
}
