//! Emulated AWS services wired onto the mirage dispatch pipeline.
//!
//! Each service module contributes a [`ServiceModel`] and a backend
//! factory; [`catalog`] assembles them and [`dispatcher`] /
//! [`interceptor`] produce ready-to-use entry points.

pub mod apigateway;
pub mod dynamodb;
pub mod ec2;
mod ids;
pub mod s3;

use std::sync::Arc;

use mirage_core::{Dispatcher, Interceptor, ServiceCatalog, ServiceModel};

/// The full service catalog: every emulated service registered.
pub fn catalog() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();
    ec2::register(&mut catalog);
    s3::register(&mut catalog);
    dynamodb::register(&mut catalog);
    apigateway::register(&mut catalog);
    catalog
}

/// A dispatcher over the full catalog.
pub fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(Arc::new(catalog())))
}

/// An interceptor over the full catalog, initially inactive.
pub fn interceptor() -> Arc<Interceptor> {
    Interceptor::new(dispatcher())
}

/// Wire models without their backends, for callers that only need
/// routing metadata.
pub fn models() -> Vec<ServiceModel> {
    vec![
        ec2::model(),
        s3::model(),
        dynamodb::model(),
        apigateway::model(),
    ]
}
