//! Analysis pipeline seam.
//!
//! The expensive "turn this page into consumption-ready output" operation
//! lives outside this crate. Workers only see this trait.

use crate::error::PipelineError;
use crate::queue::ContentRef;
use std::marker::PhantomData;

/// The expensive operation that workers run in the background.
///
/// Implementations may block (network, disk, model inference). A pipeline
/// whose collaborators are missing should return
/// [`PipelineError::Unavailable`] rather than panic.
pub trait AnalysisPipeline: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn analyze(&self, content: &ContentRef, language: &str) -> Result<Self::Output, PipelineError>;
}

/// Pipeline built from a closure.
pub struct FnPipeline<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> FnPipeline<F, T>
where
    F: Fn(&ContentRef, &str) -> Result<T, PipelineError> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _output: PhantomData,
        }
    }
}

impl<F, T> AnalysisPipeline for FnPipeline<F, T>
where
    F: Fn(&ContentRef, &str) -> Result<T, PipelineError> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    type Output = T;

    fn analyze(&self, content: &ContentRef, language: &str) -> Result<T, PipelineError> {
        (self.f)(content, language)
    }
}
