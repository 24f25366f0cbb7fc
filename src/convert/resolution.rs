use super::{ColorMatrix, ColorRange, ConversionContext};
use crate::decoder::SourceFormat;

/// The triple a conversion context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub format: SourceFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDecision {
    Reuse,
    Rebuild,
}

/// Reuse only when the incoming triple equals the bound one exactly.
pub fn decide(current: Option<ContextKey>, incoming: ContextKey) -> ContextDecision {
    match current {
        Some(key) if key == incoming => ContextDecision::Reuse,
        _ => ContextDecision::Rebuild,
    }
}

/// Keeps the conversion context in step with the decoded stream.
///
/// At most one context exists at a time. A change of width, height or
/// source format releases the old context before the new one is installed.
pub struct ResolutionManager {
    matrix: ColorMatrix,
    range: ColorRange,
    pool_size: usize,
    current: Option<ConversionContext>,
    rebuilds: u64,
}

impl ResolutionManager {
    pub fn new(matrix: ColorMatrix, range: ColorRange, pool_size: usize) -> Self {
        Self {
            matrix,
            range,
            pool_size,
            current: None,
            rebuilds: 0,
        }
    }

    /// Return a context bound to exactly (format, width, height).
    pub fn ensure_context(
        &mut self,
        format: SourceFormat,
        width: u32,
        height: u32,
    ) -> &ConversionContext {
        let incoming = ContextKey {
            format,
            width,
            height,
        };

        let ctx = match self.current.take() {
            Some(ctx) if decide(Some(ctx.key()), incoming) == ContextDecision::Reuse => ctx,
            previous => {
                if let Some(old) = previous {
                    let old = old.key();
                    log::info!(
                        "ResolutionManager: {}x{} {:?} -> {}x{} {:?}, rebuilding context",
                        old.width,
                        old.height,
                        old.format,
                        width,
                        height,
                        format
                    );
                } else {
                    log::debug!(
                        "ResolutionManager: first context {}x{} {:?}",
                        width,
                        height,
                        format
                    );
                }
                self.rebuilds += 1;
                ConversionContext::new(incoming, self.matrix, self.range, self.pool_size)
            }
        };

        &*self.current.insert(ctx)
    }

    pub fn current(&self) -> Option<&ConversionContext> {
        self.current.as_ref()
    }

    /// Number of contexts built so far, the first one included.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Drop the current context. Idempotent.
    pub fn release(&mut self) {
        if let Some(ctx) = self.current.take() {
            log::debug!("ResolutionManager: released {:?}", ctx.key());
        }
    }
}
