use tokio_util::sync::CancellationToken;
use tracing::Span;

/// The ambient state of a single query execution.
///
/// Carries the cancellation signal observed by long running iterators,
/// and the span that new tracing spans are parented to.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    span: Span,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            span: Span::none(),
        }
    }

    /// The span new spans should be children of
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// A context whose spans are parented to `span`.
    ///
    /// ```ignore
    /// let span = tracing::debug_span!(parent: ctx.span(), "plan.Project");
    /// let ctx = ctx.with_span(span.clone());
    /// ```
    pub fn with_span(&self, span: Span) -> Self {
        Self {
            cancel: self.cancel.clone(),
            span,
        }
    }

    /// A derived context that is cancelled when `self` is,
    /// or when the returned token is cancelled.
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let cancel = self.cancel.child_token();
        let ctx = Self {
            cancel: cancel.clone(),
            span: self.span.clone(),
        };
        (ctx, cancel)
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::Context;

    #[test]
    fn cancellation_flows_to_derived_contexts() {
        let root = Context::new();
        let (child, token) = root.with_cancel();
        let (grandchild, _) = child.with_cancel();

        token.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(!root.is_cancelled());

        let (other, _) = root.with_cancel();
        root.cancel();
        assert!(other.is_cancelled());
    }
}
