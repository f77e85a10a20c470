use std::sync::Arc;

use miette::{NamedSource, SourceCode};

#[derive(Debug)]
struct SourceReferenceInner {
    name: String,
    text: String,
    named_source: NamedSource,
}

/// Cheaply clonable program text, attached to reports so `miette` can render labels.
#[derive(Clone, Debug)]
pub struct SourceReference(Arc<SourceReferenceInner>);

impl SourceReference {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        let text = text.into();
        SourceReference(Arc::new(SourceReferenceInner {
            named_source: NamedSource::new(name.clone(), text.clone()),
            name,
            text,
        }))
    }
    fn inner(&self) -> &SourceReferenceInner {
        self.0.as_ref()
    }
    pub fn name(&self) -> &str {
        &self.inner().name
    }
    pub fn text(&self) -> &str {
        &self.inner().text
    }
}

impl SourceCode for SourceReference {
    fn read_span<'a>(
        &'a self,
        span: &miette::SourceSpan,
        context_lines_before: usize,
        context_lines_after: usize,
    ) -> Result<Box<dyn miette::SpanContents<'a> + 'a>, miette::MietteError> {
        self.inner()
            .named_source
            .read_span(span, context_lines_before, context_lines_after)
    }
}
