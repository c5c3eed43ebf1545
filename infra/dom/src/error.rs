use crate::node::ElementId;
use std::borrow::Cow;

/// A specialized [`DomError`] enum of this crate.
#[reel_derive::reel_error]
pub enum DomError {
    #[error("Stale element{}: {element}", format_context(.context))]
    StaleElement { element: ElementId, context: Option<Cow<'static, str>> },

    #[error("Hierarchy request rejected{}: {message}", format_context(.context))]
    HierarchyRequest { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid selector '{selector}'{}: {message}", format_context(.context))]
    InvalidSelector {
        selector: String,
        message: Cow<'static, str>,
        context: Option<Cow<'static, str>>,
    },

    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl DomError {
    pub(crate) const fn stale(element: ElementId) -> Self {
        Self::StaleElement { element, context: None }
    }

    pub(crate) fn hierarchy(message: impl Into<Cow<'static, str>>) -> Self {
        Self::HierarchyRequest { message: message.into(), context: None }
    }

    pub(crate) fn selector(selector: &str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidSelector { selector: selector.to_owned(), message: message.into(), context: None }
    }
}
