use reel_dom::DomError;
use reel_events::BusError;
use reel_store::StoreError;
use std::borrow::Cow;

/// Errors of the feature engine. Failures stay scoped to the feature that caused them.
#[reel_derive::reel_error]
pub enum EngineError {
    /// Duplicate or malformed feature id.
    #[error("Registration failed{}: {message}", format_context(.context))]
    Registration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The factory or the one-shot scan of a feature failed or panicked.
    #[error("Activation failed{}: {message}", format_context(.context))]
    Activation { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The key-value store rejected a read or write; in-memory state is kept.
    #[error("Persistence failed{}: {source}", format_context(.context))]
    Persistence { source: StoreError, context: Option<Cow<'static, str>> },

    /// A feature failed to process one element.
    #[error("Element processing failed{}: {message}", format_context(.context))]
    Processing { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Unknown feature{}: {message}", format_context(.context))]
    UnknownFeature { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Document operation failed{}: {source}", format_context(.context))]
    Dom { source: DomError, context: Option<Cow<'static, str>> },

    #[error("Tab bus error{}: {source}", format_context(.context))]
    Bus { source: BusError, context: Option<Cow<'static, str>> },

    #[error("Internal engine error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl EngineError {
    pub(crate) fn unknown(id: &str) -> Self {
        Self::UnknownFeature { message: id.to_owned().into(), context: None }
    }

    /// Renders a caught panic payload.
    pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
        payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned())
    }
}
