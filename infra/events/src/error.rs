use std::borrow::Cow;

/// Errors that can occur during tab bus operations.
#[reel_derive::reel_error]
pub enum BusError {
    /// The origin or origin pattern could not be parsed.
    #[error("Invalid origin{}: {message}", format_context(.context))]
    InvalidOrigin { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Capacity must be greater than zero.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The bus was shut down; no new tabs can connect.
    #[error("Bus closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A message payload could not be encoded or decoded.
    #[error("Payload serialization failed{}: {source}", format_context(.context))]
    Payload { source: serde_json::Error, context: Option<Cow<'static, str>> },
}
