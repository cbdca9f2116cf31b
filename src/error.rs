use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A settlement: the value a promise fulfilled with, or the reason it was
/// rejected.
pub type Outcome<T> = Result<T, Reason>;

/// An arbitrary value carried where a failure (or a promise) was expected,
/// tagged with the name of its concrete type.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Payload {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Name of the concrete type this payload was built from.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.type_name)
    }
}

/// A structured failure raised at a `wait` point or carried by an outer
/// promise.
#[derive(Clone, Debug)]
pub enum Failure {
    /// The conventional rejection used by producers honoring a cancellation
    /// request.
    Canceled,
    /// The bridge was used outside the discipline it requires, e.g. `wait`
    /// without a running logical task.
    InvalidState(&'static str),
    /// A rejection carried a non-failure payload, or a driven sequence
    /// yielded something that is not a promise.
    UnexpectedValue(Payload),
    /// A failure raised by task code or by a promise producer. Propagates
    /// verbatim to the `wait` site and the outer promise.
    Raised(Arc<dyn Error + Send + Sync>),
}

impl Failure {
    pub fn raised<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Failure::Raised(Arc::new(error))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Failure::Canceled)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Canceled => write!(f, "task is canceled"),
            Failure::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Failure::UnexpectedValue(payload) => {
                write!(f, "unexpected non-failure value of type {}", payload.type_name())
            }
            Failure::Raised(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Failure::Raised(error) => Some(error.as_ref() as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

/// What a promise can be rejected with.
///
/// Rejection reasons are loosely typed between producer and consumer: a
/// producer may reject with a structured [`Failure`] or with an arbitrary
/// payload. The `wait` engine coerces the latter into
/// [`Failure::UnexpectedValue`] before resuming a task; the coroutine driver
/// throws the raw reason into the sequence untouched.
#[derive(Clone, Debug)]
pub enum Reason {
    Failure(Failure),
    Value(Payload),
}

impl Reason {
    /// Rejection with an arbitrary non-failure payload.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Reason::Value(Payload::new(value))
    }

    /// The failure a suspended task is resumed with: structured failures
    /// propagate verbatim, anything else becomes `UnexpectedValue`.
    pub(crate) fn into_failure(self) -> Failure {
        match self {
            Reason::Failure(failure) => failure,
            Reason::Value(payload) => Failure::UnexpectedValue(payload),
        }
    }
}

impl From<Failure> for Reason {
    fn from(failure: Failure) -> Self {
        Reason::Failure(failure)
    }
}
