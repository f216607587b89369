/// Result of a stage that may decide an entity is out of its scope.
///
/// `Skipped` is terminal but not a failure: the delivery is acked, nothing is
/// published and nothing is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(String),
}

impl<T> Outcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Skipped(_) => None,
        }
    }
}
