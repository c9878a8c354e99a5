/// Errors returned by fallible lookups on a [`TreeMap`](crate::TreeMap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("key not found")]
    KeyNotFound,
}
