/// Async counterpart to the standard library's `TryFrom<T>` trait.
///
/// Used where a conversion has to perform I/O on the `compio` runtime, such as
/// loading the project configuration from disk.
pub trait AsyncTryFrom<T>: Sized {
    /// The error type that can occur during conversion.
    type Error;

    /// Performs the fallible asynchronous conversion from `T` to `Self`.
    async fn async_try_from(value: T) -> Result<Self, Self::Error>;
}
