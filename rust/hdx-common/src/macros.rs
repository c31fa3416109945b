/// Returns early with an `InvalidState` error when `cond` does not hold.
///
/// ```ignore
/// ensure_state!(memory.has_host(), "upload", "region has no host side");
/// ```
#[macro_export]
macro_rules! ensure_state {
    ($cond:expr, $operation:expr, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::invalid_state($operation, format!($($msg)+)));
        }
    };
}
