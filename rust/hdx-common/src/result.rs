pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[macro_export]
macro_rules! verify_size {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_size(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[inline]
pub fn verify_size(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_size(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cold]
pub fn invalid_size(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidSize {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::Result;

    fn check(size: usize, capacity: usize) -> Result<()> {
        verify_size!(size, size != 0);
        verify_size!(size, size <= capacity);
        Ok(())
    }

    #[test]
    fn test_verify_size() {
        assert!(check(16, 32).is_ok());
        let e = check(0, 32).unwrap_err();
        assert_eq!(e.to_string(), "invalid size for size: size != 0");
        assert!(check(64, 32).unwrap_err().is_invalid_size());
    }
}
