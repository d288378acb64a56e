use std::sync::OnceLock;

/// Handle to the process-wide wire driver.
///
/// The underlying driver allows exactly one instance per process. It is
/// initialized on first use and lives until process exit; every backend
/// must call [`global`] before opening a connection.
#[derive(Debug)]
pub struct Driver {
    _private: (),
}

static DRIVER: OnceLock<Driver> = OnceLock::new();

/// Initialize the driver if needed and return the process-wide handle.
/// Safe to call from any thread, any number of times.
pub fn global() -> &'static Driver {
    DRIVER.get_or_init(|| {
        tracing::debug!("initializing document driver instance");
        Driver { _private: () }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let a = global() as *const Driver;
        let b = global() as *const Driver;
        assert_eq!(a, b);
    }
}
