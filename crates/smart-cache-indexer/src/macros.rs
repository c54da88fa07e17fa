/// Log an error that should page whoever operates the indexer.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {
        ::tracing::error!(
            alert = true,
            severity = "critical",
            $($arg)*
        )
    };
}
